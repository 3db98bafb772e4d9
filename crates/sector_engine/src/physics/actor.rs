//! Kinematic characters
//!
//! Actors are moved by their own walk and jump requests instead of the
//! contact solver. Each substep they integrate gravity, then get pushed out
//! of whatever they overlap. A contact whose normal is within the maximum
//! slope of "up" counts as ground.

use crate::foundation::math::{Quat, Vec3};

/// Character controller state
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    walk_speed: f32,
    jump_speed: f32,
    air_control: f32,
    max_slope: f32,
    step_height: f32,
    flying: bool,
    gravity_enabled: bool,
    walk_velocity: Vec3,
    vertical_velocity: Vec3,
    on_ground: bool,
    jump_requested: bool,
}

impl Default for Actor {
    fn default() -> Self {
        Self {
            walk_speed: 5.0,
            jump_speed: 5.0,
            air_control: 0.1,
            max_slope: 0.8,
            step_height: 0.35,
            flying: false,
            gravity_enabled: true,
            walk_velocity: Vec3::zeros(),
            vertical_velocity: Vec3::zeros(),
            on_ground: false,
            jump_requested: false,
        }
    }
}

impl Actor {
    /// Actor with default speeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk in `direction`, projected onto the ground plane unless flying
    ///
    /// The direction is scaled to the walk speed; zero stops.
    pub fn walk(&mut self, direction: Vec3) {
        let direction = direction.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::zeros);
        self.walk_velocity = direction * self.walk_speed;
    }

    /// Stop walking
    pub fn stop(&mut self) {
        self.walk_velocity = Vec3::zeros();
    }

    /// Jump on the next substep if standing on ground
    pub fn jump(&mut self) {
        self.jump_requested = true;
    }

    /// True when the last substep ended on walkable ground
    pub fn is_on_ground(&self) -> bool {
        self.on_ground
    }

    /// Current velocity
    pub fn velocity(&self) -> Vec3 {
        self.walk_velocity + self.vertical_velocity
    }

    /// Set the walking speed
    pub fn set_walk_speed(&mut self, speed: f32) {
        let current = self.walk_velocity.try_normalize(f32::EPSILON);
        self.walk_speed = speed.max(0.0);
        if let Some(direction) = current {
            self.walk_velocity = direction * self.walk_speed;
        }
    }

    /// Walking speed
    pub fn walk_speed(&self) -> f32 {
        self.walk_speed
    }

    /// Set the initial upward speed of a jump
    pub fn set_jump_speed(&mut self, speed: f32) {
        self.jump_speed = speed.max(0.0);
    }

    /// Fraction of the walk velocity applied while airborne, in [0, 1]
    pub fn set_air_control(&mut self, control: f32) {
        self.air_control = control.clamp(0.0, 1.0);
    }

    /// Steepest walkable slope, in radians
    pub fn set_max_slope(&mut self, radians: f32) {
        self.max_slope = radians.clamp(0.0, std::f32::consts::FRAC_PI_2);
    }

    /// Steepest walkable slope, in radians
    pub fn max_slope(&self) -> f32 {
        self.max_slope
    }

    /// Height of obstacles the actor steps over
    pub fn set_step_height(&mut self, height: f32) {
        self.step_height = height.max(0.0);
    }

    /// Height of obstacles the actor steps over
    pub fn step_height(&self) -> f32 {
        self.step_height
    }

    /// Flying actors ignore gravity and move along their full walk direction
    pub fn set_flying(&mut self, flying: bool) {
        self.flying = flying;
        if flying {
            self.vertical_velocity = Vec3::zeros();
        }
    }

    /// Whether the actor flies
    pub fn is_flying(&self) -> bool {
        self.flying
    }

    /// Opt in or out of sector gravity
    pub fn set_gravity_enabled(&mut self, enabled: bool) {
        self.gravity_enabled = enabled;
    }

    /// Whether sector gravity applies
    pub fn gravity_enabled(&self) -> bool {
        self.gravity_enabled
    }

    /// True when a contact normal counts as ground
    pub fn is_walkable(&self, normal: &Vec3, up: &Vec3) -> bool {
        normal.dot(up) >= self.max_slope.cos()
    }

    /// Integrate one substep and return the displacement to apply
    pub(crate) fn begin_move(&mut self, gravity: &Vec3, dt: f32) -> Vec3 {
        let up = up_vector(gravity);
        if self.jump_requested && (self.on_ground || self.flying) {
            self.vertical_velocity = up * self.jump_speed;
            self.on_ground = false;
        }
        self.jump_requested = false;

        let mut walk = self.walk_velocity;
        if !self.flying {
            walk -= up * walk.dot(&up);
            if !self.on_ground {
                walk *= self.air_control;
            }
            if self.gravity_enabled {
                self.vertical_velocity += gravity * dt;
            }
        }
        self.on_ground = false;
        (walk + self.vertical_velocity) * dt
    }

    /// React to a contact normal found after moving
    pub(crate) fn resolve_contact(&mut self, normal: &Vec3, up: &Vec3) {
        let into = self.vertical_velocity.dot(normal);
        if into < 0.0 {
            self.vertical_velocity -= normal * into;
        }
        if self.is_walkable(normal, up) {
            self.on_ground = true;
            self.vertical_velocity = Vec3::zeros();
        }
    }

    /// Rotate the actor's velocities, used when crossing a portal
    pub(crate) fn rotate_velocity(&mut self, rotation: &Quat) {
        self.walk_velocity = rotation * self.walk_velocity;
        self.vertical_velocity = rotation * self.vertical_velocity;
    }
}

/// Up direction for a gravity vector; +Y without gravity
pub(crate) fn up_vector(gravity: &Vec3) -> Vec3 {
    (-gravity).try_normalize(f32::EPSILON).unwrap_or_else(Vec3::y)
}

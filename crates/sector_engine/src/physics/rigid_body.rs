//! Rigid body state and force accumulation

use serde::{Deserialize, Serialize};

use crate::foundation::math::{Mat3, Quat, Transform, Vec3};

use super::collider::Collider;
use super::KinematicCallback;

/// How a rigid body participates in the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RigidBodyState {
    /// Never moves; infinite mass
    Static,
    /// Moved by forces, gravity and contacts
    #[default]
    Dynamic,
    /// Moved by its kinematic callback; pushes dynamic bodies
    Kinematic,
}

/// Rigid body part of a collision object
pub struct RigidBody {
    pub(crate) state: RigidBodyState,
    pub(crate) mass: f32,
    pub(crate) density: Option<f32>,
    pub(crate) local_inertia: Vec3,
    pub(crate) linear_velocity: Vec3,
    pub(crate) angular_velocity: Vec3,
    pub(crate) force: Vec3,
    pub(crate) torque: Vec3,
    pub(crate) friction: f32,
    pub(crate) elasticity: f32,
    pub(crate) linear_damping: Option<f32>,
    pub(crate) angular_damping: Option<f32>,
    pub(crate) angular_factor: Vec3,
    pub(crate) gravity_enabled: bool,
    pub(crate) enabled: bool,
    pub(crate) idle_time: f32,
    pub(crate) kinematic_callback: Option<Box<dyn KinematicCallback>>,
}

impl std::fmt::Debug for RigidBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RigidBody")
            .field("state", &self.state)
            .field("mass", &self.mass)
            .field("linear_velocity", &self.linear_velocity)
            .field("angular_velocity", &self.angular_velocity)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl RigidBody {
    pub(crate) fn with_state(state: RigidBodyState) -> Self {
        Self {
            state,
            mass: 0.0,
            density: None,
            local_inertia: Vec3::zeros(),
            linear_velocity: Vec3::zeros(),
            angular_velocity: Vec3::zeros(),
            force: Vec3::zeros(),
            torque: Vec3::zeros(),
            friction: 0.5,
            elasticity: 0.0,
            linear_damping: None,
            angular_damping: None,
            angular_factor: Vec3::repeat(1.0),
            gravity_enabled: true,
            enabled: true,
            idle_time: 0.0,
            kinematic_callback: None,
        }
    }

    /// Static body
    pub fn new_static() -> Self {
        Self::with_state(RigidBodyState::Static)
    }

    /// Dynamic body of the given mass
    pub fn new_dynamic(mass: f32) -> Self {
        Self {
            mass: mass.max(0.0),
            ..Self::with_state(RigidBodyState::Dynamic)
        }
    }

    /// Dynamic body whose mass follows from its collider volume
    pub fn with_density(density: f32) -> Self {
        Self {
            density: Some(density.max(0.0)),
            ..Self::with_state(RigidBodyState::Dynamic)
        }
    }

    /// Kinematic body driven by a callback
    pub fn new_kinematic(callback: impl KinematicCallback + 'static) -> Self {
        Self {
            kinematic_callback: Some(Box::new(callback)),
            ..Self::with_state(RigidBodyState::Kinematic)
        }
    }

    /// Set friction, builder style
    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction.max(0.0);
        self
    }

    /// Set elasticity (restitution), builder style
    pub fn with_elasticity(mut self, elasticity: f32) -> Self {
        self.elasticity = elasticity.clamp(0.0, 1.0);
        self
    }

    /// Set the initial linear velocity, builder style
    pub fn with_linear_velocity(mut self, velocity: Vec3) -> Self {
        self.linear_velocity = velocity;
        self
    }

    /// Finish mass properties for the given collider
    pub(crate) fn bind_collider(&mut self, collider: &Collider) {
        if let Some(density) = self.density {
            self.mass = density * collider.volume();
        }
        self.local_inertia = inertia_for(collider, self.mass);
    }

    /// Current state
    pub fn state(&self) -> RigidBodyState {
        self.state
    }

    /// True for dynamic bodies
    pub fn is_dynamic(&self) -> bool {
        self.state == RigidBodyState::Dynamic
    }

    /// Mass; zero for static and kinematic bodies
    pub fn mass(&self) -> f32 {
        if self.is_dynamic() {
            self.mass
        } else {
            0.0
        }
    }

    /// Inverse mass used by the solver
    pub fn inverse_mass(&self) -> f32 {
        if self.is_dynamic() && self.mass > 0.0 {
            1.0 / self.mass
        } else {
            0.0
        }
    }

    /// Density, if the mass was derived from one
    pub fn density(&self) -> Option<f32> {
        self.density
    }

    /// Diagonal of the inertia tensor in the body frame
    pub fn local_inertia(&self) -> Vec3 {
        self.local_inertia
    }

    /// Inverse inertia tensor in world space
    pub fn world_inverse_inertia(&self, rotation: &Quat) -> Mat3 {
        if !self.is_dynamic() {
            return Mat3::zeros();
        }
        let inv = Vec3::from_fn(|i, _| {
            let value = self.local_inertia[i];
            if value > f32::EPSILON {
                1.0 / value
            } else {
                0.0
            }
        });
        let r = rotation.to_rotation_matrix();
        r.matrix() * Mat3::from_diagonal(&inv) * r.matrix().transpose()
    }

    /// Linear velocity
    pub fn linear_velocity(&self) -> Vec3 {
        self.linear_velocity
    }

    /// Set the linear velocity and wake the body
    pub fn set_linear_velocity(&mut self, velocity: Vec3) {
        self.linear_velocity = velocity;
        self.enable();
    }

    /// Angular velocity in world space
    pub fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    /// Set the angular velocity and wake the body
    pub fn set_angular_velocity(&mut self, velocity: Vec3) {
        self.angular_velocity = velocity;
        self.enable();
    }

    /// Friction coefficient
    pub fn friction(&self) -> f32 {
        self.friction
    }

    /// Set the friction coefficient
    pub fn set_friction(&mut self, friction: f32) {
        self.friction = friction.max(0.0);
    }

    /// Restitution
    pub fn elasticity(&self) -> f32 {
        self.elasticity
    }

    /// Set the restitution, clamped to [0, 1]
    pub fn set_elasticity(&mut self, elasticity: f32) {
        self.elasticity = elasticity.clamp(0.0, 1.0);
    }

    /// Per-body linear damping; `None` uses the sector's
    pub fn linear_damping(&self) -> Option<f32> {
        self.linear_damping
    }

    /// Override the sector's linear damping
    pub fn set_linear_damping(&mut self, damping: Option<f32>) {
        self.linear_damping = damping.map(|d| d.clamp(0.0, 1.0));
    }

    /// Per-body angular damping; `None` uses the sector's
    pub fn angular_damping(&self) -> Option<f32> {
        self.angular_damping
    }

    /// Override the sector's angular damping
    pub fn set_angular_damping(&mut self, damping: Option<f32>) {
        self.angular_damping = damping.map(|d| d.clamp(0.0, 1.0));
    }

    /// Per-axis scale of angular motion
    pub fn angular_factor(&self) -> Vec3 {
        self.angular_factor
    }

    /// Restrict rotation per axis; zero locks an axis
    pub fn set_angular_factor(&mut self, factor: Vec3) {
        self.angular_factor = factor;
    }

    /// Whether sector gravity applies
    pub fn gravity_enabled(&self) -> bool {
        self.gravity_enabled
    }

    /// Opt in or out of sector gravity
    pub fn set_gravity_enabled(&mut self, enabled: bool) {
        self.gravity_enabled = enabled;
    }

    /// False while the body sleeps
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Wake the body
    pub fn enable(&mut self) {
        self.enabled = true;
        self.idle_time = 0.0;
    }

    /// Put the body to sleep, stopping it
    pub fn disable(&mut self) {
        self.enabled = false;
        self.linear_velocity = Vec3::zeros();
        self.angular_velocity = Vec3::zeros();
    }

    /// Change mass; ignored by non-dynamic bodies until they become dynamic
    pub fn set_mass(&mut self, mass: f32, collider: Option<&Collider>) {
        self.mass = mass.max(0.0);
        self.density = None;
        if let Some(collider) = collider {
            self.local_inertia = inertia_for(collider, self.mass);
        }
    }

    /// Change density, recomputing mass from the collider volume
    pub fn set_density(&mut self, density: f32, collider: &Collider) {
        self.density = Some(density.max(0.0));
        self.bind_collider(collider);
    }

    /// Accumulate a world-space force at the center of mass
    pub fn add_force(&mut self, force: Vec3) {
        self.force += force;
        self.enable();
    }

    /// Accumulate a world-space torque
    pub fn add_torque(&mut self, torque: Vec3) {
        self.torque += torque;
        self.enable();
    }

    /// Accumulate a force given in the body frame
    pub fn add_rel_force(&mut self, force: Vec3, transform: &Transform) {
        self.add_force(transform.rotation * force);
    }

    /// Accumulate a torque given in the body frame
    pub fn add_rel_torque(&mut self, torque: Vec3, transform: &Transform) {
        self.add_torque(transform.rotation * torque);
    }

    /// Accumulate a world-space force at a world-space position
    pub fn add_force_at_pos(&mut self, force: Vec3, position: Vec3, transform: &Transform) {
        self.force += force;
        self.torque += (position - transform.position).cross(&force);
        self.enable();
    }

    /// Accumulate a body-frame force at a body-frame position
    pub fn add_rel_force_at_rel_pos(&mut self, force: Vec3, position: Vec3, transform: &Transform) {
        self.add_force_at_pos(transform.rotation * force, transform.transform_point(&position), transform);
    }

    /// Clear accumulated forces and torques
    pub fn clear_forces(&mut self) {
        self.force = Vec3::zeros();
        self.torque = Vec3::zeros();
    }

    /// Apply an impulse at an offset from the center of mass
    pub(crate) fn apply_impulse(&mut self, impulse: Vec3, offset: Vec3, rotation: &Quat) {
        if !self.is_dynamic() {
            return;
        }
        self.linear_velocity += impulse * self.inverse_mass();
        let angular = self.world_inverse_inertia(rotation) * offset.cross(&impulse);
        self.angular_velocity += angular.component_mul(&self.angular_factor);
        self.enable();
    }

    pub(crate) fn take_kinematic_callback(&mut self) -> Option<Box<dyn KinematicCallback>> {
        self.kinematic_callback.take()
    }

    pub(crate) fn restore_kinematic_callback(&mut self, callback: Box<dyn KinematicCallback>) {
        self.kinematic_callback = Some(callback);
    }

    /// Install a kinematic callback
    pub fn set_kinematic_callback(&mut self, callback: impl KinematicCallback + 'static) {
        self.kinematic_callback = Some(Box::new(callback));
    }
}

/// Velocity of a body point at an offset from the center of mass
pub(crate) fn point_velocity(linear: &Vec3, angular: &Vec3, offset: &Vec3) -> Vec3 {
    linear + angular.cross(offset)
}

/// Diagonal inertia for a collider of the given mass
///
/// Boxes and spheres are exact; other shapes use their bounding box.
pub fn inertia_for(collider: &Collider, mass: f32) -> Vec3 {
    match collider {
        Collider::Sphere { radius } => Vec3::repeat(0.4 * mass * radius * radius),
        _ => {
            let h = collider.local_aabb().extents();
            let (x2, y2, z2) = (h.x * h.x, h.y * h.y, h.z * h.z);
            Vec3::new(y2 + z2, x2 + z2, x2 + y2) * (mass / 3.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_density_gives_mass_from_volume() {
        let mut body = RigidBody::with_density(100.0);
        body.bind_collider(&Collider::sphere(1.0));
        assert_relative_eq!(body.mass(), 100.0 * 4.0 / 3.0 * std::f32::consts::PI, epsilon = 1e-2);
        assert!(body.inverse_mass() > 0.0);
    }

    #[test]
    fn test_static_body_has_no_inverse_mass() {
        let mut body = RigidBody::new_static();
        body.set_mass(10.0, None);
        assert_eq!(body.inverse_mass(), 0.0);
        assert_eq!(body.world_inverse_inertia(&Quat::identity()), Mat3::zeros());
    }

    #[test]
    fn test_force_at_position_creates_torque() {
        let mut body = RigidBody::new_dynamic(1.0);
        let t = Transform::identity();
        body.add_force_at_pos(Vec3::new(0.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.0), &t);
        assert_relative_eq!(body.force, Vec3::z());
        assert_relative_eq!(body.torque, Vec3::new(0.0, -1.0, 0.0));
    }

    #[test]
    fn test_impulse_respects_angular_factor() {
        let mut body = RigidBody::new_dynamic(2.0);
        body.bind_collider(&Collider::cuboid(Vec3::repeat(0.5)));
        body.set_angular_factor(Vec3::new(0.0, 1.0, 0.0));
        body.apply_impulse(Vec3::new(0.0, 0.0, 2.0), Vec3::new(1.0, 0.0, 0.0), &Quat::identity());
        assert_relative_eq!(body.linear_velocity, Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(body.angular_velocity.x, 0.0);
        assert!(body.angular_velocity.y < 0.0);
    }

    #[test]
    fn test_disable_stops_body() {
        let mut body = RigidBody::new_dynamic(1.0).with_linear_velocity(Vec3::x());
        body.disable();
        assert!(!body.is_enabled());
        assert_eq!(body.linear_velocity(), Vec3::zeros());
        body.add_force(Vec3::y());
        assert!(body.is_enabled());
    }
}

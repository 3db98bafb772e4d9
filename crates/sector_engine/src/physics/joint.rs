//! Joints between bodies
//!
//! A joint holds a world frame and per-axis rules for the relative motion
//! of its two bodies, expressed in that frame. Each translation and rotation
//! axis is locked, limited or free. A `None` body slot attaches to the world.

use crate::foundation::math::{Quat, Transform, Vec3};

use super::{ObjectId, SectorId};

/// Flavour of a joint; decides its initial axis setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JointKind {
    /// Every axis configured by hand
    Generic6Dof,
    /// Ball joint: positions locked, rotations free
    PointToPoint,
    /// Prismatic joint along the frame Z axis
    Slide,
    /// Revolute joint about the frame Z axis
    Hinge,
    /// Limited swing about X and Y, limited twist about Z
    ConeTwist,
    /// Drags one body point to a movable world position
    Pivot,
    /// Pulls a soft body node to a point of a rigid body
    SoftLinear,
    /// Restricts the rotation of a rigid body attached to a soft body
    SoftAngular,
}

/// Constraint mode of one axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum AxisMode {
    Locked,
    Limited { min: f32, max: f32 },
    Free,
}

/// A constraint between two bodies or a body and the world
#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    kind: JointKind,
    pub(crate) bodies: [Option<ObjectId>; 2],
    transform: Transform,
    pub(crate) frames: [Transform; 2],
    trans_constraints: [bool; 3],
    rot_constraints: [bool; 3],
    min_distance: Vec3,
    max_distance: Vec3,
    min_angle: Vec3,
    max_angle: Vec3,
    bounce: Vec3,
    desired_velocity: Vec3,
    max_force: Vec3,
    spring: bool,
    linear_stiffness: Vec3,
    angular_stiffness: Vec3,
    linear_damping: Vec3,
    angular_damping: Vec3,
    linear_equilibrium: Vec3,
    angular_equilibrium: Vec3,
    breaking_impulse: f32,
    pub(crate) broken: bool,
    pub(crate) sector: Option<SectorId>,
    pub(crate) soft_vertex: Option<usize>,
}

impl Joint {
    fn with_kind(kind: JointKind, transform: Transform) -> Self {
        Self {
            kind,
            bodies: [None, None],
            transform,
            frames: [transform, transform],
            trans_constraints: [false; 3],
            rot_constraints: [false; 3],
            min_distance: Vec3::repeat(f32::NEG_INFINITY),
            max_distance: Vec3::repeat(f32::INFINITY),
            min_angle: Vec3::repeat(f32::NEG_INFINITY),
            max_angle: Vec3::repeat(f32::INFINITY),
            bounce: Vec3::zeros(),
            desired_velocity: Vec3::zeros(),
            max_force: Vec3::zeros(),
            spring: false,
            linear_stiffness: Vec3::zeros(),
            angular_stiffness: Vec3::zeros(),
            linear_damping: Vec3::zeros(),
            angular_damping: Vec3::zeros(),
            linear_equilibrium: Vec3::zeros(),
            angular_equilibrium: Vec3::zeros(),
            breaking_impulse: f32::INFINITY,
            broken: false,
            sector: None,
            soft_vertex: None,
        }
    }

    /// Joint with every axis free, configured through the setters
    pub fn generic_6dof(transform: Transform) -> Self {
        Self::with_kind(JointKind::Generic6Dof, transform)
    }

    /// Ball joint at `position`
    pub fn point_to_point(position: Vec3) -> Self {
        let mut joint = Self::with_kind(JointKind::PointToPoint, Transform::from_position(position));
        joint.trans_constraints = [true; 3];
        joint
    }

    /// Revolute joint at `position` turning about `axis`
    pub fn hinge(position: Vec3, axis: Vec3) -> Self {
        let mut joint = Self::with_kind(JointKind::Hinge, axis_frame(position, axis));
        joint.trans_constraints = [true; 3];
        joint.rot_constraints = [true, true, false];
        joint
    }

    /// Prismatic joint at `position` sliding along `axis` within `[min, max]`
    pub fn slide(position: Vec3, axis: Vec3, min: f32, max: f32) -> Self {
        let mut joint = Self::with_kind(JointKind::Slide, axis_frame(position, axis));
        joint.trans_constraints = [true, true, false];
        joint.rot_constraints = [true; 3];
        joint.min_distance.z = min;
        joint.max_distance.z = max;
        joint
    }

    /// Cone-twist joint at `position` around `axis`
    ///
    /// Swing about the two axes across `axis` is limited to `swing`, twist
    /// about `axis` to `twist`, both in radians.
    pub fn cone_twist(position: Vec3, axis: Vec3, swing: f32, twist: f32) -> Self {
        let mut joint = Self::with_kind(JointKind::ConeTwist, axis_frame(position, axis));
        joint.trans_constraints = [true; 3];
        joint.min_angle = Vec3::new(-swing, -swing, -twist);
        joint.max_angle = Vec3::new(swing, swing, twist);
        joint
    }

    /// Grab joint pulling a body point towards `position`
    pub fn pivot(position: Vec3) -> Self {
        let mut joint = Self::with_kind(JointKind::Pivot, Transform::from_position(position));
        joint.trans_constraints = [true; 3];
        joint
    }

    /// Links the soft body node nearest to `position` to a rigid body
    pub fn soft_linear(position: Vec3) -> Self {
        let mut joint = Self::with_kind(JointKind::SoftLinear, Transform::from_position(position));
        joint.trans_constraints = [true; 3];
        joint
    }

    /// Lets a rigid body attached to a soft body turn only about `axis`
    pub fn soft_angular(position: Vec3, axis: Vec3) -> Self {
        let mut joint = Self::with_kind(JointKind::SoftAngular, axis_frame(position, axis));
        joint.rot_constraints = [true, true, false];
        joint
    }

    /// Joint flavour
    pub fn kind(&self) -> JointKind {
        self.kind
    }

    /// Attached bodies; `None` is the world
    pub fn bodies(&self) -> [Option<ObjectId>; 2] {
        self.bodies
    }

    /// True when `object` is one of the attached bodies
    pub fn references(&self, object: ObjectId) -> bool {
        self.bodies.contains(&Some(object))
    }

    /// World frame at attach time
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Move the joint frame; takes effect once the joint is rebuilt
    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    /// Move the target of a pivot joint
    pub fn set_pivot_position(&mut self, position: Vec3) {
        self.transform.position = position;
        if self.bodies[1].is_none() {
            self.frames[1].position = position;
        }
    }

    /// Soft body node driven by a soft joint
    pub fn soft_vertex(&self) -> Option<usize> {
        self.soft_vertex
    }

    /// Lock (`true`) or release the translation axes
    pub fn set_trans_constraints(&mut self, x: bool, y: bool, z: bool) {
        self.trans_constraints = [x, y, z];
    }

    /// Lock (`true`) or release the rotation axes
    pub fn set_rot_constraints(&mut self, x: bool, y: bool, z: bool) {
        self.rot_constraints = [x, y, z];
    }

    /// Lower translation limits
    pub fn set_minimum_distance(&mut self, min: Vec3) {
        self.min_distance = min;
    }

    /// Upper translation limits
    pub fn set_maximum_distance(&mut self, max: Vec3) {
        self.max_distance = max;
    }

    /// Lower rotation limits, in radians
    pub fn set_minimum_angle(&mut self, min: Vec3) {
        self.min_angle = min;
    }

    /// Upper rotation limits, in radians
    pub fn set_maximum_angle(&mut self, max: Vec3) {
        self.max_angle = max;
    }

    /// Restitution at the limits, per axis
    pub fn set_bounce(&mut self, bounce: Vec3) {
        self.bounce = bounce;
    }

    /// Per-axis restitution at the limits
    pub fn bounce(&self) -> Vec3 {
        self.bounce
    }

    /// Motor target velocity
    ///
    /// Drives the rotation axes, or the translation axes of slide joints.
    pub fn set_desired_velocity(&mut self, velocity: Vec3) {
        self.desired_velocity = velocity;
    }

    /// Motor target velocity
    pub fn desired_velocity(&self) -> Vec3 {
        self.desired_velocity
    }

    /// Largest force (or torque) the motor applies, per axis
    pub fn set_max_force(&mut self, force: Vec3) {
        self.max_force = force;
    }

    /// Largest motor force, per axis
    pub fn max_force(&self) -> Vec3 {
        self.max_force
    }

    /// True when the motor drives the rotation axes
    pub fn motor_on_rotation(&self) -> bool {
        self.kind != JointKind::Slide
    }

    /// Turn the free axes into damped springs
    pub fn set_spring(&mut self, enabled: bool) {
        self.spring = enabled;
    }

    /// Whether the free axes are springs
    pub fn is_spring(&self) -> bool {
        self.spring
    }

    /// Spring stiffness of the translation axes
    pub fn set_linear_stiffness(&mut self, stiffness: Vec3) {
        self.linear_stiffness = stiffness;
    }

    /// Spring stiffness of the rotation axes
    pub fn set_angular_stiffness(&mut self, stiffness: Vec3) {
        self.angular_stiffness = stiffness;
    }

    /// Spring damping of the translation axes
    pub fn set_linear_damping(&mut self, damping: Vec3) {
        self.linear_damping = damping;
    }

    /// Spring damping of the rotation axes
    pub fn set_angular_damping(&mut self, damping: Vec3) {
        self.angular_damping = damping;
    }

    /// Offsets at which the translation springs are relaxed
    pub fn set_linear_equilibrium_point(&mut self, point: Vec3) {
        self.linear_equilibrium = point;
    }

    /// Angles at which the rotation springs are relaxed
    pub fn set_angular_equilibrium_point(&mut self, point: Vec3) {
        self.angular_equilibrium = point;
    }

    /// Impulse per substep above which the joint breaks
    pub fn set_breaking_impulse(&mut self, impulse: f32) {
        self.breaking_impulse = impulse.max(0.0);
    }

    /// Breaking threshold
    pub fn breaking_impulse(&self) -> f32 {
        self.breaking_impulse
    }

    /// True once the joint broke
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Sector the joint was added to
    pub fn sector(&self) -> Option<SectorId> {
        self.sector
    }

    /// Mode of translation axis `axis`
    pub(crate) fn linear_mode(&self, axis: usize) -> AxisMode {
        axis_mode(self.trans_constraints[axis], self.min_distance[axis], self.max_distance[axis])
    }

    /// Mode of rotation axis `axis`
    pub(crate) fn angular_mode(&self, axis: usize) -> AxisMode {
        axis_mode(self.rot_constraints[axis], self.min_angle[axis], self.max_angle[axis])
    }

    /// Spring stiffness, damping and equilibrium of an axis
    pub(crate) fn spring_params(&self, angular: bool, axis: usize) -> (f32, f32, f32) {
        if angular {
            (
                self.angular_stiffness[axis],
                self.angular_damping[axis],
                self.angular_equilibrium[axis],
            )
        } else {
            (
                self.linear_stiffness[axis],
                self.linear_damping[axis],
                self.linear_equilibrium[axis],
            )
        }
    }

    /// Bind the joint frame to the current body transforms
    ///
    /// `None` entries are world slots and keep the world frame.
    pub(crate) fn bind(&mut self, transforms: [Option<Transform>; 2]) {
        for (frame, body) in self.frames.iter_mut().zip(transforms) {
            *frame = match body {
                Some(body) => body.inverse().combine(&self.transform),
                None => self.transform,
            };
        }
        self.broken = false;
    }
}

fn axis_mode(locked: bool, min: f32, max: f32) -> AxisMode {
    if locked {
        AxisMode::Locked
    } else if min <= max {
        AxisMode::Limited { min, max }
    } else {
        AxisMode::Free
    }
}

/// Frame at `position` whose Z axis is `axis`
fn axis_frame(position: Vec3, axis: Vec3) -> Transform {
    let rotation = Quat::rotation_between(&Vec3::z(), &axis).unwrap_or_else(|| {
        if axis.z < 0.0 {
            Quat::from_axis_angle(&Vec3::x_axis(), std::f32::consts::PI)
        } else {
            Quat::identity()
        }
    });
    Transform::from_position_rotation(position, rotation)
}

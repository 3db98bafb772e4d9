//! Contact generation and the sequential impulse solver
//!
//! Contacts come from probing one shape's sample points against the other
//! shape's signed distance. Bodies are copied into flat [`SolverBody`]
//! records, constraints are iterated, and the velocities are written back
//! by the caller.

use crate::foundation::math::{Mat3, Quat, Transform, Vec3};

use super::collider::Collider;
use super::joint::{AxisMode, Joint};
use super::rigid_body::point_velocity;
use super::soft_body::{SoftBody, NODE_RADIUS};

/// Fraction of the penetration removed per substep
const BAUMGARTE: f32 = 0.2;

/// Penetration tolerated without positional correction
const SLOP: f32 = 0.01;

/// Approach speed below which contacts do not bounce
const BOUNCE_THRESHOLD: f32 = 1.0;

/// One contact between two shapes, before objects are attached to it
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ContactPoint {
    pub position_on_a: Vec3,
    pub position_on_b: Vec3,
    /// Points from B towards A
    pub normal_on_b: Vec3,
    /// Negative while the shapes are still apart
    pub penetration: f32,
}

/// Contacts between two placed colliders
///
/// Shapes closer than `margin` also report a contact, with a negative
/// penetration equal to the gap.
pub(crate) fn shape_contacts(a: &Collider, ta: &Transform, b: &Collider, tb: &Transform, margin: f32) -> Vec<ContactPoint> {
    let mut contacts = Vec::new();
    for (probe, radius) in a.contact_probes() {
        let point = ta.transform_point(&probe);
        if let Some((distance, normal)) = probe_distance(b, tb, &point) {
            if distance < radius + margin {
                contacts.push(ContactPoint {
                    position_on_a: point - normal * radius,
                    position_on_b: point - normal * distance,
                    normal_on_b: normal,
                    penetration: radius - distance,
                });
            }
        }
    }
    for (probe, radius) in b.contact_probes() {
        let point = tb.transform_point(&probe);
        if let Some((distance, normal)) = probe_distance(a, ta, &point) {
            if distance < radius + margin {
                contacts.push(ContactPoint {
                    position_on_a: point - normal * distance,
                    position_on_b: point - normal * radius,
                    normal_on_b: -normal,
                    penetration: radius - distance,
                });
            }
        }
    }
    contacts
}

/// Contacts of soft body nodes (as A) against a placed collider (as B)
pub(crate) fn soft_contacts(soft: &SoftBody, b: &Collider, tb: &Transform, margin: f32) -> Vec<ContactPoint> {
    soft.nodes()
        .iter()
        .filter_map(|node| {
            let (distance, normal) = probe_distance(b, tb, &node.position)?;
            (distance < NODE_RADIUS + margin).then(|| ContactPoint {
                position_on_a: node.position - normal * NODE_RADIUS,
                position_on_b: node.position - normal * distance,
                normal_on_b: normal,
                penetration: NODE_RADIUS - distance,
            })
        })
        .collect()
}

/// Signed distance and world normal of `shape` at a world point
fn probe_distance(shape: &Collider, transform: &Transform, point: &Vec3) -> Option<(f32, Vec3)> {
    let (distance, normal) = shape.signed_distance(&transform.inverse_transform_point(point));
    distance.is_finite().then(|| (distance, transform.rotation * normal))
}

/// Deepest of a set of contacts
pub(crate) fn deepest(contacts: &[ContactPoint]) -> Option<ContactPoint> {
    contacts.iter().copied().max_by(|x, y| x.penetration.total_cmp(&y.penetration))
}

/// Flat body state used while iterating constraints
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SolverBody {
    pub position: Vec3,
    pub rotation: Quat,
    pub linear: Vec3,
    pub angular: Vec3,
    pub inverse_mass: f32,
    pub inverse_inertia: Mat3,
    pub angular_factor: Vec3,
}

impl SolverBody {
    /// Immovable body at `transform` moving with the given velocities
    pub fn fixed(transform: &Transform, linear: Vec3, angular: Vec3) -> Self {
        Self {
            position: transform.position,
            rotation: transform.rotation,
            linear,
            angular,
            inverse_mass: 0.0,
            inverse_inertia: Mat3::zeros(),
            angular_factor: Vec3::zeros(),
        }
    }

    /// The world
    pub fn world() -> Self {
        Self::fixed(&Transform::identity(), Vec3::zeros(), Vec3::zeros())
    }

    pub fn transform(&self) -> Transform {
        Transform::from_position_rotation(self.position, self.rotation)
    }

    fn velocity_at(&self, offset: &Vec3) -> Vec3 {
        point_velocity(&self.linear, &self.angular, offset)
    }

    fn apply_impulse(&mut self, impulse: &Vec3, offset: &Vec3) {
        self.linear += impulse * self.inverse_mass;
        self.apply_angular_impulse(&offset.cross(impulse));
    }

    fn apply_angular_impulse(&mut self, impulse: &Vec3) {
        self.angular += (self.inverse_inertia * impulse).component_mul(&self.angular_factor);
    }

    /// Inverse effective mass along `direction` at `offset`
    fn linear_response(&self, offset: &Vec3, direction: &Vec3) -> f32 {
        let arm = offset.cross(direction);
        self.inverse_mass + arm.dot(&(self.inverse_inertia * arm))
    }

    fn angular_response(&self, axis: &Vec3) -> f32 {
        axis.dot(&(self.inverse_inertia * axis))
    }

    /// Advance the position and orientation by `dt`
    pub fn integrate(&mut self, dt: f32) {
        self.position += self.linear * dt;
        self.rotation = Quat::from_scaled_axis(self.angular * dt) * self.rotation;
        self.rotation.renormalize();
    }
}

/// Contact row between two solver bodies
#[derive(Debug, Clone)]
pub(crate) struct ContactConstraint {
    pub a: usize,
    pub b: usize,
    pub point: Vec3,
    pub normal: Vec3,
    pub penetration: f32,
    pub friction: f32,
    pub restitution: f32,
    tangents: [Vec3; 2],
    bounce_velocity: f32,
    normal_impulse: f32,
    tangent_impulse: [f32; 2],
}

impl ContactConstraint {
    pub fn new(a: usize, b: usize, contact: &ContactPoint, friction: f32, restitution: f32) -> Self {
        let normal = contact.normal_on_b;
        let t1 = crate::foundation::math::utils::any_perpendicular(&normal);
        let t2 = normal.cross(&t1);
        Self {
            a,
            b,
            point: (contact.position_on_a + contact.position_on_b) * 0.5,
            normal,
            penetration: contact.penetration,
            friction,
            restitution,
            tangents: [t1, t2],
            bounce_velocity: 0.0,
            normal_impulse: 0.0,
            tangent_impulse: [0.0; 2],
        }
    }
}

/// Relative velocity of A with respect to B at a world point
fn relative_velocity(bodies: &[SolverBody], a: usize, b: usize, point: &Vec3) -> Vec3 {
    let (ba, bb) = (&bodies[a], &bodies[b]);
    ba.velocity_at(&(point - ba.position)) - bb.velocity_at(&(point - bb.position))
}

/// Apply `impulse` to A and its opposite to B at a world point
fn apply_pair(bodies: &mut [SolverBody], a: usize, b: usize, point: &Vec3, impulse: &Vec3) {
    let offset_a = point - bodies[a].position;
    bodies[a].apply_impulse(impulse, &offset_a);
    let offset_b = point - bodies[b].position;
    bodies[b].apply_impulse(&-impulse, &offset_b);
}

/// Iterate contact rows; joints are solved in the same iterations
pub(crate) fn solve(
    bodies: &mut [SolverBody],
    contacts: &mut [ContactConstraint],
    joints: &mut [JointConstraint<'_>],
    iterations: usize,
    dt: f32,
) {
    for c in contacts.iter_mut() {
        let approach = relative_velocity(bodies, c.a, c.b, &c.point).dot(&c.normal);
        c.bounce_velocity = if approach < -BOUNCE_THRESHOLD { -c.restitution * approach } else { 0.0 };
    }
    for joint in joints.iter_mut() {
        joint.apply_springs(bodies, dt);
    }

    for _ in 0..iterations.max(1) {
        for joint in joints.iter_mut() {
            joint.solve(bodies, dt);
        }
        for c in contacts.iter_mut() {
            solve_contact(bodies, c, dt);
        }
    }
}

fn solve_contact(bodies: &mut [SolverBody], c: &mut ContactConstraint, dt: f32) {
    let (ra, rb) = (c.point - bodies[c.a].position, c.point - bodies[c.b].position);
    let k = bodies[c.a].linear_response(&ra, &c.normal) + bodies[c.b].linear_response(&rb, &c.normal);
    if k <= f32::EPSILON {
        return;
    }
    let vn = relative_velocity(bodies, c.a, c.b, &c.point).dot(&c.normal);
    // A gap may close within this substep but no further
    let bias = if c.penetration > 0.0 {
        BAUMGARTE / dt * (c.penetration - SLOP).max(0.0)
    } else {
        c.penetration / dt
    };
    let target = bias.max(c.bounce_velocity);
    let delta = (target - vn) / k;
    let accumulated = (c.normal_impulse + delta).max(0.0);
    let applied = accumulated - c.normal_impulse;
    c.normal_impulse = accumulated;
    apply_pair(bodies, c.a, c.b, &c.point, &(c.normal * applied));

    let limit = c.friction * c.normal_impulse;
    for i in 0..2 {
        let tangent = c.tangents[i];
        let kt = bodies[c.a].linear_response(&ra, &tangent) + bodies[c.b].linear_response(&rb, &tangent);
        if kt <= f32::EPSILON {
            continue;
        }
        let vt = relative_velocity(bodies, c.a, c.b, &c.point).dot(&tangent);
        let accumulated = (c.tangent_impulse[i] - vt / kt).clamp(-limit, limit);
        let applied = accumulated - c.tangent_impulse[i];
        c.tangent_impulse[i] = accumulated;
        apply_pair(bodies, c.a, c.b, &c.point, &(tangent * applied));
    }
}

/// Joint rows between two solver bodies
pub(crate) struct JointConstraint<'a> {
    pub joint: &'a Joint,
    pub a: usize,
    pub b: usize,
    motor_impulse: [f32; 6],
    /// Sum of the impulses applied this substep
    pub total_impulse: f32,
}

/// Geometry of a joint for the current body placement
struct JointFrame {
    anchor_a: Vec3,
    anchor_b: Vec3,
    axes: [Vec3; 3],
    offset: Vec3,
    angles: Vec3,
}

impl<'a> JointConstraint<'a> {
    pub fn new(joint: &'a Joint, a: usize, b: usize) -> Self {
        Self {
            joint,
            a,
            b,
            motor_impulse: [0.0; 6],
            total_impulse: 0.0,
        }
    }

    fn frame(&self, bodies: &[SolverBody]) -> JointFrame {
        let frame_a = bodies[self.a].transform().combine(&self.joint.frames[0]);
        let frame_b = bodies[self.b].transform().combine(&self.joint.frames[1]);
        let relative = frame_a.rotation.inverse() * frame_b.rotation;
        JointFrame {
            anchor_a: frame_a.position,
            anchor_b: frame_b.position,
            axes: frame_a.axes(),
            offset: frame_a.rotation.inverse() * (frame_b.position - frame_a.position),
            angles: relative.scaled_axis(),
        }
    }

    /// Spring forces on the axes that are not locked, once per substep
    fn apply_springs(&mut self, bodies: &mut [SolverBody], dt: f32) {
        if !self.joint.is_spring() {
            return;
        }
        let frame = self.frame(bodies);
        for (axis, direction) in frame.axes.iter().enumerate() {
            if self.joint.linear_mode(axis) != AxisMode::Locked {
                let (stiffness, damping, rest) = self.joint.spring_params(false, axis);
                let point = frame.anchor_b;
                let speed = -relative_velocity(bodies, self.a, self.b, &point).dot(direction);
                let force = -stiffness * (frame.offset[axis] - rest) - damping * speed;
                apply_pair(bodies, self.b, self.a, &point, &(direction * (force * dt)));
            }
            if self.joint.angular_mode(axis) != AxisMode::Locked {
                let (stiffness, damping, rest) = self.joint.spring_params(true, axis);
                let speed = (bodies[self.b].angular - bodies[self.a].angular).dot(direction);
                let torque = -stiffness * (frame.angles[axis] - rest) - damping * speed;
                let impulse = direction * (torque * dt);
                bodies[self.b].apply_angular_impulse(&impulse);
                bodies[self.a].apply_angular_impulse(&-impulse);
            }
        }
    }

    fn solve(&mut self, bodies: &mut [SolverBody], dt: f32) {
        let frame = self.frame(bodies);
        let bounce = self.joint.bounce();
        let motor_linear = !self.joint.motor_on_rotation();
        for (axis, direction) in frame.axes.iter().enumerate() {
            self.solve_linear(bodies, &frame, axis, direction, bounce[axis], dt, motor_linear);
            self.solve_angular(bodies, &frame, axis, direction, bounce[axis], dt, !motor_linear);
        }
    }

    fn solve_linear(
        &mut self,
        bodies: &mut [SolverBody],
        frame: &JointFrame,
        axis: usize,
        direction: &Vec3,
        bounce: f32,
        dt: f32,
        motor: bool,
    ) {
        let (ra, rb) = (frame.anchor_a - bodies[self.a].position, frame.anchor_b - bodies[self.b].position);
        let k = bodies[self.a].linear_response(&ra, direction) + bodies[self.b].linear_response(&rb, direction);
        if k <= f32::EPSILON {
            return;
        }
        // Speed of B's anchor relative to A's along the axis
        let speed = bodies[self.b].velocity_at(&rb).dot(direction) - bodies[self.a].velocity_at(&ra).dot(direction);
        let mode = self.joint.linear_mode(axis);
        if let Some(lambda) = limit_impulse(mode, frame.offset[axis], speed, bounce, k, dt) {
            self.push_linear(bodies, &ra, &rb, direction, lambda);
        } else if motor && self.joint.max_force()[axis] > 0.0 {
            let target = self.joint.desired_velocity()[axis];
            let bound = self.joint.max_force()[axis] * dt;
            let slot = &mut self.motor_impulse[axis];
            let accumulated = (*slot - (speed - target) / k).clamp(-bound, bound);
            let lambda = accumulated - *slot;
            *slot = accumulated;
            self.push_linear(bodies, &ra, &rb, direction, lambda);
        }
    }

    fn push_linear(&mut self, bodies: &mut [SolverBody], ra: &Vec3, rb: &Vec3, direction: &Vec3, lambda: f32) {
        let impulse = direction * lambda;
        bodies[self.b].apply_impulse(&impulse, rb);
        bodies[self.a].apply_impulse(&-impulse, ra);
        self.total_impulse += lambda.abs();
    }

    fn solve_angular(
        &mut self,
        bodies: &mut [SolverBody],
        frame: &JointFrame,
        axis: usize,
        direction: &Vec3,
        bounce: f32,
        dt: f32,
        motor: bool,
    ) {
        let k = bodies[self.a].angular_response(direction) + bodies[self.b].angular_response(direction);
        if k <= f32::EPSILON {
            return;
        }
        let speed = (bodies[self.b].angular - bodies[self.a].angular).dot(direction);
        let mode = self.joint.angular_mode(axis);
        let lambda = if let Some(lambda) = limit_impulse(mode, frame.angles[axis], speed, bounce, k, dt) {
            lambda
        } else if motor && self.joint.max_force()[axis] > 0.0 {
            let target = self.joint.desired_velocity()[axis];
            let bound = self.joint.max_force()[axis] * dt;
            let slot = &mut self.motor_impulse[3 + axis];
            let accumulated = (*slot - (speed - target) / k).clamp(-bound, bound);
            let lambda = accumulated - *slot;
            *slot = accumulated;
            lambda
        } else {
            return;
        };
        let impulse = direction * lambda;
        bodies[self.b].apply_angular_impulse(&impulse);
        bodies[self.a].apply_angular_impulse(&-impulse);
        self.total_impulse += lambda.abs();
    }
}

/// Impulse enforcing a locked or limited axis, `None` when inactive
fn limit_impulse(mode: AxisMode, position: f32, speed: f32, bounce: f32, k: f32, dt: f32) -> Option<f32> {
    let bias = BAUMGARTE / dt;
    match mode {
        AxisMode::Free => None,
        AxisMode::Locked => Some(-(speed + bias * position) / k),
        AxisMode::Limited { min, max } => {
            if position < min {
                let target = (-bounce * speed).max(0.0);
                Some(((target - speed - bias * (position - min)) / k).max(0.0))
            } else if position > max {
                let target = (-bounce * speed).min(0.0);
                Some(((target - speed - bias * (position - max)) / k).min(0.0))
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sphere_on_plane_contact() {
        let sphere = Collider::sphere(1.0);
        let plane = Collider::plane(Vec3::y(), 0.0);
        let ts = Transform::from_position(Vec3::new(0.0, 0.9, 0.0));
        let contacts = shape_contacts(&sphere, &ts, &plane, &Transform::identity(), 0.0);
        assert_eq!(contacts.len(), 1);
        let c = contacts[0];
        assert_relative_eq!(c.normal_on_b, Vec3::y());
        assert_relative_eq!(c.penetration, 0.1, epsilon = 1e-6);
        assert_relative_eq!(c.position_on_b, Vec3::zeros(), epsilon = 1e-6);
        assert_relative_eq!(c.position_on_a, Vec3::new(0.0, -0.1, 0.0), epsilon = 1e-6);

        let apart = Transform::from_position(Vec3::new(0.0, 1.5, 0.0));
        assert!(shape_contacts(&sphere, &apart, &plane, &Transform::identity(), 0.0).is_empty());
        assert_eq!(shape_contacts(&sphere, &apart, &plane, &Transform::identity(), 0.6).len(), 1);
    }

    #[test]
    fn test_small_box_on_box_finds_bottom_corners() {
        let small = Collider::cuboid(Vec3::repeat(0.25));
        let cube = Collider::cuboid(Vec3::repeat(0.5));
        let top = Transform::from_position(Vec3::new(0.0, 0.7, 0.0));
        let contacts = shape_contacts(&small, &top, &cube, &Transform::identity(), 0.0);
        assert!(contacts.len() >= 4);
        for c in &contacts {
            assert_relative_eq!(c.normal_on_b.y.abs(), 1.0, epsilon = 1e-5);
        }
        let deepest = deepest(&contacts).unwrap();
        assert_relative_eq!(deepest.penetration, 0.05, epsilon = 1e-5);
    }

    #[test]
    fn test_contact_stops_approach() {
        let mut bodies = vec![
            SolverBody {
                inverse_mass: 1.0,
                angular_factor: Vec3::repeat(1.0),
                ..SolverBody::fixed(&Transform::from_position(Vec3::new(0.0, 1.0, 0.0)), Vec3::new(0.0, -5.0, 0.0), Vec3::zeros())
            },
            SolverBody::world(),
        ];
        let contact = ContactPoint {
            position_on_a: Vec3::zeros(),
            position_on_b: Vec3::zeros(),
            normal_on_b: Vec3::y(),
            penetration: 0.0,
        };
        let mut rows = vec![ContactConstraint::new(0, 1, &contact, 0.5, 0.0)];
        solve(&mut bodies, &mut rows, &mut [], 10, 1.0 / 60.0);
        assert_relative_eq!(bodies[0].linear.y, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_elastic_contact_bounces() {
        let mut bodies = vec![
            SolverBody {
                inverse_mass: 1.0,
                ..SolverBody::fixed(&Transform::identity(), Vec3::new(0.0, -4.0, 0.0), Vec3::zeros())
            },
            SolverBody::world(),
        ];
        let contact = ContactPoint {
            position_on_a: Vec3::zeros(),
            position_on_b: Vec3::zeros(),
            normal_on_b: Vec3::y(),
            penetration: 0.0,
        };
        let mut rows = vec![ContactConstraint::new(0, 1, &contact, 0.0, 1.0)];
        solve(&mut bodies, &mut rows, &mut [], 4, 1.0 / 60.0);
        assert_relative_eq!(bodies[0].linear.y, 4.0, epsilon = 1e-4);
    }

    #[test]
    fn test_point_to_point_joint_holds_bodies_together() {
        let mut joint = Joint::point_to_point(Vec3::zeros());
        let ta = Transform::from_position(Vec3::new(-1.0, 0.0, 0.0));
        joint.bind([Some(ta), None]);
        let mut bodies = vec![
            SolverBody::world(),
            SolverBody {
                inverse_mass: 1.0,
                inverse_inertia: Mat3::identity(),
                angular_factor: Vec3::repeat(1.0),
                ..SolverBody::fixed(&ta, Vec3::new(0.0, -3.0, 0.0), Vec3::zeros())
            },
        ];
        let mut rows = vec![JointConstraint::new(&joint, 1, 0)];
        solve(&mut bodies, &mut [], &mut rows, 20, 1.0 / 60.0);
        // The anchor point of body A stops moving
        let anchor = point_velocity(&bodies[1].linear, &bodies[1].angular, &Vec3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(anchor.norm(), 0.0, epsilon = 1e-3);
        assert!(rows[0].total_impulse > 0.0);
    }
}

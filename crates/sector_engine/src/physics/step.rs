//! Stepping sectors
//!
//! One step of a sector runs a fixed pipeline:
//!
//! 1. animated anchor controls are read once
//! 2. each substep moves kinematic bodies, applies forces, drives vehicles,
//!    solves contacts and joints, integrates rigid bodies, projects soft
//!    bodies and moves actors
//! 3. objects that passed through a portal change sector
//! 4. the broad phase is refreshed
//! 5. contact lists are filled and collision callbacks run
//! 6. movables and cameras receive the new transforms
//!
//! Vehicle engine and brake inputs only last for the step they were given
//! in.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, info, warn};
use slotmap::SlotMap;

use crate::foundation::math::{Quat, Transform, Vec3};

use super::actor::up_vector;
use super::joint::JointKind;
use super::object::{CollisionData, CollisionObject, CollisionObjectType, ObjectKind};
use super::query::{cast_ray, collision_data, object_contacts};
use super::rigid_body::RigidBodyState;
use super::sector::CollisionSector;
use super::soft_body::{Obstacle, SoftStepParams};
use super::solver::{deepest, shape_contacts, solve, ContactConstraint, ContactPoint, JointConstraint, SolverBody};
use super::vehicle::Vehicle;
use super::{JointId, ObjectId, PhysicsError, PhysicsSystem, SectorId};

/// Shapes this close already produce contact constraints
const CONTACT_MARGIN: f32 = 0.02;

/// Growth of an object's box when looking for pair candidates
const BROAD_PHASE_MARGIN: f32 = 0.05;

/// Gap under which separated shapes are still reported as touching
const REPORT_TOLERANCE: f32 = 0.01;

/// Gap under which an actor feels the surface next to it
const ACTOR_MARGIN: f32 = 0.02;

/// Default friction of objects without a material
const DEFAULT_FRICTION: f32 = 0.5;

/// Sector parameters read once per substep
struct StepParams {
    gravity: Vec3,
    linear_damping: f32,
    angular_damping: f32,
    iterations: usize,
    soft_bodies: bool,
    anchor_max_drag: f32,
    auto_disable: (f32, f32, f32),
}

impl StepParams {
    fn of(sector: &CollisionSector) -> Self {
        Self {
            gravity: sector.gravity(),
            linear_damping: sector.linear_damping(),
            angular_damping: sector.angular_damping(),
            iterations: sector.step_parameters().2,
            soft_bodies: sector.soft_bodies_enabled(),
            anchor_max_drag: sector.anchor_max_drag(),
            auto_disable: sector.auto_disable_params(),
        }
    }
}

/// Solver bodies of one substep; index 0 is the world
struct Island {
    bodies: Vec<SolverBody>,
    index: HashMap<ObjectId, usize>,
}

impl Island {
    fn new() -> Self {
        Self {
            bodies: vec![SolverBody::world()],
            index: HashMap::new(),
        }
    }

    /// Solver index of an object, adding it on first use
    fn index(&mut self, objects: &SlotMap<ObjectId, CollisionObject>, id: ObjectId) -> usize {
        if let Some(index) = self.index.get(&id) {
            return *index;
        }
        let Some(object) = objects.get(id) else {
            return 0;
        };
        let transform = &object.transform;
        let body = match &object.kind {
            ObjectKind::Rigid(body) if body.is_dynamic() && body.is_enabled() => SolverBody {
                position: transform.position,
                rotation: transform.rotation,
                linear: body.linear_velocity(),
                angular: body.angular_velocity(),
                inverse_mass: body.inverse_mass(),
                inverse_inertia: body.world_inverse_inertia(&transform.rotation),
                angular_factor: body.angular_factor(),
            },
            ObjectKind::Rigid(body) => SolverBody::fixed(transform, body.linear_velocity(), body.angular_velocity()),
            ObjectKind::Actor(actor) => SolverBody::fixed(transform, actor.velocity(), Vec3::zeros()),
            _ => SolverBody::fixed(transform, Vec3::zeros(), Vec3::zeros()),
        };
        self.bodies.push(body);
        let index = self.bodies.len() - 1;
        self.index.insert(id, index);
        index
    }
}

/// Awake dynamic rigid body
fn is_active_body(object: &CollisionObject) -> bool {
    matches!(&object.kind, ObjectKind::Rigid(body) if body.is_dynamic() && body.is_enabled())
}

/// Objects that push rigid bodies back
fn is_solid(object: &CollisionObject) -> bool {
    !matches!(object.kind, ObjectKind::Ghost | ObjectKind::Soft(_))
}

/// Friction and elasticity of an object
fn material(object: &CollisionObject) -> (f32, f32) {
    match &object.kind {
        ObjectKind::Rigid(body) => (body.friction(), body.elasticity()),
        ObjectKind::Soft(body) => (body.material().friction, 0.0),
        _ => (DEFAULT_FRICTION, 0.0),
    }
}

/// Objects allowed through portals
fn can_cross(object: &CollisionObject) -> bool {
    match &object.kind {
        ObjectKind::Actor(_) => true,
        ObjectKind::Rigid(body) => body.is_dynamic(),
        ObjectKind::Soft(body) => body.anchor_count() == 0,
        ObjectKind::Simple | ObjectKind::Ghost => false,
    }
}

impl PhysicsSystem {
    /// Step every sector by `duration_ms` milliseconds scaled by the
    /// simulation speed
    pub fn step_all(&mut self, duration_ms: f32) -> Result<(), PhysicsError> {
        let dt = duration_ms * 0.001 * self.simulation_speed();
        let sectors: Vec<SectorId> = self.sectors.keys().collect();
        for sector in sectors {
            self.step(sector, dt)?;
        }
        Ok(())
    }

    /// Advance a sector by exactly `dt` seconds
    pub fn step(&mut self, sector: SectorId, dt: f32) -> Result<(), PhysicsError> {
        let (count, length) = self.sector(sector)?.substeps(dt);
        if dt <= 0.0 || !dt.is_finite() {
            return Ok(());
        }

        let members = self.sector(sector)?.objects.clone();

        for id in &members {
            if let Some(soft) = self.objects.get_mut(*id).and_then(CollisionObject::as_soft_body_mut) {
                soft.poll_animated_anchors();
            }
        }
        let start: Vec<(ObjectId, Vec3)> = members
            .iter()
            .filter_map(|id| self.objects.get(*id).map(|o| (*id, o.position())))
            .collect();

        let mut reports = Vec::new();
        for _ in 0..count {
            reports = self.substep(sector, length)?;
        }

        self.cross_portals(sector, &start)?;
        for id in self.sector(sector)?.objects.clone() {
            self.refresh_tree_entry(id);
        }
        self.report_contacts(sector, &members, reports);

        for id in &members {
            if let Some(object) = self.objects.get_mut(*id) {
                object.sync_sinks();
            }
        }
        for vehicle in self.sector(sector)?.vehicles.clone() {
            if let Some(vehicle) = self.vehicles.get_mut(vehicle) {
                vehicle.reset_inputs();
            }
        }
        Ok(())
    }

    /// One substep; returns the contacts found
    fn substep(&mut self, sector: SectorId, h: f32) -> Result<Vec<CollisionData>, PhysicsError> {
        let params = StepParams::of(self.sector(sector)?);
        let members = self.sector(sector)?.objects.clone();

        self.move_kinematic_bodies(&members, h);
        self.apply_forces(&members, &params, h);
        self.drive_vehicles(sector, h);
        for id in &members {
            self.refresh_tree_entry(*id);
        }

        let touching: Vec<(ObjectId, ObjectId, Vec<ContactPoint>)> = self
            .find_pairs(sector, &members)
            .into_iter()
            .filter_map(|(a, b)| {
                let contacts = object_contacts(self.objects.get(a)?, self.objects.get(b)?, CONTACT_MARGIN);
                (!contacts.is_empty()).then_some((a, b, contacts))
            })
            .collect();
        self.wake_touched_bodies(&touching);

        let mut island = Island::new();
        for id in &members {
            if self.objects.get(*id).is_some_and(is_active_body) {
                island.index(&self.objects, *id);
            }
        }

        let mut reports = Vec::new();
        let mut rows = Vec::new();
        for (a, b, contacts) in &touching {
            reports.extend(
                contacts
                    .iter()
                    .filter(|c| c.penetration >= -REPORT_TOLERANCE)
                    .map(|c| collision_data(*a, *b, c)),
            );
            let (Some(oa), Some(ob)) = (self.objects.get(*a), self.objects.get(*b)) else {
                continue;
            };
            if !(is_solid(oa) && is_solid(ob)) || !(is_active_body(oa) || is_active_body(ob)) {
                continue;
            }
            let ((fa, ea), (fb, eb)) = (material(oa), material(ob));
            let (ia, ib) = (island.index(&self.objects, *a), island.index(&self.objects, *b));
            rows.extend(contacts.iter().map(|c| ContactConstraint::new(ia, ib, c, fa * fb, ea * eb)));
        }

        self.solve_island(sector, &mut island, &mut rows, params.iterations, h)?;
        self.integrate(&mut island, h);

        if params.soft_bodies {
            self.simulate_soft_bodies(sector, &members, &params, h);
        }
        self.move_actors(sector, &members, &params, h);
        self.auto_disable(&members, &params, h);
        Ok(reports)
    }

    fn move_kinematic_bodies(&mut self, members: &[ObjectId], h: f32) {
        for id in members {
            let Some(CollisionObject {
                kind: ObjectKind::Rigid(body),
                transform,
                ..
            }) = self.objects.get_mut(*id)
            else {
                continue;
            };
            if body.state() != RigidBodyState::Kinematic {
                continue;
            }
            if let Some(mut callback) = body.take_kinematic_callback() {
                let target = callback.body_transform(*id);
                body.restore_kinematic_callback(callback);
                body.linear_velocity = (target.position - transform.position) / h;
                body.angular_velocity = (target.rotation * transform.rotation.inverse()).scaled_axis() / h;
                *transform = target;
            } else {
                transform.position += body.linear_velocity * h;
                transform.rotation = Quat::from_scaled_axis(body.angular_velocity * h) * transform.rotation;
            }
        }
    }

    fn apply_forces(&mut self, members: &[ObjectId], params: &StepParams, h: f32) {
        for id in members {
            let Some(CollisionObject {
                kind: ObjectKind::Rigid(body),
                transform,
                ..
            }) = self.objects.get_mut(*id)
            else {
                continue;
            };
            if !body.is_dynamic() || !body.is_enabled() {
                body.clear_forces();
                continue;
            }
            if body.gravity_enabled() {
                body.linear_velocity += params.gravity * h;
            }
            body.linear_velocity += body.force * (body.inverse_mass() * h);
            let spin = body.world_inverse_inertia(&transform.rotation) * body.torque * h;
            body.angular_velocity += spin.component_mul(&body.angular_factor);

            let linear = body.linear_damping().unwrap_or(params.linear_damping);
            let angular = body.angular_damping().unwrap_or(params.angular_damping);
            body.linear_velocity *= (1.0 - linear).powf(h);
            body.angular_velocity *= (1.0 - angular).powf(h);
            body.clear_forces();
        }
    }

    fn drive_vehicles(&mut self, sector: SectorId, h: f32) {
        let Some(vehicles) = self.sectors.get(sector).map(|s| s.vehicles.clone()) else {
            return;
        };
        for id in vehicles {
            let Some(chassis) = self.vehicles.get(id).map(Vehicle::chassis) else {
                continue;
            };
            let Some(object) = self.objects.get_mut(chassis) else {
                continue;
            };
            let transform = object.transform;
            let mut kind = std::mem::replace(&mut object.kind, ObjectKind::Simple);
            if let (ObjectKind::Rigid(body), Some(vehicle), Some(target)) =
                (&mut kind, self.vehicles.get_mut(id), self.sectors.get_mut(sector))
            {
                let objects = &self.objects;
                vehicle.apply_wheel_forces(body, &transform, h, |ray, reach| {
                    cast_ray(objects, &mut target.broad_phase, ray, reach, |other, _| other != chassis)
                        .map(|hit| (hit.distance, hit.normal))
                });
            }
            if let Some(object) = self.objects.get_mut(chassis) {
                object.kind = kind;
            }
        }
    }

    /// Candidate pairs whose boxes overlap and whose groups collide
    ///
    /// Only moving objects and ghosts look for partners.
    fn find_pairs(&mut self, sector: SectorId, members: &[ObjectId]) -> BTreeSet<(ObjectId, ObjectId)> {
        let mut pairs = BTreeSet::new();
        let Some(target) = self.sectors.get_mut(sector) else {
            return pairs;
        };
        for id in members {
            let Some(object) = self.objects.get(*id) else {
                continue;
            };
            let sleeping = matches!(&object.kind, ObjectKind::Rigid(body) if !body.is_enabled());
            if sleeping || !(object.is_dynamic() || object.object_type() == CollisionObjectType::Ghost) {
                continue;
            }
            let Some(aabb) = object.world_aabb() else {
                continue;
            };
            for child in target.broad_phase.query_box(&aabb.inflated(BROAD_PHASE_MARGIN)) {
                let Some(&other_id) = target.broad_phase.object(child) else {
                    continue;
                };
                if other_id == *id {
                    continue;
                }
                let Some(other) = self.objects.get(other_id) else {
                    continue;
                };
                if self.groups.group_collision(object.group(), other.group()) {
                    pairs.insert(if *id < other_id { (*id, other_id) } else { (other_id, *id) });
                }
            }
        }
        pairs
    }

    /// Wake sleeping bodies touched by awake ones
    fn wake_touched_bodies(&mut self, touching: &[(ObjectId, ObjectId, Vec<ContactPoint>)]) {
        for (a, b, _) in touching {
            for (this, other) in [(*a, *b), (*b, *a)] {
                if !self.objects.get(other).is_some_and(is_active_body) {
                    continue;
                }
                if let Some(body) = self.objects.get_mut(this).and_then(CollisionObject::as_rigid_body_mut) {
                    if body.is_dynamic() && !body.is_enabled() {
                        body.enable();
                        debug!("Body {:?} woken by {:?}", this, other);
                    }
                }
            }
        }
    }

    /// Solve contacts and the sector's rigid joints; joints pushed past
    /// their breaking impulse are marked broken
    fn solve_island(
        &mut self,
        sector: SectorId,
        island: &mut Island,
        rows: &mut [ContactConstraint],
        iterations: usize,
        h: f32,
    ) -> Result<(), PhysicsError> {
        let mut bound = Vec::new();
        for id in self.sector(sector)?.joints.clone() {
            let Some(joint) = self.joints.get(id) else {
                continue;
            };
            if joint.is_broken() || joint.kind() == JointKind::SoftLinear {
                continue;
            }
            let objects = &self.objects;
            let [a, b] = joint.bodies.map(|slot| {
                slot.filter(|body| objects.get(*body).is_some_and(|o| o.as_rigid_body().is_some()))
                    .map_or(0, |body| island.index(objects, body))
            });
            bound.push((id, a, b));
        }

        let broken: Vec<JointId> = {
            let mut joint_rows: Vec<JointConstraint<'_>> = bound
                .iter()
                .filter_map(|(id, a, b)| self.joints.get(*id).map(|joint| JointConstraint::new(joint, *a, *b)))
                .collect();
            solve(&mut island.bodies, rows, &mut joint_rows, iterations, h);
            bound
                .iter()
                .zip(&joint_rows)
                .filter(|(_, row)| row.total_impulse > row.joint.breaking_impulse())
                .map(|((id, _, _), _)| *id)
                .collect()
        };
        for id in broken {
            if let Some(joint) = self.joints.get_mut(id) {
                joint.broken = true;
                warn!("Joint {:?} broke", id);
            }
        }
        Ok(())
    }

    /// Write solved velocities back and advance awake bodies
    fn integrate(&mut self, island: &mut Island, h: f32) {
        for (id, index) in &island.index {
            let Some(CollisionObject {
                kind: ObjectKind::Rigid(body),
                transform,
                ..
            }) = self.objects.get_mut(*id)
            else {
                continue;
            };
            if !body.is_dynamic() || !body.is_enabled() {
                continue;
            }
            let solved = &mut island.bodies[*index];
            solved.integrate(h);
            body.linear_velocity = solved.linear;
            body.angular_velocity = solved.angular;
            transform.position = solved.position;
            transform.rotation = solved.rotation;
        }
    }

    fn simulate_soft_bodies(&mut self, sector: SectorId, members: &[ObjectId], params: &StepParams, h: f32) {
        let joints = self.sectors.get(sector).map(|s| s.joints.clone()).unwrap_or_default();
        for id in members {
            let Some(soft) = self.objects.get(*id).and_then(CollisionObject::as_soft_body) else {
                continue;
            };
            let anchor_bodies: HashMap<ObjectId, Transform> = soft
                .anchored_bodies()
                .filter_map(|(_, body, _)| self.objects.get(body).map(|o| (body, o.transform)))
                .collect();
            let pulls = self.soft_joint_pulls(&joints, *id);
            let (group, query) = match self.objects.get(*id) {
                Some(object) => (object.group(), object.world_aabb()),
                None => continue,
            };
            let candidates: Vec<ObjectId> = match (query, self.sectors.get_mut(sector)) {
                (Some(aabb), Some(target)) => target
                    .broad_phase
                    .query_box(&aabb.inflated(BROAD_PHASE_MARGIN))
                    .into_iter()
                    .filter_map(|child| target.broad_phase.object(child).copied())
                    .filter(|other| other != id)
                    .collect(),
                _ => Vec::new(),
            };

            let Some(object) = self.objects.get_mut(*id) else {
                continue;
            };
            let mut kind = std::mem::replace(&mut object.kind, ObjectKind::Simple);
            if let ObjectKind::Soft(body) = &mut kind {
                body.update_body_anchor_targets(|b| anchor_bodies.get(&b).copied());
                for (vertex, target) in pulls {
                    body.add_pull(vertex, target);
                }
                let obstacles: Vec<Obstacle<'_>> = candidates
                    .iter()
                    .filter_map(|other| self.objects.get(*other))
                    .filter(|other| is_solid(other) && self.groups.group_collision(group, other.group()))
                    .filter_map(|other| {
                        Some(Obstacle {
                            collider: other.collider.as_ref()?,
                            transform: other.transform,
                            friction: material(other).0,
                        })
                    })
                    .collect();
                let step = SoftStepParams {
                    gravity: params.gravity,
                    dt: h,
                    iterations: params.iterations,
                    max_drag: params.anchor_max_drag,
                };
                body.simulate(&step, &obstacles);
            }
            if let Some(object) = self.objects.get_mut(*id) {
                object.kind = kind;
            }
        }
    }

    /// Node targets of soft linear joints attached to a soft body
    fn soft_joint_pulls(&self, joints: &[JointId], soft: ObjectId) -> Vec<(usize, Vec3)> {
        joints
            .iter()
            .filter_map(|id| self.joints.get(*id))
            .filter(|joint| joint.kind() == JointKind::SoftLinear && !joint.is_broken() && joint.references(soft))
            .filter_map(|joint| {
                let vertex = joint.soft_vertex()?;
                let slot = usize::from(joint.bodies[0] == Some(soft));
                let frame = joint.frames[slot];
                let target = match joint.bodies[slot].and_then(|other| self.objects.get(other)) {
                    Some(other) if other.as_rigid_body().is_some() => other.transform.combine(&frame).position,
                    _ => frame.position,
                };
                Some((vertex, target))
            })
            .collect()
    }

    fn move_actors(&mut self, sector: SectorId, members: &[ObjectId], params: &StepParams, h: f32) {
        let up = up_vector(&params.gravity);
        for id in members {
            let Some(object) = self.objects.get_mut(*id) else {
                continue;
            };
            if object.as_actor().is_none() {
                continue;
            }
            let Some(collider) = object.collider.take() else {
                continue;
            };
            let mut kind = std::mem::replace(&mut object.kind, ObjectKind::Simple);
            let group = object.group();
            let mut transform = object.transform;

            if let ObjectKind::Actor(actor) = &mut kind {
                transform.position += actor.begin_move(&params.gravity, h);
                let query = collider.world_aabb(&transform).inflated(ACTOR_MARGIN + actor.step_height());
                let candidates: Vec<ObjectId> = match self.sectors.get_mut(sector) {
                    Some(target) => target
                        .broad_phase
                        .query_box(&query)
                        .into_iter()
                        .filter_map(|child| target.broad_phase.object(child).copied())
                        .filter(|other| other != id)
                        .collect(),
                    None => Vec::new(),
                };
                for other in candidates {
                    let Some(other) = self.objects.get(other) else {
                        continue;
                    };
                    let Some(shape) = other.collider.as_ref() else {
                        continue;
                    };
                    if !is_solid(other) || !self.groups.group_collision(group, other.group()) {
                        continue;
                    }
                    let contacts = shape_contacts(&collider, &transform, shape, &other.transform, ACTOR_MARGIN);
                    let Some(contact) = deepest(&contacts) else {
                        continue;
                    };
                    if contact.penetration > 0.0 && !actor.is_walkable(&contact.normal_on_b, &up) && actor.step_height() > 0.0 {
                        let lifted = Transform {
                            position: transform.position + up * actor.step_height(),
                            ..transform
                        };
                        let blocked = deepest(&shape_contacts(&collider, &lifted, shape, &other.transform, 0.0))
                            .is_some_and(|c| c.penetration > 0.0);
                        if !blocked {
                            transform = lifted;
                            continue;
                        }
                    }
                    if contact.penetration > 0.0 {
                        transform.position += contact.normal_on_b * contact.penetration;
                    }
                    actor.resolve_contact(&contact.normal_on_b, &up);
                }
            }

            if let Some(object) = self.objects.get_mut(*id) {
                object.kind = kind;
                object.collider = Some(collider);
                object.transform = transform;
            }
        }
    }

    fn auto_disable(&mut self, members: &[ObjectId], params: &StepParams, h: f32) {
        let (linear, angular, time) = params.auto_disable;
        if time <= 0.0 {
            return;
        }
        for id in members {
            let Some(body) = self.objects.get_mut(*id).and_then(CollisionObject::as_rigid_body_mut) else {
                continue;
            };
            if !body.is_dynamic() || !body.is_enabled() {
                continue;
            }
            if body.linear_velocity.norm() < linear && body.angular_velocity.norm() < angular {
                body.idle_time += h;
                if body.idle_time >= time {
                    body.disable();
                    debug!("Body {:?} went to sleep", id);
                }
            } else {
                body.idle_time = 0.0;
            }
        }
    }

    /// Move objects that passed through a portal of `sector`
    fn cross_portals(&mut self, sector: SectorId, start: &[(ObjectId, Vec3)]) -> Result<(), PhysicsError> {
        let portals = self.sector(sector)?.portals.clone();
        if portals.is_empty() {
            return Ok(());
        }
        for (id, before) in start {
            let Some(object) = self.objects.get(*id) else {
                continue;
            };
            if object.sector != Some(sector) || !can_cross(object) {
                continue;
            }
            let after = object.position();
            let Some((destination, warp)) = portals
                .iter()
                .filter_map(|p| self.portals.get(*p))
                .find(|p| p.crosses(before, &after) && self.sectors.contains_key(p.destination()))
                .map(|p| (p.destination(), *p.warp()))
            else {
                continue;
            };

            self.remove_collision_object(sector, *id)?;
            let object = self.object_ref_mut(*id)?;
            let transform = warp.combine(object.transform());
            object.set_transform(transform);
            match &mut object.kind {
                ObjectKind::Rigid(body) => {
                    body.linear_velocity = warp.rotation * body.linear_velocity;
                    body.angular_velocity = warp.rotation * body.angular_velocity;
                }
                ObjectKind::Actor(actor) => actor.rotate_velocity(&warp.rotation),
                _ => {}
            }
            info!("Object '{}' crossed a portal into {:?}", object.name(), destination);
            self.add_collision_object(destination, *id)?;
        }
        Ok(())
    }

    /// Fill contact lists and run collision callbacks
    fn report_contacts(&mut self, sector: SectorId, members: &[ObjectId], reports: Vec<CollisionData>) {
        for id in members {
            if let Some(object) = self.objects.get_mut(*id) {
                object.contacts.clear();
            }
        }
        let mut pairs: BTreeMap<(ObjectId, ObjectId), Vec<CollisionData>> = BTreeMap::new();
        for report in &reports {
            pairs.entry((report.object_a, report.object_b)).or_default().push(*report);
        }

        for ((a, b), data) in &pairs {
            let swapped: Vec<CollisionData> = data.iter().map(CollisionData::swapped).collect();
            for (this, other, data) in [(*a, *b, data.as_slice()), (*b, *a, swapped.as_slice())] {
                let Some(object) = self.objects.get_mut(this) else {
                    continue;
                };
                if !object.contacts.contains(&other) {
                    object.contacts.push(other);
                }
                if let Some(callback) = object.callback.as_mut() {
                    callback.on_collision(this, other, data);
                }
            }
        }
        if let Some(target) = self.sectors.get_mut(sector) {
            target.last_contacts = reports;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::physics::{Collider, Joint, RigidBody};
    use approx::assert_relative_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn world() -> (PhysicsSystem, SectorId) {
        let mut physics = PhysicsSystem::new(EngineConfig::default());
        let sector = physics.create_sector("world");
        (physics, sector)
    }

    fn place(physics: &mut PhysicsSystem, sector: SectorId, object: CollisionObject, at: Vec3) -> ObjectId {
        let id = physics.add_object(object.with_transform(Transform::from_position(at)));
        physics.add_collision_object(sector, id).unwrap();
        id
    }

    fn ball() -> CollisionObject {
        CollisionObject::rigid_body("ball", Collider::sphere(0.5), RigidBody::new_dynamic(1.0)).unwrap()
    }

    #[test]
    fn test_free_fall_matches_gravity() {
        let (mut physics, sector) = world();
        physics.sector_mut(sector).unwrap().set_linear_damping(0.0);
        let id = place(&mut physics, sector, ball(), Vec3::new(0.0, 10.0, 0.0));

        physics.step(sector, 1.0 / 60.0).unwrap();
        let body = physics.object(id).unwrap().as_rigid_body().unwrap();
        assert_relative_eq!(body.linear_velocity().y, -9.81 / 60.0, epsilon = 1e-5);
        let y = physics.object(id).unwrap().transform().position.y;
        assert_relative_eq!(y, 10.0 - 9.81 / 3600.0, epsilon = 1e-5);
    }

    #[test]
    fn test_gravity_opt_out() {
        let (mut physics, sector) = world();
        let id = place(&mut physics, sector, ball(), Vec3::new(0.0, 10.0, 0.0));
        physics
            .object_mut(id)
            .and_then(CollisionObject::as_rigid_body_mut)
            .unwrap()
            .set_gravity_enabled(false);
        for _ in 0..10 {
            physics.step(sector, 1.0 / 60.0).unwrap();
        }
        assert_relative_eq!(physics.object(id).unwrap().transform().position.y, 10.0);
    }

    #[test]
    fn test_kinematic_body_follows_callback() {
        let (mut physics, sector) = world();
        let body = RigidBody::new_kinematic(|_: ObjectId| Transform::from_position(Vec3::new(1.0, 0.0, 0.0)));
        let id = place(
            &mut physics,
            sector,
            CollisionObject::rigid_body("platform", Collider::cuboid(Vec3::repeat(1.0)), body).unwrap(),
            Vec3::zeros(),
        );
        physics.step(sector, 0.1).unwrap();
        let object = physics.object(id).unwrap();
        assert_relative_eq!(object.transform().position, Vec3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(object.as_rigid_body().unwrap().linear_velocity(), Vec3::new(10.0, 0.0, 0.0), epsilon = 1e-4);
    }

    #[test]
    fn test_callbacks_and_contact_lists() {
        let (mut physics, sector) = world();
        let floor = place(
            &mut physics,
            sector,
            CollisionObject::rigid_body("floor", Collider::cuboid(Vec3::new(5.0, 0.5, 5.0)), RigidBody::new_static())
                .unwrap(),
            Vec3::new(0.0, -0.5, 0.0),
        );
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut object = ball();
        let log = Rc::clone(&seen);
        object.set_collision_callback(move |this: ObjectId, other: ObjectId, data: &[CollisionData]| {
            assert!(data.iter().all(|d| d.object_a == this && d.object_b == other));
            log.borrow_mut().push(other);
        });
        let id = place(&mut physics, sector, object, Vec3::new(0.0, 0.49, 0.0));

        physics.step(sector, 1.0 / 60.0).unwrap();
        assert_eq!(physics.object(id).unwrap().contacts(), &[floor]);
        assert_eq!(physics.object(floor).unwrap().contacts(), &[id]);
        assert_eq!(seen.borrow().as_slice(), &[floor]);
        assert!(!physics.sector(sector).unwrap().last_contacts().is_empty());
    }

    #[test]
    fn test_movable_receives_transform() {
        let (mut physics, sector) = world();
        let received = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&received);
        let mut object = ball();
        object.attach_movable(move |t: &Transform| *sink.borrow_mut() = Some(*t));
        let id = place(&mut physics, sector, object, Vec3::new(0.0, 3.0, 0.0));

        physics.step(sector, 1.0 / 60.0).unwrap();
        assert_eq!(*received.borrow(), Some(*physics.object(id).unwrap().transform()));
    }

    #[test]
    fn test_bodies_fall_asleep() {
        let (mut physics, sector) = world();
        physics.sector_mut(sector).unwrap().set_auto_disable_params(0.8, 1.0, 0.1);
        let id = place(&mut physics, sector, ball(), Vec3::zeros());
        physics
            .object_mut(id)
            .and_then(CollisionObject::as_rigid_body_mut)
            .unwrap()
            .set_gravity_enabled(false);
        for _ in 0..10 {
            physics.step(sector, 1.0 / 60.0).unwrap();
        }
        assert!(!physics.object(id).unwrap().as_rigid_body().unwrap().is_enabled());
    }

    #[test]
    fn test_pendulum_keeps_its_length() {
        let (mut physics, sector) = world();
        let id = place(&mut physics, sector, ball(), Vec3::new(2.0, 0.0, 0.0));
        let joint = physics.create_joint(Joint::point_to_point(Vec3::zeros()), Some(id), None).unwrap();
        physics.add_joint(sector, joint).unwrap();
        physics.sector_mut(sector).unwrap().set_step_parameters(1.0 / 120.0, 2, 20);

        for _ in 0..60 {
            physics.step(sector, 1.0 / 60.0).unwrap();
        }
        let position = physics.object(id).unwrap().transform().position;
        assert!(position.y < -0.5);
        assert_relative_eq!(position.norm(), 2.0, epsilon = 0.1);
    }

    #[test]
    fn test_joint_breaks_under_load() {
        let (mut physics, sector) = world();
        let id = place(&mut physics, sector, ball(), Vec3::new(1.0, 0.0, 0.0));
        let mut joint = Joint::point_to_point(Vec3::zeros());
        joint.set_breaking_impulse(0.01);
        let joint = physics.create_joint(joint, Some(id), None).unwrap();
        physics.add_joint(sector, joint).unwrap();

        physics.step(sector, 1.0 / 60.0).unwrap();
        assert!(physics.joint(joint).unwrap().is_broken());
        physics.rebuild_joint(joint).unwrap();
        assert!(!physics.joint(joint).unwrap().is_broken());
    }

    #[test]
    fn test_zero_duration_is_a_no_op() {
        let (mut physics, sector) = world();
        let id = place(&mut physics, sector, ball(), Vec3::new(0.0, 5.0, 0.0));
        physics.step(sector, 0.0).unwrap();
        assert_relative_eq!(physics.object(id).unwrap().transform().position.y, 5.0);
    }
}

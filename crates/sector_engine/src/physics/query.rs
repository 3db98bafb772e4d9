//! Beam and overlap queries
//!
//! Both go through the sector's KD-tree first and only test the objects
//! whose boxes the beam or the object's box touch.

use slotmap::SlotMap;

use crate::foundation::math::{Transform, Vec3};
use crate::spatial::KdTree;

use super::actor::up_vector;
use super::collider::Collider;
use super::object::{CollisionData, CollisionObject, CollisionObjectType, HitBeamResult, ObjectKind};
use super::primitives::Ray;
use super::solver::{deepest, shape_contacts, soft_contacts, ContactPoint};
use super::{ObjectId, PhysicsError, PhysicsSystem, SectorId};

/// Portals a beam may pass through before giving up
const MAX_PORTAL_DEPTH: usize = 8;

/// Distance a beam is pushed past a portal so it does not hit the way back
const PORTAL_NUDGE: f32 = 1e-3;

/// Gap under which a surface below an object counts as ground
const GROUND_MARGIN: f32 = 0.05;

/// Smallest `normal · up` of a ground contact
const GROUND_COS: f32 = 0.7;

/// Nearest object along a ray
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RayHit {
    pub object: ObjectId,
    pub distance: f32,
    pub normal: Vec3,
    pub vertex: Option<usize>,
}

/// Cast a ray through a sector tree, skipping ghosts and rejected objects
pub(crate) fn cast_ray(
    objects: &SlotMap<ObjectId, CollisionObject>,
    tree: &mut KdTree<ObjectId>,
    ray: &Ray,
    max_distance: f32,
    mut accept: impl FnMut(ObjectId, &CollisionObject) -> bool,
) -> Option<RayHit> {
    let end = ray.point_at(max_distance);
    let mut best: Option<RayHit> = None;
    for child in tree.query_segment(&ray.origin, &end) {
        let Some(&id) = tree.object(child) else {
            continue;
        };
        let Some(object) = objects.get(id) else {
            continue;
        };
        if object.object_type() == CollisionObjectType::Ghost || !accept(id, object) {
            continue;
        }
        let limit = best.map_or(max_distance, |hit| hit.distance);
        let hit = match &object.kind {
            ObjectKind::Soft(body) => body.raycast(ray, limit).map(|(distance, normal, vertex)| RayHit {
                object: id,
                distance,
                normal,
                vertex: Some(vertex),
            }),
            _ => object
                .collider
                .as_ref()
                .and_then(|collider| raycast_placed(collider, &object.transform, ray, limit))
                .map(|(distance, normal)| RayHit {
                    object: id,
                    distance,
                    normal,
                    vertex: None,
                }),
        };
        if let Some(hit) = hit.filter(|hit| hit.distance <= limit) {
            best = Some(hit);
        }
    }
    best
}

fn raycast_placed(collider: &Collider, transform: &Transform, ray: &Ray, max_distance: f32) -> Option<(f32, Vec3)> {
    let local = Ray {
        origin: transform.inverse_transform_point(&ray.origin),
        direction: transform.rotation.inverse() * ray.direction,
    };
    collider
        .raycast(&local, max_distance)
        .map(|(t, normal)| (t, transform.rotation * normal))
}

/// Contacts between two objects, A's view
///
/// Soft bodies touch colliders through their nodes; two soft bodies never
/// touch.
pub(crate) fn object_contacts(a: &CollisionObject, b: &CollisionObject, margin: f32) -> Vec<ContactPoint> {
    match (&a.kind, &b.kind) {
        (ObjectKind::Soft(_), ObjectKind::Soft(_)) => Vec::new(),
        (ObjectKind::Soft(soft), _) => b
            .collider
            .as_ref()
            .map(|collider| soft_contacts(soft, collider, &b.transform, margin))
            .unwrap_or_default(),
        (_, ObjectKind::Soft(soft)) => a
            .collider
            .as_ref()
            .map(|collider| {
                soft_contacts(soft, collider, &a.transform, margin)
                    .into_iter()
                    .map(|c| ContactPoint {
                        position_on_a: c.position_on_b,
                        position_on_b: c.position_on_a,
                        normal_on_b: -c.normal_on_b,
                        penetration: c.penetration,
                    })
                    .collect()
            })
            .unwrap_or_default(),
        _ => match (&a.collider, &b.collider) {
            (Some(ca), Some(cb)) => shape_contacts(ca, &a.transform, cb, &b.transform, margin),
            _ => Vec::new(),
        },
    }
}

/// Contact report between two objects
pub(crate) fn collision_data(a: ObjectId, b: ObjectId, contact: &ContactPoint) -> CollisionData {
    CollisionData {
        object_a: a,
        object_b: b,
        position_on_a: contact.position_on_a,
        position_on_b: contact.position_on_b,
        normal_on_b: contact.normal_on_b,
        penetration: contact.penetration.max(0.0),
    }
}

impl PhysicsSystem {
    /// First object hit by the segment from `start` to `end`
    ///
    /// Ghost objects are transparent. For soft bodies the node nearest to
    /// the hit is reported.
    pub fn hit_beam(&mut self, sector: SectorId, start: Vec3, end: Vec3) -> Result<HitBeamResult, PhysicsError> {
        let target = self.sectors.get_mut(sector).ok_or(PhysicsError::UnknownSector(sector))?;
        let Some((ray, length)) = Ray::from_segment(&start, &end) else {
            return Ok(HitBeamResult::default());
        };
        Ok(cast_ray(&self.objects, &mut target.broad_phase, &ray, length, |_, _| true)
            .map_or_else(HitBeamResult::default, |hit| beam_result(&ray, &hit)))
    }

    /// Hit beam that continues through portals
    ///
    /// When a portal is closer than any object the beam is warped into the
    /// portal's destination and cast again from there. Returns the sector
    /// the result belongs to; its positions are in that sector's space.
    pub fn hit_beam_portal(
        &mut self,
        sector: SectorId,
        start: Vec3,
        end: Vec3,
    ) -> Result<(SectorId, HitBeamResult), PhysicsError> {
        let (mut sector, mut start, mut end) = (sector, start, end);
        for _ in 0..=MAX_PORTAL_DEPTH {
            let target = self.sectors.get_mut(sector).ok_or(PhysicsError::UnknownSector(sector))?;
            let Some((ray, length)) = Ray::from_segment(&start, &end) else {
                return Ok((sector, HitBeamResult::default()));
            };
            let hit = cast_ray(&self.objects, &mut target.broad_phase, &ray, length, |_, _| true);
            let limit = hit.map_or(length, |hit| hit.distance);
            let portal = target
                .portals
                .iter()
                .filter_map(|id| self.portals.get(*id))
                .filter_map(|portal| portal.intersect_ray(&ray, limit).map(|t| (t, portal)))
                .min_by(|x, y| x.0.total_cmp(&y.0));

            match portal {
                Some((t, portal)) if self.sectors.contains_key(portal.destination()) => {
                    log::trace!("Beam passes portal into {:?}", portal.destination());
                    start = portal.warp_point(&ray.point_at(t + PORTAL_NUDGE));
                    end = portal.warp_point(&end);
                    sector = portal.destination();
                }
                _ => return Ok((sector, hit.map_or_else(HitBeamResult::default, |hit| beam_result(&ray, &hit)))),
            }
        }
        log::debug!("Beam gave up after {} portals", MAX_PORTAL_DEPTH);
        Ok((sector, HitBeamResult::default()))
    }

    /// Find every object overlapping `object` in `sector`
    ///
    /// Each overlapping object is reported once, with its deepest contact,
    /// and only when the two groups collide. Returns whether anything was
    /// found.
    pub fn collision_test(
        &mut self,
        sector: SectorId,
        object: ObjectId,
        out: &mut Vec<CollisionData>,
    ) -> Result<bool, PhysicsError> {
        let target = self.sectors.get_mut(sector).ok_or(PhysicsError::UnknownSector(sector))?;
        let this = self.objects.get(object).ok_or(PhysicsError::UnknownObject(object))?;
        if this.sector != Some(sector) {
            return Err(PhysicsError::NotInSector { object, sector });
        }
        let Some(aabb) = this.world_aabb() else {
            return Ok(false);
        };

        let mut found = false;
        let candidates = target.broad_phase.query_box(&aabb);
        for child in candidates {
            let Some(&other_id) = target.broad_phase.object(child) else {
                continue;
            };
            if other_id == object {
                continue;
            }
            let Some(other) = self.objects.get(other_id) else {
                continue;
            };
            if !self.groups.group_collision(this.group(), other.group()) {
                continue;
            }
            let contacts = object_contacts(this, other, 0.0);
            if let Some(contact) = deepest(&contacts).filter(|c| c.penetration > 0.0) {
                out.push(collision_data(object, other_id, &contact));
                found = true;
            }
        }
        Ok(found)
    }

    /// Whether an object stands on something
    ///
    /// Actors report their own state from the last step; other objects
    /// look for a contact below them whose normal is close to up.
    pub fn is_on_ground(&mut self, sector: SectorId, object: ObjectId) -> Result<bool, PhysicsError> {
        let target = self.sectors.get_mut(sector).ok_or(PhysicsError::UnknownSector(sector))?;
        let this = self.objects.get(object).ok_or(PhysicsError::UnknownObject(object))?;
        if let Some(actor) = this.as_actor() {
            return Ok(actor.is_on_ground());
        }
        let Some(aabb) = this.world_aabb() else {
            return Ok(false);
        };
        let up = up_vector(&target.gravity());
        let candidates = target.broad_phase.query_box(&aabb.inflated(GROUND_MARGIN));
        Ok(candidates.into_iter().any(|child| {
            target
                .broad_phase
                .object(child)
                .filter(|id| **id != object)
                .and_then(|id| self.objects.get(*id))
                .filter(|other| {
                    other.object_type() != CollisionObjectType::Ghost
                        && self.groups.group_collision(this.group(), other.group())
                })
                .is_some_and(|other| {
                    object_contacts(this, other, GROUND_MARGIN)
                        .iter()
                        .any(|c| c.normal_on_b.dot(&up) >= GROUND_COS)
                })
        }))
    }
}

fn beam_result(ray: &Ray, hit: &RayHit) -> HitBeamResult {
    HitBeamResult {
        has_hit: true,
        object: Some(hit.object),
        isect: ray.point_at(hit.distance),
        normal: hit.normal,
        vertex_index: hit.vertex,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::physics::{Portal, RigidBody, SoftBody};
    use approx::assert_relative_eq;

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

    #[test]
    fn test_hit_beam_finds_nearest() {
        let (mut physics, sector) = world();
        let near = place(&mut physics, sector, CollisionObject::simple("near", Collider::sphere(1.0)), Vec3::new(5.0, 0.0, 0.0));
        place(&mut physics, sector, CollisionObject::simple("far", Collider::sphere(1.0)), Vec3::new(10.0, 0.0, 0.0));

        let result = physics.hit_beam(sector, Vec3::zeros(), Vec3::new(20.0, 0.0, 0.0)).unwrap();
        assert!(result.has_hit);
        assert_eq!(result.object, Some(near));
        assert_relative_eq!(result.isect, Vec3::new(4.0, 0.0, 0.0), epsilon = 1e-4);
        assert_relative_eq!(result.normal, -Vec3::x(), epsilon = 1e-4);
        assert_eq!(result.vertex_index, None);

        let short = physics.hit_beam(sector, Vec3::zeros(), Vec3::new(3.0, 0.0, 0.0)).unwrap();
        assert!(!short.has_hit);
    }

    #[test]
    fn test_hit_beam_sees_teleported_object() {
        let (mut physics, sector) = world();
        let rock = CollisionObject::rigid_body("rock", Collider::sphere(1.0), RigidBody::new_static()).unwrap();
        let rock = place(&mut physics, sector, rock, Vec3::zeros());

        physics
            .set_object_transform(rock, Transform::from_position(Vec3::new(50.0, 0.0, 0.0)))
            .unwrap();
        let moved = physics.hit_beam(sector, Vec3::new(50.0, 10.0, 0.0), Vec3::new(50.0, -10.0, 0.0)).unwrap();
        assert_eq!(moved.object, Some(rock));
        assert_relative_eq!(moved.isect, Vec3::new(50.0, 1.0, 0.0), epsilon = 1e-4);
        let old = physics.hit_beam(sector, Vec3::new(0.0, 10.0, 0.0), Vec3::new(0.0, -10.0, 0.0)).unwrap();
        assert!(!old.has_hit);

        physics.set_object_collider(rock, Collider::sphere(3.0)).unwrap();
        let wide = physics.hit_beam(sector, Vec3::new(52.5, 10.0, 0.0), Vec3::new(52.5, -10.0, 0.0)).unwrap();
        assert_eq!(wide.object, Some(rock));
    }

    #[test]
    fn test_hit_beam_ignores_ghosts() {
        let (mut physics, sector) = world();
        place(&mut physics, sector, CollisionObject::ghost("trigger", Collider::sphere(1.0)), Vec3::new(5.0, 0.0, 0.0));
        let result = physics.hit_beam(sector, Vec3::zeros(), Vec3::new(20.0, 0.0, 0.0)).unwrap();
        assert!(!result.has_hit);
    }

    #[test]
    fn test_hit_beam_reports_rope_node() {
        let (mut physics, sector) = world();
        let rope = SoftBody::rope(Vec3::new(0.0, 0.0, 5.0), Vec3::new(4.0, 0.0, 5.0), 5, 1.0).unwrap();
        let id = physics.add_object(CollisionObject::soft_body("rope", rope));
        physics.add_collision_object(sector, id).unwrap();

        let result = physics.hit_beam(sector, Vec3::new(2.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 10.0)).unwrap();
        assert_eq!(result.object, Some(id));
        assert_eq!(result.vertex_index, Some(2));
    }

    #[test]
    fn test_hit_beam_reports_nearest_cloth_node() {
        let (mut physics, sector) = world();
        let corners = [Vec3::zeros(), Vec3::new(2.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 2.0), Vec3::new(0.0, 0.0, 2.0)];
        let cloth = SoftBody::cloth(corners, (3, 3), 1.0).unwrap();
        let id = physics.add_object(CollisionObject::soft_body("cloth", cloth));
        physics.add_collision_object(sector, id).unwrap();

        let result = physics.hit_beam(sector, Vec3::new(1.2, 5.0, 0.9), Vec3::new(1.2, -5.0, 0.9)).unwrap();
        assert_eq!(result.object, Some(id));
        assert_relative_eq!(result.isect, Vec3::new(1.2, 0.0, 0.9), epsilon = 1e-4);
        assert_eq!(result.vertex_index, Some(4));

        let corner = physics.hit_beam(sector, Vec3::new(1.9, 5.0, 0.1), Vec3::new(1.9, -5.0, 0.1)).unwrap();
        assert_eq!(corner.vertex_index, Some(2));
    }

    #[test]
    fn test_hit_beam_through_portal() {
        let (mut physics, a) = world();
        let b = physics.create_sector("other");
        let door = Portal::new(
            vec![
                Vec3::new(2.0, -1.0, -1.0),
                Vec3::new(2.0, 1.0, -1.0),
                Vec3::new(2.0, 1.0, 1.0),
                Vec3::new(2.0, -1.0, 1.0),
            ],
            b,
        )
        .unwrap()
        .with_warp(Transform::from_position(Vec3::new(0.0, 100.0, 0.0)));
        physics.add_portal(a, door).unwrap();
        let target = place(&mut physics, b, CollisionObject::simple("target", Collider::sphere(1.0)), Vec3::new(6.0, 100.0, 0.0));

        let plain = physics.hit_beam(a, Vec3::zeros(), Vec3::new(10.0, 0.0, 0.0)).unwrap();
        assert!(!plain.has_hit);

        let (sector, result) = physics.hit_beam_portal(a, Vec3::zeros(), Vec3::new(10.0, 0.0, 0.0)).unwrap();
        assert_eq!(sector, b);
        assert_eq!(result.object, Some(target));
        assert_relative_eq!(result.isect, Vec3::new(5.0, 100.0, 0.0), epsilon = 1e-3);
    }

    #[test]
    fn test_collision_test_reports_each_overlap_once() {
        let (mut physics, sector) = world();
        let probe = place(&mut physics, sector, CollisionObject::ghost("probe", Collider::cuboid(Vec3::repeat(1.0))), Vec3::zeros());
        let inside = place(&mut physics, sector, CollisionObject::simple("inside", Collider::sphere(0.5)), Vec3::new(0.8, 0.0, 0.0));
        place(&mut physics, sector, CollisionObject::simple("outside", Collider::sphere(0.5)), Vec3::new(5.0, 0.0, 0.0));

        let mut out = Vec::new();
        assert!(physics.collision_test(sector, probe, &mut out).unwrap());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].object_a, probe);
        assert_eq!(out[0].object_b, inside);
        assert!(out[0].penetration > 0.0);
    }

    #[test]
    fn test_collision_test_honours_groups() {
        let (mut physics, sector) = world();
        let a = physics.create_collision_group("A").unwrap();
        let b = physics.create_collision_group("B").unwrap();
        physics.set_group_collision(a, b, false).unwrap();

        let first = place(&mut physics, sector, CollisionObject::simple("first", Collider::sphere(1.0)), Vec3::zeros());
        let second = place(&mut physics, sector, CollisionObject::simple("second", Collider::sphere(1.0)), Vec3::new(1.0, 0.0, 0.0));
        physics.set_object_group(first, a).unwrap();
        physics.set_object_group(second, b).unwrap();

        let mut out = Vec::new();
        assert!(!physics.collision_test(sector, first, &mut out).unwrap());
        assert!(out.is_empty());
    }

    #[test]
    fn test_is_on_ground() {
        let (mut physics, sector) = world();
        place(
            &mut physics,
            sector,
            CollisionObject::rigid_body("floor", Collider::plane(Vec3::y(), 0.0), RigidBody::new_static()).unwrap(),
            Vec3::zeros(),
        );
        let resting = CollisionObject::rigid_body("resting", Collider::sphere(0.5), RigidBody::new_dynamic(1.0)).unwrap();
        let resting = place(&mut physics, sector, resting, Vec3::new(0.0, 0.51, 0.0));
        let flying = CollisionObject::rigid_body("flying", Collider::sphere(0.5), RigidBody::new_dynamic(1.0)).unwrap();
        let flying = place(&mut physics, sector, flying, Vec3::new(3.0, 2.0, 0.0));

        assert!(physics.is_on_ground(sector, resting).unwrap());
        assert!(!physics.is_on_ground(sector, flying).unwrap());
    }
}

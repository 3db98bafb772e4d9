//! Collision objects and the callbacks they carry

use crate::foundation::math::{Transform, Vec3};
use crate::spatial::{ChildId, AABB};

use super::actor::Actor;
use super::collider::Collider;
use super::group::CollisionGroupId;
use super::rigid_body::{RigidBody, RigidBodyState};
use super::soft_body::SoftBody;
use super::{ObjectId, PhysicsError, SectorId};

/// Receiver of world transforms pushed after each step
///
/// Implemented by scene movables and cameras.
pub trait MovableSink {
    /// Called with the object's world transform after a step
    fn set_transform(&mut self, transform: &Transform);
}

impl<F: FnMut(&Transform)> MovableSink for F {
    fn set_transform(&mut self, transform: &Transform) {
        self(transform);
    }
}

/// Notified of the contacts of an object after each step
pub trait CollisionCallback {
    /// `this` touched `other` during the last step
    fn on_collision(&mut self, this: ObjectId, other: ObjectId, contacts: &[CollisionData]);
}

impl<F: FnMut(ObjectId, ObjectId, &[CollisionData])> CollisionCallback for F {
    fn on_collision(&mut self, this: ObjectId, other: ObjectId, contacts: &[CollisionData]) {
        self(this, other, contacts);
    }
}

/// Source of the transform of a kinematic rigid body
pub trait KinematicCallback {
    /// Transform the body should have this substep
    fn body_transform(&mut self, object: ObjectId) -> Transform;
}

impl<F: FnMut(ObjectId) -> Transform> KinematicCallback for F {
    fn body_transform(&mut self, object: ObjectId) -> Transform {
        self(object)
    }
}

/// One contact between two objects
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionData {
    /// First object
    pub object_a: ObjectId,
    /// Second object
    pub object_b: ObjectId,
    /// Contact point on the surface of A
    pub position_on_a: Vec3,
    /// Contact point on the surface of B
    pub position_on_b: Vec3,
    /// Contact normal on B, pointing towards A
    pub normal_on_b: Vec3,
    /// Penetration depth, never negative
    pub penetration: f32,
}

impl CollisionData {
    /// Same contact seen from the other object
    pub fn swapped(&self) -> Self {
        Self {
            object_a: self.object_b,
            object_b: self.object_a,
            position_on_a: self.position_on_b,
            position_on_b: self.position_on_a,
            normal_on_b: -self.normal_on_b,
            penetration: self.penetration,
        }
    }
}

/// Result of a hit beam query
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HitBeamResult {
    /// Whether anything was hit
    pub has_hit: bool,
    /// Object hit
    pub object: Option<ObjectId>,
    /// Intersection point in world space
    pub isect: Vec3,
    /// Surface normal at the intersection
    pub normal: Vec3,
    /// Nearest soft body node, when a soft body was hit
    pub vertex_index: Option<usize>,
}

/// Broad classification of a collision object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollisionObjectType {
    /// Collider without dynamics
    Simple,
    /// Rigid or soft body
    Physical,
    /// Overlap detector without response
    Ghost,
    /// Kinematic character
    Actor,
}

/// Refinement of [`CollisionObjectType::Physical`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalObjectType {
    /// Rigid body
    RigidBody,
    /// Soft body
    SoftBody,
}

/// Kind specific state of a collision object
#[derive(Debug)]
pub enum ObjectKind {
    /// Collider without dynamics
    Simple,
    /// Overlap detector
    Ghost,
    /// Kinematic character
    Actor(Actor),
    /// Rigid body
    Rigid(RigidBody),
    /// Soft body
    Soft(SoftBody),
}

/// An object registered with the physics system
pub struct CollisionObject {
    name: String,
    pub(crate) collider: Option<Collider>,
    pub(crate) group: CollisionGroupId,
    pub(crate) transform: Transform,
    movable: Option<Box<dyn MovableSink>>,
    camera: Option<Box<dyn MovableSink>>,
    pub(crate) callback: Option<Box<dyn CollisionCallback>>,
    pub(crate) contacts: Vec<ObjectId>,
    pub(crate) sector: Option<SectorId>,
    pub(crate) tree_handle: Option<ChildId>,
    pub(crate) kind: ObjectKind,
}

impl std::fmt::Debug for CollisionObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollisionObject")
            .field("name", &self.name)
            .field("collider", &self.collider.as_ref().map(Collider::name))
            .field("group", &self.group)
            .field("transform", &self.transform)
            .field("sector", &self.sector)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl CollisionObject {
    fn with_kind(name: &str, collider: Option<Collider>, kind: ObjectKind) -> Self {
        Self {
            name: name.to_string(),
            collider,
            group: CollisionGroupId::DEFAULT,
            transform: Transform::identity(),
            movable: None,
            camera: None,
            callback: None,
            contacts: Vec::new(),
            sector: None,
            tree_handle: None,
            kind,
        }
    }

    /// Collider that is never moved by the simulation
    pub fn simple(name: &str, collider: Collider) -> Self {
        Self::with_kind(name, Some(collider), ObjectKind::Simple)
    }

    /// Object without collision geometry
    ///
    /// Takes part in nothing until a collider is set.
    pub fn inert(name: &str) -> Self {
        Self::with_kind(name, None, ObjectKind::Simple)
    }

    /// Overlap detector
    pub fn ghost(name: &str, collider: Collider) -> Self {
        Self::with_kind(name, Some(collider), ObjectKind::Ghost)
    }

    /// Kinematic character
    pub fn actor(name: &str, collider: Collider, actor: Actor) -> Result<Self, PhysicsError> {
        if collider.is_static_only() {
            return Err(PhysicsError::StaticOnlyCollider(collider.name()));
        }
        Ok(Self::with_kind(name, Some(collider), ObjectKind::Actor(actor)))
    }

    /// Rigid body
    ///
    /// Concave meshes, terrains and planes are refused for bodies that are
    /// not static. Density based bodies get their mass from the collider
    /// volume.
    pub fn rigid_body(name: &str, collider: Collider, mut body: RigidBody) -> Result<Self, PhysicsError> {
        if body.state() != RigidBodyState::Static && collider.is_static_only() {
            return Err(PhysicsError::StaticOnlyCollider(collider.name()));
        }
        body.bind_collider(&collider);
        Ok(Self::with_kind(name, Some(collider), ObjectKind::Rigid(body)))
    }

    /// Soft body; its nodes carry the geometry
    pub fn soft_body(name: &str, body: SoftBody) -> Self {
        Self::with_kind(name, None, ObjectKind::Soft(body))
    }

    /// Place the object, builder style
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.set_transform(transform);
        self
    }

    /// Object name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collider, if any
    pub fn collider(&self) -> Option<&Collider> {
        self.collider.as_ref()
    }

    /// Replace the collider
    pub(crate) fn set_collider(&mut self, collider: Collider) -> Result<(), PhysicsError> {
        match &mut self.kind {
            ObjectKind::Rigid(body) => {
                if body.state() != RigidBodyState::Static && collider.is_static_only() {
                    return Err(PhysicsError::StaticOnlyCollider(collider.name()));
                }
                body.bind_collider(&collider);
            }
            ObjectKind::Actor(_) if collider.is_static_only() => {
                return Err(PhysicsError::StaticOnlyCollider(collider.name()));
            }
            _ => {}
        }
        self.collider = Some(collider);
        Ok(())
    }

    /// Broad classification
    pub fn object_type(&self) -> CollisionObjectType {
        match self.kind {
            ObjectKind::Simple => CollisionObjectType::Simple,
            ObjectKind::Ghost => CollisionObjectType::Ghost,
            ObjectKind::Actor(_) => CollisionObjectType::Actor,
            ObjectKind::Rigid(_) | ObjectKind::Soft(_) => CollisionObjectType::Physical,
        }
    }

    /// Rigid or soft, for physical objects
    pub fn physical_type(&self) -> Option<PhysicalObjectType> {
        match self.kind {
            ObjectKind::Rigid(_) => Some(PhysicalObjectType::RigidBody),
            ObjectKind::Soft(_) => Some(PhysicalObjectType::SoftBody),
            _ => None,
        }
    }

    /// Kind specific state
    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    /// Rigid body part, if this is a rigid body
    pub fn as_rigid_body(&self) -> Option<&RigidBody> {
        match &self.kind {
            ObjectKind::Rigid(body) => Some(body),
            _ => None,
        }
    }

    /// Mutable rigid body part
    pub fn as_rigid_body_mut(&mut self) -> Option<&mut RigidBody> {
        match &mut self.kind {
            ObjectKind::Rigid(body) => Some(body),
            _ => None,
        }
    }

    /// Soft body part, if this is a soft body
    pub fn as_soft_body(&self) -> Option<&SoftBody> {
        match &self.kind {
            ObjectKind::Soft(body) => Some(body),
            _ => None,
        }
    }

    /// Mutable soft body part
    pub fn as_soft_body_mut(&mut self) -> Option<&mut SoftBody> {
        match &mut self.kind {
            ObjectKind::Soft(body) => Some(body),
            _ => None,
        }
    }

    /// Actor part, if this is an actor
    pub fn as_actor(&self) -> Option<&Actor> {
        match &self.kind {
            ObjectKind::Actor(actor) => Some(actor),
            _ => None,
        }
    }

    /// Mutable actor part
    pub fn as_actor_mut(&mut self) -> Option<&mut Actor> {
        match &mut self.kind {
            ObjectKind::Actor(actor) => Some(actor),
            _ => None,
        }
    }

    /// True for objects the simulation moves on its own
    pub fn is_dynamic(&self) -> bool {
        match &self.kind {
            ObjectKind::Rigid(body) => body.is_dynamic(),
            ObjectKind::Soft(_) | ObjectKind::Actor(_) => true,
            ObjectKind::Simple | ObjectKind::Ghost => false,
        }
    }

    /// Collision group
    pub fn group(&self) -> CollisionGroupId {
        self.group
    }

    /// World transform
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Teleport the object
    ///
    /// Soft body nodes are carried along rigidly. Sleeping rigid bodies
    /// wake up.
    pub(crate) fn set_transform(&mut self, transform: Transform) {
        match &mut self.kind {
            ObjectKind::Soft(body) => {
                let delta = transform.combine(&self.transform.inverse());
                body.transform_nodes(&delta);
            }
            ObjectKind::Rigid(body) => body.enable(),
            _ => {}
        }
        self.transform = transform;
    }

    /// World position; the node centroid for soft bodies
    pub fn position(&self) -> Vec3 {
        match &self.kind {
            ObjectKind::Soft(body) => body.centroid(),
            _ => self.transform.position,
        }
    }

    /// World bounding box, `None` for collision-inert objects
    pub fn world_aabb(&self) -> Option<AABB> {
        match &self.kind {
            ObjectKind::Soft(body) => body.aabb(),
            _ => self.collider.as_ref().map(|c| c.world_aabb(&self.transform)),
        }
    }

    /// Attach a movable that receives the transform after each step
    pub fn attach_movable(&mut self, movable: impl MovableSink + 'static) {
        self.movable = Some(Box::new(movable));
    }

    /// Detach the movable
    pub fn detach_movable(&mut self) {
        self.movable = None;
    }

    /// Attach a camera that follows the object
    pub fn attach_camera(&mut self, camera: impl MovableSink + 'static) {
        self.camera = Some(Box::new(camera));
    }

    /// Detach the camera
    pub fn detach_camera(&mut self) {
        self.camera = None;
    }

    /// Install the collision callback
    pub fn set_collision_callback(&mut self, callback: impl CollisionCallback + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Objects touched during the last step
    pub fn contacts(&self) -> &[ObjectId] {
        &self.contacts
    }

    /// Sector the object is in
    pub fn sector(&self) -> Option<SectorId> {
        self.sector
    }

    /// Push the transform to the attached movable and camera
    pub(crate) fn sync_sinks(&mut self) {
        let transform = self.transform;
        if let Some(movable) = &mut self.movable {
            movable.set_transform(&transform);
        }
        if let Some(camera) = &mut self.camera {
            camera.set_transform(&transform);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_dynamic_body_refuses_static_only_collider() {
        let err = CollisionObject::rigid_body("floor", Collider::plane(Vec3::y(), 0.0), RigidBody::new_dynamic(1.0));
        assert_eq!(err.unwrap_err(), PhysicsError::StaticOnlyCollider("plane"));

        let ok = CollisionObject::rigid_body("floor", Collider::plane(Vec3::y(), 0.0), RigidBody::new_static());
        assert!(ok.is_ok());
    }

    #[test]
    fn test_capability_queries() {
        let ball = CollisionObject::rigid_body("ball", Collider::sphere(1.0), RigidBody::new_dynamic(1.0)).unwrap();
        assert!(ball.as_rigid_body().is_some());
        assert!(ball.as_soft_body().is_none());
        assert_eq!(ball.object_type(), CollisionObjectType::Physical);
        assert_eq!(ball.physical_type(), Some(PhysicalObjectType::RigidBody));

        let ghost = CollisionObject::ghost("trigger", Collider::sphere(1.0));
        assert_eq!(ghost.object_type(), CollisionObjectType::Ghost);
        assert!(ghost.physical_type().is_none());
        assert!(!ghost.is_dynamic());
    }

    #[test]
    fn test_sinks_receive_transform() {
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        let mut obj = CollisionObject::simple("crate", Collider::cuboid(Vec3::repeat(0.5)))
            .with_transform(Transform::from_position(Vec3::new(1.0, 2.0, 3.0)));
        obj.attach_movable(move |t: &Transform| *sink.borrow_mut() = Some(t.position));
        obj.sync_sinks();
        assert_eq!(*seen.borrow(), Some(Vec3::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn test_swapped_contact_flips_normal() {
        let mut ids = slotmap::SlotMap::<ObjectId, ()>::with_key();
        let (a, b) = (ids.insert(()), ids.insert(()));
        let data = CollisionData {
            object_a: a,
            object_b: b,
            position_on_a: Vec3::zeros(),
            position_on_b: Vec3::y(),
            normal_on_b: Vec3::y(),
            penetration: 0.1,
        };
        let swapped = data.swapped();
        assert_eq!(swapped.object_a, b);
        assert_eq!(swapped.normal_on_b, -Vec3::y());
        assert_eq!(swapped.position_on_a, Vec3::y());
    }
}

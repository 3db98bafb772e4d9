//! # Collision and Physics Sectors
//!
//! A [`PhysicsSystem`] owns every collision object, joint, vehicle and
//! portal in arenas and drives the [`CollisionSector`]s they are placed in.
//! Each sector keeps a KD-tree of its objects for the broad phase and for
//! beam queries.
//!
//! ## Object kinds
//!
//! - **Simple**: collider only, never moved by the simulation
//! - **Ghost**: reports overlaps, exerts no response
//! - **Actor**: kinematic character with walking, jumping and flying
//! - **Rigid body**: static, dynamic or kinematic
//! - **Soft body**: rope, cloth or mesh with per-node anchors

mod actor;
pub mod collider;
mod error;
pub mod factory;
pub mod geometry;
pub mod group;
mod joint;
mod object;
mod portal;
pub mod primitives;
mod query;
mod rigid_body;
mod sector;
mod soft_body;
mod solver;
mod step;
mod system;
mod vehicle;

#[cfg(test)]
mod tests;

slotmap::new_key_type! {
    /// Handle of a collision object
    pub struct ObjectId;
    /// Handle of a collision sector
    pub struct SectorId;
    /// Handle of a joint
    pub struct JointId;
    /// Handle of a vehicle
    pub struct VehicleId;
    /// Handle of a portal
    pub struct PortalId;
}

pub use actor::Actor;
pub use collider::{Collider, ConvexHull, Heightfield};
pub use error::PhysicsError;
pub use geometry::{ConnectedComponentDecomposer, ConvexDecomposer, GeometrySource, TriangleMesh};
pub use group::{CollisionGroup, CollisionGroupId, CollisionGroupTable, GroupMask};
pub use joint::{Joint, JointKind};
pub use object::{
    CollisionCallback, CollisionData, CollisionObject, CollisionObjectType, HitBeamResult, KinematicCallback,
    MovableSink, ObjectKind, PhysicalObjectType,
};
pub use portal::Portal;
pub use rigid_body::{RigidBody, RigidBodyState};
pub use sector::CollisionSector;
pub use soft_body::{Anchor, AnchorAnimationControl, SoftBody, SoftLink, SoftMaterial, SoftNode};
pub use system::PhysicsSystem;
pub use vehicle::{Vehicle, VehicleBrakeInfo, VehicleSteeringDevice, VehicleWheel};

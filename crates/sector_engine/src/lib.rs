//! # Sector Engine
//!
//! Spatial partitioning and sector-based collision/physics simulation.
//!
//! ## Features
//!
//! - **KD-tree**: Dynamic, lazily distributed spatial tree with
//!   front-to-back traversal and straddling objects
//! - **Culling**: Frustum culler walking the tree nearest region first
//! - **Sectors**: Independent collision regions connected by portals
//! - **Bodies**: Rigid bodies, soft bodies with anchors, actors, ghosts
//! - **Constraints**: Joints, springs and motors, raycast vehicles
//! - **Queries**: Hit beams (portal aware) and discrete collision tests
//!
//! ## Quick Start
//!
//! ```rust
//! use sector_engine::prelude::*;
//!
//! fn main() -> Result<(), PhysicsError> {
//!     let mut physics = PhysicsSystem::new(EngineConfig::default());
//!     let sector = physics.create_sector("world");
//!
//!     let ground = physics.add_object(CollisionObject::rigid_body(
//!         "ground",
//!         Collider::plane(Vec3::y(), 0.0),
//!         RigidBody::new_static(),
//!     )?);
//!     physics.add_collision_object(sector, ground)?;
//!
//!     let ball = physics.add_object(
//!         CollisionObject::rigid_body("ball", Collider::sphere(0.5), RigidBody::with_density(100.0))?
//!             .with_transform(Transform::from_position(Vec3::new(0.0, 5.0, 0.0))),
//!     );
//!     physics.add_collision_object(sector, ball)?;
//!
//!     for _ in 0..60 {
//!         physics.step(sector, 1.0 / 60.0)?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod physics;
pub mod spatial;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, EngineConfig, SimulationConfig},
        foundation::math::{Quat, Transform, Vec3},
        physics::{
            Collider, CollisionData, CollisionObject, CollisionObjectType, HitBeamResult, Joint, ObjectId,
            PhysicsError, PhysicsSystem, Portal, RigidBody, RigidBodyState, SectorId, SoftBody,
        },
        spatial::{ChildId, Frustum, FrustumCuller, KdTree, KdTreeConfig, Plane, AABB},
    };
}

//! Spatial partitioning data structures
//!
//! A dynamic KD-tree over movable bounded objects, the bounding volumes it
//! works with and a frustum culler that walks it front to back.

mod bounds;
mod culler;
pub mod kdtree;

pub use bounds::{Containment, Frustum, Plane, AABB};
pub use culler::FrustumCuller;
pub use kdtree::{ChildBounds, ChildId, KdTree, KdTreeConfig, KdTreeError, NodeId, VisitEpoch};

//! Objects stored in the tree

use super::NodeId;
use crate::foundation::math::Vec3;
use crate::spatial::AABB;

/// Bounding volume of a tree object
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChildBounds {
    /// Axis-aligned box
    Box(AABB),
    /// Sphere; the tree works on its bounding box
    Sphere {
        /// Sphere center
        center: Vec3,
        /// Sphere radius
        radius: f32,
    },
}

impl ChildBounds {
    /// Axis-aligned box of the volume
    pub fn bbox(&self) -> AABB {
        match *self {
            ChildBounds::Box(aabb) => aabb,
            ChildBounds::Sphere { center, radius } => AABB::from_sphere(center, radius),
        }
    }
}

impl From<AABB> for ChildBounds {
    fn from(aabb: AABB) -> Self {
        ChildBounds::Box(aabb)
    }
}

/// An object inside a [`KdTree`](super::KdTree)
///
/// An object straddling a split plane is listed in both leaves, so a child
/// keeps every leaf that references it.
#[derive(Debug, Clone)]
pub struct KdChild<T> {
    pub(super) object: T,
    pub(super) bounds: ChildBounds,
    pub(super) bbox: AABB,
    pub(super) leaves: Vec<NodeId>,
    pub(super) timestamp: u32,
}

impl<T> KdChild<T> {
    pub(super) fn new(object: T, bounds: ChildBounds) -> Self {
        Self {
            object,
            bbox: bounds.bbox(),
            bounds,
            leaves: Vec::with_capacity(2),
            timestamp: 0,
        }
    }

    /// The user object
    pub fn object(&self) -> &T {
        &self.object
    }

    /// The bounds as supplied by the caller
    pub fn bounds(&self) -> &ChildBounds {
        &self.bounds
    }

    /// Cached box of the bounds
    pub fn bbox(&self) -> &AABB {
        &self.bbox
    }

    /// Nodes that list this object
    pub fn leaves(&self) -> &[NodeId] {
        &self.leaves
    }

    pub(super) fn set_bounds(&mut self, bounds: ChildBounds) {
        self.bounds = bounds;
        self.bbox = bounds.bbox();
    }

    pub(super) fn add_leaf(&mut self, leaf: NodeId) {
        self.leaves.push(leaf);
    }

    pub(super) fn remove_leaf(&mut self, leaf: NodeId) {
        if let Some(idx) = self.leaves.iter().position(|l| *l == leaf) {
            self.leaves.swap_remove(idx);
        }
    }

    pub(super) fn replace_leaf(&mut self, old: NodeId, new: NodeId) {
        match self.leaves.iter_mut().find(|l| **l == old) {
            Some(slot) => *slot = new,
            None => {
                debug_assert!(false, "replace_leaf on a leaf the object does not belong to");
                self.leaves.push(new);
            }
        }
    }
}

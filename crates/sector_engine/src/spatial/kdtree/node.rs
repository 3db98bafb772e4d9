//! Tree nodes

use super::{ChildId, NodeId};
use crate::spatial::AABB;

/// Split axis of a branch node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Axis {
    /// World x axis
    #[default]
    X,
    /// World y axis
    Y,
    /// World z axis
    Z,
}

impl Axis {
    /// All axes in evaluation order
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Component index of this axis
    pub const fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Lowercase axis letter, for dumps
    pub const fn letter(self) -> char {
        match self {
            Axis::X => 'x',
            Axis::Y => 'y',
            Axis::Z => 'z',
        }
    }
}

/// A node of the KD-tree
///
/// A node is either a leaf or a branch with exactly two children. Branches
/// may still hold objects in their list: those are waiting for the next
/// [`distribute`](super::KdTree::distribute) to push them down.
#[derive(Debug, Clone)]
pub struct KdNode {
    pub(super) parent: Option<NodeId>,
    pub(super) children: Option<[NodeId; 2]>,
    pub(super) node_box: AABB,
    pub(super) split_axis: Axis,
    pub(super) split_location: f32,
    pub(super) objects: Vec<ChildId>,
    pub(super) estimate_total_objects: usize,
    pub(super) disallow_distribute: u32,
}

impl KdNode {
    pub(super) fn new(parent: Option<NodeId>, node_box: AABB) -> Self {
        Self {
            parent,
            children: None,
            node_box,
            split_axis: Axis::X,
            split_location: 0.0,
            objects: Vec::new(),
            estimate_total_objects: 0,
            disallow_distribute: 0,
        }
    }

    /// Parent node, `None` for the root
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// The two children of a branch
    pub fn children(&self) -> Option<[NodeId; 2]> {
        self.children
    }

    /// True when the node has no children
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Partition cell of this node
    ///
    /// Objects are not clipped to it, so an object listed here may protrude.
    pub fn node_box(&self) -> &AABB {
        &self.node_box
    }

    /// Split axis; only meaningful on branches
    pub fn split_axis(&self) -> Axis {
        self.split_axis
    }

    /// Split location; only meaningful on branches
    pub fn split_location(&self) -> f32 {
        self.split_location
    }

    /// Objects linked directly to this node
    pub fn objects(&self) -> &[ChildId] {
        &self.objects
    }

    /// Number of objects linked directly to this node
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Remaining calls before distribution is attempted again
    pub fn distribution_block(&self) -> u32 {
        self.disallow_distribute
    }

    pub(super) fn push_object(&mut self, child: ChildId) {
        self.objects.push(child);
        self.estimate_total_objects += 1;
    }

    pub(super) fn remove_object(&mut self, child: ChildId) -> bool {
        match self.objects.iter().position(|c| *c == child) {
            Some(idx) => {
                self.objects.remove(idx);
                self.estimate_total_objects = self.estimate_total_objects.saturating_sub(1);
                true
            }
            None => false,
        }
    }

    pub(super) fn relax_block(&mut self) {
        self.disallow_distribute = self.disallow_distribute.saturating_sub(1);
    }
}

//! Dynamic KD-tree over bounded, movable objects
//!
//! Objects are added to the root and only pushed down when
//! [`KdTree::distribute`] runs, usually from inside a traversal callback.
//! Nodes and objects live in slot maps and refer to each other by id: a
//! node lists the [`ChildId`]s it holds and every object lists the
//! [`NodeId`]s that hold it (two or more when it straddles a split).

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::config::Config;
use crate::spatial::AABB;

mod child;
mod debug;
mod node;
mod split;
mod traversal;

pub use child::{ChildBounds, KdChild};
pub use debug::TreeStatistics;
pub use node::{Axis, KdNode};
pub use split::{find_best_split_location, SplitCandidate};
pub use traversal::VisitEpoch;

/// Half size of the root cell
pub const KDTREE_MAX: f32 = 100_000.0;

slotmap::new_key_type! {
    /// Handle of a node inside a [`KdTree`]
    pub struct NodeId;

    /// Handle of an object stored in a [`KdTree`]
    pub struct ChildId;
}

/// Configuration for KD-tree behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdTreeConfig {
    /// A leaf is split only when it holds more objects than this
    pub min_split_objects: usize,

    /// Calls a node waits after a failed split before trying again
    pub block_time: u32,
}

impl KdTreeConfig {
    /// Set the split threshold
    pub fn with_min_split_objects(mut self, count: usize) -> Self {
        self.min_split_objects = count;
        self
    }

    /// Set the distribution block time
    pub fn with_block_time(mut self, block_time: u32) -> Self {
        self.block_time = block_time;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.block_time == 0 {
            return Err("block_time must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for KdTreeConfig {
    fn default() -> Self {
        Self {
            min_split_objects: 10,
            block_time: 20,
        }
    }
}

impl Config for KdTreeConfig {}

/// KD-tree errors
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum KdTreeError {
    /// The object handle is not (or no longer) in this tree
    #[error("Unknown tree object: {0:?}")]
    UnknownChild(ChildId),

    /// The node handle is not (or no longer) in this tree
    #[error("Unknown tree node: {0:?}")]
    UnknownNode(NodeId),

    /// A structural check failed
    #[error("Tree invariant violated at {node:?}: {reason}")]
    Invariant {
        /// Offending node
        node: NodeId,
        /// What was wrong
        reason: String,
    },
}

/// Dynamic KD-tree with lazy distribution
#[derive(Debug, Clone)]
pub struct KdTree<T> {
    nodes: SlotMap<NodeId, KdNode>,
    children: SlotMap<ChildId, KdChild<T>>,
    root: NodeId,
    config: KdTreeConfig,
    epoch: u32,
}

impl<T> Default for KdTree<T> {
    fn default() -> Self {
        Self::new(KdTreeConfig::default())
    }
}

impl<T> KdTree<T> {
    /// Create an empty tree
    pub fn new(config: KdTreeConfig) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(KdNode::new(None, AABB::symmetric(KDTREE_MAX)));
        Self {
            nodes,
            children: SlotMap::with_key(),
            root,
            config,
            epoch: 1,
        }
    }

    /// The root node
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Tree configuration
    pub fn config(&self) -> &KdTreeConfig {
        &self.config
    }

    /// Number of objects in the tree
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// True when the tree holds no objects
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of nodes, leaves included
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Look up a node
    pub fn node(&self, id: NodeId) -> Option<&KdNode> {
        self.nodes.get(id)
    }

    /// Look up an object record
    pub fn child(&self, id: ChildId) -> Option<&KdChild<T>> {
        self.children.get(id)
    }

    /// The user object behind a handle
    pub fn object(&self, id: ChildId) -> Option<&T> {
        self.children.get(id).map(|c| &c.object)
    }

    /// Mutable access to the user object behind a handle
    pub fn object_mut(&mut self, id: ChildId) -> Option<&mut T> {
        self.children.get_mut(id).map(|c| &mut c.object)
    }

    /// Objects linked directly to `node`; empty for unknown nodes
    pub fn node_objects(&self, node: NodeId) -> &[ChildId] {
        self.nodes.get(node).map_or(&[], |n| n.objects.as_slice())
    }

    /// All objects in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = (ChildId, &T)> {
        self.children.iter().map(|(id, c)| (id, &c.object))
    }

    /// Estimated number of objects in `node` and its descendants
    ///
    /// Only refreshed by distribution; objects straddling splits count once
    /// per leaf.
    pub fn estimated_object_count(&self, node: NodeId) -> usize {
        self.nodes.get(node).map_or(0, |n| n.estimate_total_objects)
    }

    /// Add an object to the tree
    ///
    /// The object is linked to the root; the tree shape does not change
    /// until the root is distributed.
    pub fn add_object(&mut self, bounds: impl Into<ChildBounds>, object: T) -> ChildId {
        let child = self.children.insert(KdChild::new(object, bounds.into()));
        let root = self.root;
        self.add_object_int(root, child);
        child
    }

    /// Give an object new bounds
    ///
    /// An object that still fits its only leaf stays put. Otherwise it is
    /// unlinked everywhere and re-added to the first ancestor of its old
    /// leaf whose cell contains the new box.
    pub fn move_object(&mut self, id: ChildId, bounds: impl Into<ChildBounds>) -> Result<(), KdTreeError> {
        let child = self.children.get_mut(id).ok_or(KdTreeError::UnknownChild(id))?;
        let old_box = child.bbox;
        child.set_bounds(bounds.into());
        let new_box = child.bbox;

        if (old_box.min - new_box.min).amax() < 1e-5 && (old_box.max - new_box.max).amax() < 1e-5 {
            return Ok(());
        }

        let Some(&first_leaf) = child.leaves.first() else {
            let root = self.root;
            self.add_object_int(root, id);
            return Ok(());
        };

        if child.leaves.len() == 1 {
            if let Some(leaf) = self.nodes.get_mut(first_leaf) {
                if leaf.node_box.contains(&new_box) {
                    leaf.relax_block();
                    return Ok(());
                }
            }
        }

        self.unlink_object(id);

        let mut target = first_leaf;
        while let Some(node) = self.nodes.get(target) {
            match node.parent {
                Some(parent) if !node.node_box.contains(&new_box) => target = parent,
                _ => break,
            }
        }
        if !self.nodes.contains_key(target) {
            target = self.root;
        }
        self.add_object_int(target, id);
        Ok(())
    }

    /// Remove an object and return the user value
    pub fn remove_object(&mut self, id: ChildId) -> Result<T, KdTreeError> {
        if !self.children.contains_key(id) {
            return Err(KdTreeError::UnknownChild(id));
        }
        self.unlink_object(id);
        self.children
            .remove(id)
            .map(|c| c.object)
            .ok_or(KdTreeError::UnknownChild(id))
    }

    /// Drop every object and node, leaving an empty root
    pub fn clear(&mut self) {
        self.children.clear();
        self.nodes.clear();
        self.root = self.nodes.insert(KdNode::new(None, AABB::symmetric(KDTREE_MAX)));
    }

    fn add_object_int(&mut self, node_id: NodeId, child_id: ChildId) {
        let (Some(node), Some(child)) = (self.nodes.get_mut(node_id), self.children.get_mut(child_id)) else {
            return;
        };
        node.relax_block();
        child.add_leaf(node_id);
        node.push_object(child_id);
    }

    fn unlink_object(&mut self, child_id: ChildId) {
        let Some(child) = self.children.get_mut(child_id) else {
            return;
        };
        for leaf in std::mem::take(&mut child.leaves).into_iter().rev() {
            if let Some(node) = self.nodes.get_mut(leaf) {
                let found = node.remove_object(child_id);
                debug_assert!(found, "object not listed in one of its leaves");
                node.relax_block();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;

    pub(super) fn unit_box_at(x: f32, y: f32, z: f32) -> AABB {
        AABB::from_center_extents(Vec3::new(x, y, z), Vec3::repeat(0.5))
    }

    #[test]
    fn test_add_object_links_to_root() {
        let mut tree = KdTree::new(KdTreeConfig::default());
        let a = tree.add_object(unit_box_at(0.0, 0.0, 0.0), "a");
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.node_objects(tree.root()), &[a]);
        assert_eq!(tree.child(a).map(|c| c.leaves().to_vec()), Some(vec![tree.root()]));
        assert_eq!(tree.estimated_object_count(tree.root()), 1);
    }

    #[test]
    fn test_remove_object_returns_value() {
        let mut tree = KdTree::default();
        let a = tree.add_object(unit_box_at(0.0, 0.0, 0.0), 7_u32);
        assert_eq!(tree.remove_object(a), Ok(7));
        assert!(tree.is_empty());
        assert!(tree.node_objects(tree.root()).is_empty());
        assert_eq!(tree.remove_object(a), Err(KdTreeError::UnknownChild(a)));
    }

    #[test]
    fn test_move_object_small_change_is_ignored() {
        let mut tree = KdTree::default();
        let a = tree.add_object(unit_box_at(0.0, 0.0, 0.0), ());
        tree.move_object(a, unit_box_at(0.000_001, 0.0, 0.0)).unwrap();
        assert_eq!(tree.node_objects(tree.root()), &[a]);
    }

    #[test]
    fn test_move_object_relinks_to_containing_ancestor() {
        let mut tree = KdTree::new(KdTreeConfig::default().with_min_split_objects(1));
        let a = tree.add_object(unit_box_at(-10.0, 0.0, 0.0), 'a');
        let b = tree.add_object(unit_box_at(10.0, 0.0, 0.0), 'b');
        tree.distribute(tree.root());

        let [left, _right] = tree.node(tree.root()).and_then(KdNode::children).unwrap();
        assert_eq!(tree.node_objects(left), &[a]);

        // Still inside the left cell: stays in its leaf
        tree.move_object(a, unit_box_at(-8.0, 0.0, 0.0)).unwrap();
        assert_eq!(tree.node_objects(left), &[a]);

        // Crosses the split: goes back to the root's pending list
        tree.move_object(a, unit_box_at(0.0, 0.0, 0.0)).unwrap();
        assert_eq!(tree.node_objects(tree.root()), &[a]);
        assert!(tree.node_objects(left).is_empty());
        assert_eq!(tree.child(b).map(|c| c.leaves().len()), Some(1));
        tree.check_tree().unwrap();
    }

    #[test]
    fn test_clear_resets_tree() {
        let mut tree = KdTree::default();
        for i in 0..20 {
            tree.add_object(unit_box_at(i as f32 * 3.0, 0.0, 0.0), i);
        }
        tree.full_distribute(tree.root());
        tree.clear();
        assert!(tree.is_empty());
        assert_eq!(tree.node_count(), 1);
        tree.check_tree().unwrap();
    }
}

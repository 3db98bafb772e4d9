//! Front-to-back visibility culling over a KD-tree

use super::kdtree::{ChildId, KdTree};
use super::{Containment, Frustum};
use crate::foundation::math::Vec3;

/// Collects the objects of a tree that lie inside a frustum
///
/// Nodes are classified against the planes still enabled in the traversal
/// mask. A node fully outside one plane prunes its subtree; planes a node
/// lies fully inside are dropped for its descendants. Nodes are distributed
/// as the walk reaches them.
#[derive(Debug, Clone)]
pub struct FrustumCuller {
    frustum: Frustum,
}

impl FrustumCuller {
    /// Create a culler for the given clip volume
    pub fn new(frustum: Frustum) -> Self {
        Self { frustum }
    }

    /// The clip volume
    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    /// Replace the clip volume
    pub fn set_frustum(&mut self, frustum: Frustum) {
        self.frustum = frustum;
    }

    /// Visible objects, nearest region to `viewpoint` first
    pub fn visible_objects<T>(&self, tree: &mut KdTree<T>, viewpoint: &Vec3) -> Vec<ChildId> {
        let mut visible = Vec::new();
        let frustum = &self.frustum;

        tree.front_to_back(viewpoint, frustum.full_mask(), |tree, node, epoch, mask| {
            let Some(cell) = tree.node(node).map(|n| *n.node_box()) else {
                return false;
            };
            if *mask != 0 {
                match frustum.classify(&cell, *mask) {
                    Containment::Outside => return false,
                    Containment::Partial(remaining) => *mask = remaining,
                }
            }

            tree.distribute(node);

            for child in tree.node_objects(node).to_vec() {
                if !tree.mark_visited(child, epoch) {
                    continue;
                }
                let inside = *mask == 0
                    || tree
                        .child(child)
                        .is_some_and(|c| frustum.classify(c.bbox(), *mask) != Containment::Outside);
                if inside {
                    visible.push(child);
                }
            }
            true
        });

        log::trace!("culler: {} of {} objects visible", visible.len(), tree.len());
        visible
    }
}

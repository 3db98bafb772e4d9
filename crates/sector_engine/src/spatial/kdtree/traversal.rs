//! Tree traversals

use super::{ChildId, KdTree, NodeId};
use crate::foundation::math::Vec3;
use crate::spatial::AABB;

/// Epochs above this wrap back to 1 after clearing every object stamp
const EPOCH_RESET: u32 = 4_000_000_000;

/// Identifies one traversal of a tree
///
/// An object listed in several leaves is processed once per traversal by
/// checking [`KdTree::mark_visited`] with the epoch handed to the visit
/// callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VisitEpoch(u32);

impl VisitEpoch {
    /// Raw epoch value
    pub fn value(self) -> u32 {
        self.0
    }
}

impl<T> KdTree<T> {
    /// Start a new traversal and return its epoch
    ///
    /// Called by [`front_to_back`](Self::front_to_back) and
    /// [`traverse_random`](Self::traverse_random); call it directly when
    /// walking nodes by hand.
    pub fn new_traversal(&mut self) -> VisitEpoch {
        if self.epoch > EPOCH_RESET {
            for child in self.children.values_mut() {
                child.timestamp = 0;
            }
            self.epoch = 1;
        } else {
            self.epoch += 1;
        }
        VisitEpoch(self.epoch)
    }

    /// Mark an object as visited during `epoch`
    ///
    /// Returns `true` the first time per epoch, `false` afterwards and for
    /// unknown handles.
    pub fn mark_visited(&mut self, id: ChildId, epoch: VisitEpoch) -> bool {
        match self.children.get_mut(id) {
            Some(child) if child.timestamp != epoch.0 => {
                child.timestamp = epoch.0;
                true
            }
            _ => false,
        }
    }

    /// Walk the tree front to back as seen from `viewpoint`
    ///
    /// `visit` is called for every reached node with the tree, the node, the
    /// traversal epoch and the frustum mask. It may shrink the mask, which
    /// is then handed by value to both children, and returns `false` to skip
    /// the node's subtree. The child on the viewpoint's side of the split
    /// (`viewpoint[axis] <= split` picks the first child) is walked first.
    /// The callback may distribute the node it is given.
    pub fn front_to_back<F>(&mut self, viewpoint: &Vec3, frustum_mask: u32, mut visit: F)
    where
        F: FnMut(&mut Self, NodeId, VisitEpoch, &mut u32) -> bool,
    {
        let epoch = self.new_traversal();
        let root = self.root;
        self.front_to_back_from(root, viewpoint, epoch, frustum_mask, &mut visit);
    }

    /// Front-to-back walk of a subtree with a caller-supplied epoch
    pub fn front_to_back_from<F>(&mut self, node: NodeId, viewpoint: &Vec3, epoch: VisitEpoch, frustum_mask: u32, visit: &mut F)
    where
        F: FnMut(&mut Self, NodeId, VisitEpoch, &mut u32) -> bool,
    {
        let mut mask = frustum_mask;
        if !visit(self, node, epoch, &mut mask) {
            return;
        }

        let Some(n) = self.nodes.get(node) else {
            return;
        };
        if let Some([child1, child2]) = n.children {
            let (first, second) = if viewpoint[n.split_axis.index()] <= n.split_location {
                (child1, child2)
            } else {
                (child2, child1)
            };
            self.front_to_back_from(first, viewpoint, epoch, mask, visit);
            self.front_to_back_from(second, viewpoint, epoch, mask, visit);
        }
    }

    /// Walk the tree without any ordering guarantee
    ///
    /// Same callback contract as [`front_to_back`](Self::front_to_back).
    pub fn traverse_random<F>(&mut self, frustum_mask: u32, mut visit: F)
    where
        F: FnMut(&mut Self, NodeId, VisitEpoch, &mut u32) -> bool,
    {
        let epoch = self.new_traversal();
        let root = self.root;
        self.traverse_random_from(root, epoch, frustum_mask, &mut visit);
    }

    fn traverse_random_from<F>(&mut self, node: NodeId, epoch: VisitEpoch, frustum_mask: u32, visit: &mut F)
    where
        F: FnMut(&mut Self, NodeId, VisitEpoch, &mut u32) -> bool,
    {
        let mut mask = frustum_mask;
        if !visit(self, node, epoch, &mut mask) {
            return;
        }
        if let Some([child1, child2]) = self.nodes.get(node).and_then(|n| n.children) {
            self.traverse_random_from(child1, epoch, mask, visit);
            self.traverse_random_from(child2, epoch, mask, visit);
        }
    }

    /// Every object once, nearest region first
    ///
    /// Nodes are distributed as they are reached, so repeated calls refine
    /// the tree.
    pub fn objects_front_to_back(&mut self, viewpoint: &Vec3) -> Vec<ChildId> {
        let mut ordered = Vec::with_capacity(self.len());
        self.front_to_back(viewpoint, 0, |tree, node, epoch, _| {
            tree.distribute(node);
            let pending = tree.node_objects(node).to_vec();
            for child in pending {
                if tree.mark_visited(child, epoch) {
                    ordered.push(child);
                }
            }
            true
        });
        ordered
    }

    /// Objects whose boxes overlap `aabb`
    pub fn query_box(&mut self, aabb: &AABB) -> Vec<ChildId> {
        self.collect_matching(|cell| cell.intersects(aabb), |bbox| bbox.intersects(aabb))
    }

    /// Objects whose boxes touch the segment `start..end`
    pub fn query_segment(&mut self, start: &Vec3, end: &Vec3) -> Vec<ChildId> {
        self.collect_matching(
            |cell| cell.intersects_segment(start, end),
            |bbox| bbox.intersects_segment(start, end),
        )
    }

    fn collect_matching(&mut self, node_test: impl Fn(&AABB) -> bool, object_test: impl Fn(&AABB) -> bool) -> Vec<ChildId> {
        let mut found = Vec::new();
        self.traverse_random(0, |tree, node, epoch, _| {
            let Some(n) = tree.nodes.get(node) else {
                return false;
            };
            if !node_test(&n.node_box) {
                return false;
            }
            let pending = n.objects.clone();
            for child in pending {
                let hit = tree.children.get(child).is_some_and(|c| object_test(&c.bbox));
                if hit && tree.mark_visited(child, epoch) {
                    found.push(child);
                }
            }
            true
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::kdtree::tests::unit_box_at;
    use crate::spatial::kdtree::KdTreeConfig;

    fn three_boxes() -> (KdTree<i32>, [ChildId; 3]) {
        let mut tree = KdTree::new(KdTreeConfig::default().with_min_split_objects(1));
        let a = tree.add_object(unit_box_at(-10.0, 0.0, 0.0), -10);
        let b = tree.add_object(unit_box_at(0.0, 0.0, 0.0), 0);
        let c = tree.add_object(unit_box_at(10.0, 0.0, 0.0), 10);
        (tree, [a, b, c])
    }

    #[test]
    fn test_front_to_back_order_follows_viewpoint() {
        let (mut tree, [a, b, c]) = three_boxes();

        let from_left = tree.objects_front_to_back(&Vec3::new(-20.0, 0.0, 0.0));
        assert_eq!(from_left, vec![a, b, c]);

        let from_right = tree.objects_front_to_back(&Vec3::new(20.0, 0.0, 0.0));
        assert_eq!(from_right, vec![c, b, a]);
        tree.check_tree().unwrap();
    }

    #[test]
    fn test_every_object_visited_once() {
        let mut tree = KdTree::new(KdTreeConfig::default().with_min_split_objects(2));
        let mut ids = Vec::new();
        for i in 0..40 {
            let x = (i % 8) as f32 * 3.0;
            let z = (i / 8) as f32 * 3.0;
            ids.push(tree.add_object(unit_box_at(x, 0.0, z), i));
        }
        // Long objects straddle many splits
        ids.push(tree.add_object(AABB::new(Vec3::new(-1.0, -1.0, 5.0), Vec3::new(30.0, 1.0, 5.5)), 100));
        ids.push(tree.add_object(AABB::new(Vec3::new(4.0, -1.0, -1.0), Vec3::new(4.5, 1.0, 20.0)), 101));
        tree.full_distribute(tree.root());

        let mut seen = tree.objects_front_to_back(&Vec3::new(7.0, 3.0, 2.0));
        assert_eq!(seen.len(), ids.len());
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), ids.len());

        let mut visited = 0;
        tree.traverse_random(0, |tree, node, epoch, _| {
            for child in tree.node_objects(node).to_vec() {
                if tree.mark_visited(child, epoch) {
                    visited += 1;
                }
            }
            true
        });
        assert_eq!(visited, ids.len());
    }

    #[test]
    fn test_mask_is_passed_by_value_to_children() {
        let (mut tree, _) = three_boxes();
        tree.full_distribute(tree.root());

        let mut masks = Vec::new();
        tree.front_to_back(&Vec3::zeros(), 0b111, |tree, node, _, mask| {
            masks.push(*mask);
            if node == tree.root() {
                *mask = 0b001;
            }
            true
        });
        assert_eq!(masks[0], 0b111);
        assert!(masks[1..].iter().all(|m| *m == 0b001));
    }

    #[test]
    fn test_returning_false_prunes_subtree() {
        let (mut tree, _) = three_boxes();
        tree.full_distribute(tree.root());
        let mut count = 0;
        tree.front_to_back(&Vec3::zeros(), 0, |_, _, _, _| {
            count += 1;
            false
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn test_epoch_wraps_and_resets_stamps() {
        let (mut tree, [a, ..]) = three_boxes();
        tree.epoch = EPOCH_RESET;
        let epoch = tree.new_traversal();
        assert!(tree.mark_visited(a, epoch));

        tree.epoch = EPOCH_RESET + 1;
        let wrapped = tree.new_traversal();
        assert_eq!(wrapped.value(), 1);
        assert!(tree.mark_visited(a, wrapped));
        assert!(!tree.mark_visited(a, wrapped));
    }

    #[test]
    fn test_query_box_and_segment() {
        let (mut tree, [a, b, c]) = three_boxes();
        tree.full_distribute(tree.root());

        let near_origin = tree.query_box(&AABB::symmetric(2.0));
        assert_eq!(near_origin, vec![b]);

        let mut along_x = tree.query_segment(&Vec3::new(-20.0, 0.0, 0.0), &Vec3::new(20.0, 0.0, 0.0));
        along_x.sort();
        let mut expected = vec![a, b, c];
        expected.sort();
        assert_eq!(along_x, expected);

        assert!(tree.query_segment(&Vec3::new(-20.0, 5.0, 0.0), &Vec3::new(20.0, 5.0, 0.0)).is_empty());
    }
}

//! Split selection and lazy distribution

use std::collections::HashSet;

use super::{Axis, ChildId, KdNode, KdTree, NodeId};
use crate::spatial::AABB;

/// Objects touching the split plane within this distance go left
const SMALL_EPSILON: f32 = 0.000_001;

/// Gap two objects need before the special case separates them
const PAIR_GAP: f32 = 0.01;

/// Intervals narrower than this are never split
const MIN_SPLIT_WIDTH: f32 = 0.0001;

/// Tolerance used when classifying objects against a candidate
const CLASSIFY_EPSILON: f32 = 0.0001;

/// Bisection passes of the general case
const SPLIT_ATTEMPTS: usize = 5;

/// Best split found on one axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitCandidate {
    /// Higher is better; zero or less means "do not split"
    pub quality: i64,
    /// Split coordinate along the evaluated axis
    pub location: f32,
}

impl SplitCandidate {
    const REJECTED: SplitCandidate = SplitCandidate { quality: -1, location: 0.0 };
}

/// Evaluate split locations for a set of object boxes along `axis`
///
/// Two objects are split in the middle of the gap between them if there is
/// one (quality 10). Larger sets bisect the object extent, clamped to the
/// node cell, five times, scoring each candidate by
/// `3 * (left + right) - |left - right|` and moving toward the side with
/// fewer objects.
pub fn find_best_split_location(objects: &[AABB], node_box: &AABB, axis: Axis) -> SplitCandidate {
    let a = axis.index();

    if let [bbox0, bbox1] = objects {
        let (min0, max0) = (bbox0.min[a], bbox0.max[a]);
        let (min1, max1) = (bbox1.min[a], bbox1.max[a]);
        if max0 < min1 - PAIR_GAP {
            return SplitCandidate { quality: 10, location: max0 + (min1 - max0) * 0.5 };
        }
        if max1 < min0 - PAIR_GAP {
            return SplitCandidate { quality: 10, location: max1 + (min0 - max1) * 0.5 };
        }
        return SplitCandidate::REJECTED;
    }

    if objects.is_empty() {
        return SplitCandidate::REJECTED;
    }

    let mut mina = f32::INFINITY;
    let mut maxa = f32::NEG_INFINITY;
    for bbox in objects {
        mina = mina.min(bbox.min[a]);
        maxa = maxa.max(bbox.max[a]);
    }

    // objects straddling earlier splits may reach outside the cell
    mina = mina.max(node_box.min[a]);
    maxa = maxa.min(node_box.max[a]);

    if !((mina - maxa).abs() >= MIN_SPLIT_WIDTH) {
        return SplitCandidate::REJECTED;
    }

    let mut best = SplitCandidate { quality: -2, location: mina };
    for _ in 0..SPLIT_ATTEMPTS {
        let candidate = (mina + maxa) * 0.5;

        let mut left = 0_i64;
        let mut right = 0_i64;
        for bbox in objects {
            if bbox.max[a] < candidate - CLASSIFY_EPSILON {
                left += 1;
            } else if bbox.min[a] > candidate + CLASSIFY_EPSILON {
                right += 1;
            }
        }

        let quality = if left == 0 || right == 0 {
            -1
        } else {
            3 * (left + right) - (left - right).abs()
        };

        if quality > best.quality {
            best = SplitCandidate { quality, location: candidate };
        }

        if left <= right {
            maxa = candidate;
        } else {
            mina = candidate;
        }
    }

    best
}

impl<T> KdTree<T> {
    /// Distribute the pending objects of one node
    ///
    /// A branch pushes its pending objects into its children. A leaf with
    /// more than `min_split_objects` objects looks for the best split over
    /// all three axes; when none is useful the node is blocked for
    /// `block_time` calls. Only this node is affected, never descendants.
    pub fn distribute(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get(node_id) else {
            return;
        };
        if node.objects.is_empty() || node.disallow_distribute > 0 {
            return;
        }

        if let Some(children) = node.children {
            let (axis, location) = (node.split_axis, node.split_location);
            self.distribute_leaf_objects(node_id, children, axis, location);
            self.refresh_estimate(node_id, children);
            return;
        }

        if node.objects.len() <= self.config.min_split_objects {
            return;
        }

        let boxes: Vec<AABB> = node
            .objects
            .iter()
            .filter_map(|c| self.children.get(*c).map(|child| child.bbox))
            .collect();
        let node_box = node.node_box;

        let mut best_axis = Axis::X;
        let mut best = find_best_split_location(&boxes, &node_box, Axis::X);
        for axis in [Axis::Y, Axis::Z] {
            let candidate = find_best_split_location(&boxes, &node_box, axis);
            if candidate.quality > best.quality {
                best_axis = axis;
                best = candidate;
            }
        }

        if best.quality <= 0 {
            log::trace!("kd-tree: no useful split for {} objects, blocking node", boxes.len());
            if let Some(node) = self.nodes.get_mut(node_id) {
                node.disallow_distribute = self.config.block_time;
            }
            return;
        }

        let axis_index = best_axis.index();
        let mut box1 = node_box;
        box1.max[axis_index] = best.location;
        let mut box2 = node_box;
        box2.min[axis_index] = best.location;

        let child1 = self.nodes.insert(KdNode::new(Some(node_id), box1));
        let child2 = self.nodes.insert(KdNode::new(Some(node_id), box2));
        let children = [child1, child2];

        if let Some(node) = self.nodes.get_mut(node_id) {
            node.children = Some(children);
            node.split_axis = best_axis;
            node.split_location = best.location;
        }

        log::debug!(
            "kd-tree: split {} objects on {} at {} (quality {})",
            boxes.len(),
            best_axis.letter(),
            best.location,
            best.quality
        );

        self.distribute_leaf_objects(node_id, children, best_axis, best.location);
        self.refresh_estimate(node_id, children);
    }

    /// Distribute a node and then, recursively, all of its descendants
    pub fn full_distribute(&mut self, node_id: NodeId) {
        self.distribute(node_id);
        if let Some([child1, child2]) = self.nodes.get(node_id).and_then(|n| n.children) {
            self.full_distribute(child1);
            self.full_distribute(child2);
        }
    }

    /// Collapse all descendants of a node back into its object list
    ///
    /// Also lifts any distribution block on the node.
    pub fn flatten(&mut self, node_id: NodeId) {
        let Some(children) = self.nodes.get(node_id).and_then(|n| n.children) else {
            return;
        };

        let mut descendants = HashSet::new();
        let mut stack = children.to_vec();
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(id) {
                stack.extend(node.children.iter().flatten());
                descendants.insert(id);
            }
        }

        let mut gathered: Vec<ChildId> = Vec::new();
        for id in &descendants {
            if let Some(node) = self.nodes.remove(*id) {
                gathered.extend(node.objects);
            }
        }

        for child_id in gathered {
            let Some(child) = self.children.get_mut(child_id) else {
                continue;
            };
            child.leaves.retain(|leaf| !descendants.contains(leaf));
            if !child.leaves.contains(&node_id) {
                child.leaves.push(node_id);
                if let Some(node) = self.nodes.get_mut(node_id) {
                    node.objects.push(child_id);
                }
            }
        }

        if let Some(node) = self.nodes.get_mut(node_id) {
            node.children = None;
            node.disallow_distribute = 0;
            node.estimate_total_objects = node.objects.len();
        }
    }

    fn distribute_leaf_objects(&mut self, node_id: NodeId, [child1, child2]: [NodeId; 2], axis: Axis, location: f32) {
        let Some(node) = self.nodes.get_mut(node_id) else {
            return;
        };
        let pending = std::mem::take(&mut node.objects);
        let a = axis.index();

        for child_id in pending {
            let Some(child) = self.children.get_mut(child_id) else {
                continue;
            };
            let bbox_min = child.bbox.min[a];
            let bbox_max = child.bbox.max[a];

            let mut to_left = bbox_min - SMALL_EPSILON <= location;
            let to_right = bbox_max >= location;
            if !to_left && !to_right {
                // NaN bounds: keep the object reachable
                to_left = true;
            }

            if to_left {
                child.replace_leaf(node_id, child1);
                if let Some(left) = self.nodes.get_mut(child1) {
                    left.push_object(child_id);
                }
            }
            if to_right {
                if to_left {
                    child.add_leaf(child2);
                } else {
                    child.replace_leaf(node_id, child2);
                }
                if let Some(right) = self.nodes.get_mut(child2) {
                    right.push_object(child_id);
                }
            }
        }
    }

    fn refresh_estimate(&mut self, node_id: NodeId, [child1, child2]: [NodeId; 2]) {
        let total = self.estimated_object_count(child1) + self.estimated_object_count(child2);
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.estimate_total_objects = total;
        }
    }
}

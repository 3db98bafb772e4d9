//! Structural checks and statistics

use std::fmt::{self, Write as _};

use super::{KdTree, KdTreeError, NodeId};

/// Shape summary of a tree
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TreeStatistics {
    /// Object references over all nodes (straddling objects count per leaf)
    pub objects: usize,
    /// Branch nodes
    pub nodes: usize,
    /// Leaf nodes
    pub leaves: usize,
    /// Deepest level reached, the root being level 1
    pub max_depth: usize,
    /// Average of `2 * left / (left + right)` over branches; 1.0 is balanced
    pub balance_quality: f32,
}

impl fmt::Display for TreeStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#o={} #n={} #l={} maxd={} balqual={}",
            self.objects, self.nodes, self.leaves, self.max_depth, self.balance_quality
        )
    }
}

impl<T> KdTree<T> {
    /// Verify the structural invariants of the whole tree
    ///
    /// Checks that every node has zero or two children, that a branch's cell
    /// is the union of its children's cells and contains its split
    /// location, that parent links are right, and that every listed object
    /// lists the node back exactly once.
    pub fn check_tree(&self) -> Result<(), KdTreeError> {
        self.check_node(self.root, None)
    }

    fn check_node(&self, id: NodeId, expected_parent: Option<NodeId>) -> Result<(), KdTreeError> {
        let node = self.nodes.get(id).ok_or(KdTreeError::UnknownNode(id))?;
        let fail = |reason: &str| -> Result<(), KdTreeError> {
            Err(KdTreeError::Invariant {
                node: id,
                reason: reason.to_string(),
            })
        };

        if node.parent != expected_parent {
            return fail("parent check");
        }

        if let Some([child1, child2]) = node.children {
            let c1 = self.nodes.get(child1).ok_or(KdTreeError::UnknownNode(child1))?;
            let c2 = self.nodes.get(child2).ok_or(KdTreeError::UnknownNode(child2))?;
            let cell = &node.node_box;
            let axis = node.split_axis.index();

            if !cell.contains(&c1.node_box) || !cell.contains(&c2.node_box) {
                return fail("node box does not contain child boxes");
            }
            if node.split_location < cell.min[axis] || node.split_location > cell.max[axis] {
                return fail("split location outside node box");
            }
            if c1.node_box.union(&c2.node_box) != *cell {
                return fail("node box is not the union of child boxes");
            }

            self.check_node(child1, Some(id))?;
            self.check_node(child2, Some(id))?;
        }

        for child_id in &node.objects {
            let child = self.children.get(*child_id).ok_or(KdTreeError::UnknownChild(*child_id))?;
            match child.leaves.iter().filter(|leaf| **leaf == id).count() {
                1 => {}
                0 => return fail("leaf list doesn't contain node"),
                _ => return fail("node occurs multiple times in leaf list"),
            }
        }

        Ok(())
    }

    /// Collect shape statistics
    pub fn statistics(&self) -> TreeStatistics {
        let mut stats = TreeStatistics::default();
        let mut balance = 0.0;
        self.collect_statistics(self.root, 0, &mut stats, &mut balance);
        if stats.nodes > 0 {
            stats.balance_quality = balance / stats.nodes as f32;
        }
        stats
    }

    /// Returns the number of object references in the subtree
    fn collect_statistics(&self, id: NodeId, depth: usize, stats: &mut TreeStatistics, balance: &mut f32) -> usize {
        let Some(node) = self.nodes.get(id) else {
            return 0;
        };
        let depth = depth + 1;
        stats.max_depth = stats.max_depth.max(depth);
        stats.objects += node.objects.len();

        let Some([child1, child2]) = node.children else {
            stats.leaves += 1;
            return node.objects.len();
        };

        stats.nodes += 1;
        let left = self.collect_statistics(child1, depth, stats, balance);
        let right = self.collect_statistics(child2, depth, stats, balance);
        if left + right > 0 {
            *balance += 2.0 * left as f32 / (left + right) as f32;
        }
        node.objects.len() + left + right
    }

    /// Indented text rendering of the tree shape
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(self.root, 0, &mut out);
        out
    }

    fn dump_node(&self, id: NodeId, indent: usize, out: &mut String) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let pad = " ".repeat(indent);
        let _ = writeln!(
            out,
            "{pad}node objects={} estimate={} block={}",
            node.objects.len(),
            node.estimate_total_objects,
            node.disallow_distribute
        );
        if let Some([child1, child2]) = node.children {
            let _ = writeln!(out, "{pad}   axis={} loc={}", node.split_axis.letter(), node.split_location);
            self.dump_node(child1, indent + 2, out);
            self.dump_node(child2, indent + 2, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::foundation::math::Vec3;
    use crate::spatial::kdtree::tests::unit_box_at;
    use crate::spatial::kdtree::{KdTree, KdTreeConfig, KdTreeError};

    #[test]
    fn test_statistics_of_split_tree() {
        let mut tree = KdTree::new(KdTreeConfig::default().with_min_split_objects(1));
        for x in [-10.0, 0.0, 10.0] {
            tree.add_object(unit_box_at(x, 0.0, 0.0), x);
        }
        tree.full_distribute(tree.root());

        let stats = tree.statistics();
        assert_eq!(stats.objects, 3);
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.leaves, 3);
        assert_eq!(stats.max_depth, 3);
        assert!(stats.to_string().starts_with("#o=3 #n=2 #l=3 maxd=3"));
    }

    #[test]
    fn test_check_tree_detects_broken_links() {
        let mut tree = KdTree::new(KdTreeConfig::default());
        let a = tree.add_object(unit_box_at(0.0, 0.0, 0.0), ());
        tree.check_tree().unwrap();

        tree.children[a].leaves.push(tree.root);
        assert!(matches!(tree.check_tree(), Err(KdTreeError::Invariant { .. })));
    }

    #[test]
    fn test_invariants_hold_under_churn() {
        let mut tree = KdTree::new(KdTreeConfig::default().with_min_split_objects(3));
        let mut ids = Vec::new();
        for i in 0..60 {
            let p = Vec3::new((i * 7 % 23) as f32, (i * 3 % 5) as f32, (i * 11 % 17) as f32);
            ids.push(tree.add_object(unit_box_at(p.x, p.y, p.z), i));
        }
        tree.full_distribute(tree.root());
        tree.check_tree().unwrap();

        for (n, id) in ids.iter().enumerate() {
            let shift = if n % 2 == 0 { 9.0 } else { -4.0 };
            let b = tree.child(*id).unwrap().bbox().center();
            tree.move_object(*id, unit_box_at(b.x + shift, b.y, b.z - shift)).unwrap();
        }
        tree.check_tree().unwrap();
        tree.full_distribute(tree.root());
        tree.check_tree().unwrap();

        for id in ids.iter().step_by(3) {
            tree.remove_object(*id).unwrap();
        }
        tree.check_tree().unwrap();
        assert_eq!(tree.len(), 40);
        assert_eq!(tree.objects_front_to_back(&Vec3::zeros()).len(), 40);
    }
}

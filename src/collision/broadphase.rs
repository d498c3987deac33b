use std::collections::BinaryHeap;

use crate::utils::allocator::{Pool, NIL};
use crate::utils::math::{Aabb, Ray};

/// Leaf/internal node of the growable AABB tree. Leaves carry the proxied
/// body index; internal nodes own exactly two children.
#[derive(Debug, Clone, Copy)]
struct BvhNode {
    bbox: Aabb,
    parent: u32,
    left: u32,
    right: u32,
    id: u32,
}

impl BvhNode {
    fn is_leaf(&self) -> bool {
        self.left == NIL
    }
}

/// Min-heap entry ordered by a floating cost or ray parameter.
#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    cost: f32,
    node: u32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.node == other.node
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // inverted so the BinaryHeap pops the smallest cost first
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Dynamic bounding volume hierarchy over body proxies.
///
/// Insertion descends best-first using the branch-and-bound cost
/// `inherited + area(union(node, new))`, pruning subtrees whose lower bound
/// already exceeds the best full cost (Catto's incremental SAH).
pub struct DynamicBvh {
    nodes: Pool<BvhNode>,
    root: u32,
}

impl Default for DynamicBvh {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicBvh {
    pub fn new() -> Self {
        Self {
            nodes: Pool::new(),
            root: NIL,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = NIL;
    }

    pub fn leaf_count(&self) -> u32 {
        self.nodes.iter().filter(|(_, n)| n.is_leaf()).count() as u32
    }

    pub fn proxy_bbox(&self, proxy: u32) -> Aabb {
        self.nodes.at(proxy).bbox
    }

    /// Inserts a proxy for `id` and returns its leaf index.
    pub fn insert(&mut self, id: u32, bbox: Aabb) -> u32 {
        let leaf = self.nodes.insert(BvhNode {
            bbox,
            parent: NIL,
            left: NIL,
            right: NIL,
            id,
        });

        if self.root == NIL {
            self.root = leaf;
            return leaf;
        }

        let sibling = self.find_best_sibling(bbox);

        // new internal node hosts the old occupant and the new leaf
        let old_parent = self.nodes.at(sibling).parent;
        let merged = self.nodes.at(sibling).bbox.union(&bbox);
        let new_parent = self.nodes.insert(BvhNode {
            bbox: merged,
            parent: old_parent,
            left: sibling,
            right: leaf,
            id: NIL,
        });
        self.nodes.at_mut(sibling).parent = new_parent;
        self.nodes.at_mut(leaf).parent = new_parent;

        if old_parent == NIL {
            self.root = new_parent;
        } else {
            let p = self.nodes.at_mut(old_parent);
            if p.left == sibling {
                p.left = new_parent;
            } else {
                p.right = new_parent;
            }
        }

        self.refit_upwards(new_parent);
        leaf
    }

    pub fn remove(&mut self, leaf: u32) {
        debug_assert!(self.nodes.at(leaf).is_leaf());
        let parent = self.nodes.at(leaf).parent;
        self.nodes.remove(leaf);

        if parent == NIL {
            self.root = NIL;
            return;
        }

        // contract the parent: the sibling takes its place
        let p = *self.nodes.at(parent);
        let sibling = if p.left == leaf { p.right } else { p.left };
        let grandparent = p.parent;
        self.nodes.remove(parent);
        self.nodes.at_mut(sibling).parent = grandparent;

        if grandparent == NIL {
            self.root = sibling;
            return;
        }
        let g = self.nodes.at_mut(grandparent);
        if g.left == parent {
            g.left = sibling;
        } else {
            g.right = sibling;
        }
        self.refit_upwards(grandparent);
    }

    fn find_best_sibling(&self, bbox: Aabb) -> u32 {
        let mut best = self.root;
        let mut best_cost = self.nodes.at(self.root).bbox.union(&bbox).surface_area();
        let mut queue = BinaryHeap::new();
        queue.push(HeapEntry {
            cost: 0.0,
            node: self.root,
        });

        while let Some(HeapEntry {
            cost: inherited,
            node,
        }) = queue.pop()
        {
            if inherited + bbox.surface_area() >= best_cost {
                break;
            }
            let n = self.nodes.at(node);
            let direct = n.bbox.union(&bbox).surface_area();
            let cost = inherited + direct;
            if cost < best_cost {
                best_cost = cost;
                best = node;
            }
            if !n.is_leaf() {
                let child_inherited = inherited + direct - n.bbox.surface_area();
                if child_inherited + bbox.surface_area() < best_cost {
                    queue.push(HeapEntry {
                        cost: child_inherited,
                        node: n.left,
                    });
                    queue.push(HeapEntry {
                        cost: child_inherited,
                        node: n.right,
                    });
                }
            }
        }
        best
    }

    fn refit_upwards(&mut self, mut node: u32) {
        while node != NIL {
            self.rotate(node);
            let n = *self.nodes.at(node);
            let merged = self
                .nodes
                .at(n.left)
                .bbox
                .union(&self.nodes.at(n.right).bbox);
            self.nodes.at_mut(node).bbox = merged;
            node = n.parent;
        }
    }

    /// Grandchild/sibling swap when it shrinks the child box (tree rotation).
    fn rotate(&mut self, node: u32) {
        let n = *self.nodes.at(node);
        if n.is_leaf() {
            return;
        }

        for (child, sibling) in [(n.left, n.right), (n.right, n.left)] {
            let c = *self.nodes.at(child);
            if c.is_leaf() {
                continue;
            }
            let sibling_box = self.nodes.at(sibling).bbox;
            let current_area = c.bbox.surface_area();
            let swap_left_area = sibling_box.union(&self.nodes.at(c.right).bbox).surface_area();
            let swap_right_area = sibling_box.union(&self.nodes.at(c.left).bbox).surface_area();

            if swap_left_area < current_area && swap_left_area <= swap_right_area {
                // sibling replaces c.left
                self.swap_into(child, sibling, node, c.left, true);
                return;
            }
            if swap_right_area < current_area {
                self.swap_into(child, sibling, node, c.right, false);
                return;
            }
        }
    }

    fn swap_into(&mut self, child: u32, sibling: u32, node: u32, grandchild: u32, left_slot: bool) {
        {
            let c = self.nodes.at_mut(child);
            if left_slot {
                c.left = sibling;
            } else {
                c.right = sibling;
            }
        }
        self.nodes.at_mut(sibling).parent = child;
        self.nodes.at_mut(grandchild).parent = node;
        {
            let n = self.nodes.at_mut(node);
            if n.left == sibling {
                n.left = grandchild;
            } else {
                n.right = grandchild;
            }
        }
        let c = *self.nodes.at(child);
        let merged = self
            .nodes
            .at(c.left)
            .bbox
            .union(&self.nodes.at(c.right).bbox);
        self.nodes.at_mut(child).bbox = merged;
    }

    /// Symmetric self-query: every unordered leaf pair with overlapping
    /// proxies, ids normalized to `(low, high)`.
    pub fn push_overlap_pairs(&self, out: &mut Vec<(u32, u32)>) {
        if self.root == NIL || self.nodes.at(self.root).is_leaf() {
            return;
        }
        let mut stack = vec![(
            self.nodes.at(self.root).left,
            self.nodes.at(self.root).right,
        )];
        let mut self_stack = vec![self.nodes.at(self.root).left, self.nodes.at(self.root).right];

        while let Some(node) = self_stack.pop() {
            let n = self.nodes.at(node);
            if n.is_leaf() {
                continue;
            }
            self_stack.push(n.left);
            self_stack.push(n.right);
            stack.push((n.left, n.right));
        }

        while let Some((a, b)) = stack.pop() {
            let na = self.nodes.at(a);
            let nb = self.nodes.at(b);
            if !na.bbox.overlaps(&nb.bbox) {
                continue;
            }
            match (na.is_leaf(), nb.is_leaf()) {
                (true, true) => {
                    let (lo, hi) = if na.id < nb.id {
                        (na.id, nb.id)
                    } else {
                        (nb.id, na.id)
                    };
                    out.push((lo, hi));
                }
                (false, true) => {
                    stack.push((na.left, b));
                    stack.push((na.right, b));
                }
                (true, false) => {
                    stack.push((a, nb.left));
                    stack.push((a, nb.right));
                }
                (false, false) => {
                    stack.push((na.left, nb.left));
                    stack.push((na.left, nb.right));
                    stack.push((na.right, nb.left));
                    stack.push((na.right, nb.right));
                }
            }
        }
    }

    /// Best-first raycast descent ordered by slab entry parameter. `hit_leaf`
    /// receives `(id, current_best)` and returns the (possibly improved)
    /// best parameter; nodes whose entry exceeds the best are pruned.
    pub fn raycast(&self, ray: &Ray, mut best: f32, mut hit_leaf: impl FnMut(u32, f32) -> f32) -> f32 {
        if self.root == NIL {
            return best;
        }
        let mut queue = BinaryHeap::new();
        if let Some(t) = self.nodes.at(self.root).bbox.ray_entry(ray, best) {
            queue.push(HeapEntry {
                cost: t,
                node: self.root,
            });
        }

        while let Some(HeapEntry { cost, node }) = queue.pop() {
            if cost > best {
                break;
            }
            let n = self.nodes.at(node);
            if n.is_leaf() {
                best = hit_leaf(n.id, best);
                continue;
            }
            for child in [n.left, n.right] {
                if let Some(t) = self.nodes.at(child).bbox.ray_entry(ray, best) {
                    queue.push(HeapEntry {
                        cost: t,
                        node: child,
                    });
                }
            }
        }
        best
    }

    /// Debug sweep over parent/child links and bounding containment.
    pub fn validate(&self) {
        if self.root == NIL {
            return;
        }
        debug_assert_eq!(self.nodes.at(self.root).parent, NIL);
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            let n = self.nodes.at(node);
            if n.is_leaf() {
                continue;
            }
            debug_assert_eq!(self.nodes.at(n.left).parent, node);
            debug_assert_eq!(self.nodes.at(n.right).parent, node);
            debug_assert!(n.bbox.contains(&self.nodes.at(n.left).bbox));
            debug_assert!(n.bbox.contains(&self.nodes.at(n.right).bbox));
            stack.push(n.left);
            stack.push(n.right);
        }
    }
}

// Search nodes for corridor search and circle flooding

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::math::Vec3;
use crate::nav_mesh::PolyRef;

pub const NODE_OPEN: u8 = 0x01;
pub const NODE_CLOSED: u8 = 0x02;

#[derive(Debug, Clone)]
pub struct Node {
    pub pos: Vec3,
    /// Cost from the start node
    pub cost: f32,
    /// Cost plus heuristic
    pub total: f32,
    pub parent: Option<usize>,
    /// Which tile border the node was entered through
    pub state: u8,
    pub flags: u8,
    pub id: PolyRef,
}

/// Fixed-capacity node storage keyed by (polygon, state)
#[derive(Debug)]
pub struct NodePool {
    nodes: Vec<Node>,
    lookup: HashMap<(PolyRef, u8), usize>,
    max_nodes: usize,
}

impl NodePool {
    pub fn new(max_nodes: usize) -> Self {
        NodePool {
            nodes: Vec::with_capacity(max_nodes),
            lookup: HashMap::with_capacity(max_nodes),
            max_nodes,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.lookup.clear();
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the node for (id, state), allocating it if needed.
    /// `None` once the pool is full.
    pub fn get_node(&mut self, id: PolyRef, state: u8) -> Option<usize> {
        if let Some(&idx) = self.lookup.get(&(id, state)) {
            return Some(idx);
        }
        if self.nodes.len() >= self.max_nodes {
            return None;
        }

        let idx = self.nodes.len();
        self.nodes.push(Node {
            pos: [0.0; 3],
            cost: 0.0,
            total: 0.0,
            parent: None,
            state,
            flags: 0,
            id,
        });
        self.lookup.insert((id, state), idx);
        Some(idx)
    }

    pub fn find_node(&self, id: PolyRef, state: u8) -> Option<usize> {
        self.lookup.get(&(id, state)).copied()
    }

    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: usize) -> &mut Node {
        &mut self.nodes[idx]
    }
}

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    total: f32,
    idx: usize,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // Reversed so the heap pops the smallest total first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .total
            .total_cmp(&self.total)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

/// Open list. Re-pushing a node replaces its priority; stale entries are
/// skipped on pop.
#[derive(Debug, Default)]
pub struct NodeQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl NodeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn push(&mut self, pool: &NodePool, idx: usize) {
        self.heap.push(QueueEntry {
            total: pool.node(idx).total,
            idx,
        });
    }

    /// Pop the open node with the lowest total cost
    pub fn pop(&mut self, pool: &NodePool) -> Option<usize> {
        while let Some(entry) = self.heap.pop() {
            let node = pool.node(entry.idx);
            if node.flags & NODE_OPEN != 0 && node.total == entry.total {
                return Some(entry.idx);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_capacity() {
        let mut pool = NodePool::new(2);
        let a = pool.get_node(PolyRef::new(1), 0).unwrap();
        assert_eq!(pool.get_node(PolyRef::new(1), 0), Some(a));
        assert!(pool.get_node(PolyRef::new(1), 1).is_some());
        assert!(pool.get_node(PolyRef::new(2), 0).is_none());
        assert_eq!(pool.find_node(PolyRef::new(1), 1), Some(1));

        pool.clear();
        assert!(pool.is_empty());
        assert!(pool.get_node(PolyRef::new(2), 0).is_some());
    }

    #[test]
    fn test_queue_orders_by_total_and_skips_stale() {
        let mut pool = NodePool::new(8);
        let mut queue = NodeQueue::new();
        for (i, total) in [(1u32, 5.0f32), (2, 1.0), (3, 3.0)] {
            let idx = pool.get_node(PolyRef::new(i), 0).unwrap();
            let node = pool.node_mut(idx);
            node.total = total;
            node.flags = NODE_OPEN;
            queue.push(&pool, idx);
        }

        // Improve node 1 below everything else
        pool.node_mut(0).total = 0.5;
        queue.push(&pool, 0);

        let order: Vec<u32> = std::iter::from_fn(|| {
            let idx = queue.pop(&pool)?;
            pool.node_mut(idx).flags = NODE_CLOSED;
            Some(pool.node(idx).id.id())
        })
        .collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(queue.pop(&pool).is_none());
    }
}

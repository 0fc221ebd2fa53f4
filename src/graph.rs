//! Directed dynamic multigraph with time-dependent edge costs.
//!
//! The ordering engine removes nodes and inserts shortcut edges as it runs,
//! so edges live in a slab (`Vec<Option<_>>` with a free list) and each node
//! keeps out/in adjacency lists of slab indices. Edge data is owned by value;
//! replacing a cost replaces it wholesale.

use crate::hist_cost::HistCost;

pub type NodeId = u32;
pub type EdgeId = u32;

/// Record of a contraction step a shortcut edge bypasses: the removed middle
/// node and the combined sub-path cost at the time the shortcut was created.
/// Kept for hierarchy reconstruction.
#[derive(Debug, Clone)]
pub struct Shortcut {
    pub via: NodeId,
    pub cost: HistCost,
}

/// Per-edge payload during ordering.
#[derive(Debug, Clone)]
pub struct OrderEdgeData {
    cost: HistCost,
    n_original_edges: u32,
    shortcuts: Vec<Shortcut>,
    is_constant: bool,
}

impl OrderEdgeData {
    pub fn new(cost: HistCost, n_original_edges: u32) -> Self {
        let is_constant = cost.is_constant();
        OrderEdgeData { cost, n_original_edges, shortcuts: Vec::new(), is_constant }
    }

    pub fn cost(&self) -> &HistCost {
        &self.cost
    }

    /// Replace the cost wholesale (shortcut merge). The constant flag follows.
    pub fn set_cost(&mut self, cost: HistCost) {
        self.is_constant = cost.is_constant();
        self.cost = cost;
    }

    pub fn n_original_edges(&self) -> u32 {
        self.n_original_edges
    }

    pub fn set_n_original_edges(&mut self, n: u32) {
        self.n_original_edges = n;
    }

    pub fn is_constant(&self) -> bool {
        self.is_constant
    }

    /// Number of histogram slices; the complexity measure the ordering engine
    /// sums over edges.
    pub fn complexity(&self) -> u32 {
        self.cost.size() as u32
    }

    pub fn shortcuts(&self) -> &[Shortcut] {
        &self.shortcuts
    }

    pub fn add_shortcut(&mut self, shortcut: Shortcut) {
        self.shortcuts.push(shortcut);
    }
}

#[derive(Debug)]
struct EdgeSlot {
    source: NodeId,
    target: NodeId,
    data: OrderEdgeData,
}

#[derive(Debug, Default)]
pub struct DynamicGraph {
    out: Vec<Vec<EdgeId>>,
    inc: Vec<Vec<EdgeId>>,
    slots: Vec<Option<EdgeSlot>>,
    free: Vec<EdgeId>,
    n_edges: usize,
}

impl DynamicGraph {
    pub fn with_nodes(n_nodes: usize) -> Self {
        DynamicGraph {
            out: vec![Vec::new(); n_nodes],
            inc: vec![Vec::new(); n_nodes],
            slots: Vec::new(),
            free: Vec::new(),
            n_edges: 0,
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.out.len()
    }

    pub fn n_edges(&self) -> usize {
        self.n_edges
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        0..self.out.len() as NodeId
    }

    pub fn out_edges(&self, x: NodeId) -> impl Iterator<Item = EdgeId> + '_ {
        self.out[x as usize].iter().copied()
    }

    pub fn in_edges(&self, x: NodeId) -> impl Iterator<Item = EdgeId> + '_ {
        self.inc[x as usize].iter().copied()
    }

    fn slot(&self, e: EdgeId) -> &EdgeSlot {
        self.slots[e as usize].as_ref().expect("edge removed")
    }

    pub fn source(&self, e: EdgeId) -> NodeId {
        self.slot(e).source
    }

    pub fn target(&self, e: EdgeId) -> NodeId {
        self.slot(e).target
    }

    pub fn edge_data(&self, e: EdgeId) -> &OrderEdgeData {
        &self.slot(e).data
    }

    pub fn edge_data_mut(&mut self, e: EdgeId) -> &mut OrderEdgeData {
        &mut self.slots[e as usize].as_mut().expect("edge removed").data
    }

    /// First edge from `src` to `tgt`, if any (parallel edges are merged by
    /// the ordering engine, so at most one is expected to exist).
    pub fn edge_between(&self, src: NodeId, tgt: NodeId) -> Option<EdgeId> {
        self.out[src as usize]
            .iter()
            .copied()
            .find(|&e| self.slot(e).target == tgt)
    }

    pub fn insert_edge(&mut self, src: NodeId, tgt: NodeId, data: OrderEdgeData) -> EdgeId {
        let slot = EdgeSlot { source: src, target: tgt, data };
        let e = match self.free.pop() {
            Some(e) => {
                self.slots[e as usize] = Some(slot);
                e
            }
            None => {
                self.slots.push(Some(slot));
                (self.slots.len() - 1) as EdgeId
            }
        };
        self.out[src as usize].push(e);
        self.inc[tgt as usize].push(e);
        self.n_edges += 1;
        e
    }

    /// Remove every edge incident to `x` (both directions). Self-loops are
    /// removed once even though they appear in both adjacency lists.
    pub fn remove_all_edges_of(&mut self, x: NodeId) {
        let outgoing = std::mem::take(&mut self.out[x as usize]);
        let incoming = std::mem::take(&mut self.inc[x as usize]);

        for e in outgoing {
            if let Some(slot) = self.slots[e as usize].take() {
                self.inc[slot.target as usize].retain(|&other| other != e);
                self.free.push(e);
                self.n_edges -= 1;
            }
        }
        for e in incoming {
            if let Some(slot) = self.slots[e as usize].take() {
                self.out[slot.source as usize].retain(|&other| other != e);
                self.free.push(e);
                self.n_edges -= 1;
            }
        }
    }
}

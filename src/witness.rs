//! Witness search: decides whether a candidate shortcut is necessary.
//!
//! The ordering engine only consumes the decision contract: given the path
//! u -> x -> v, report NECESSARY or UNNECESSARY together with the combined
//! shortcut cost and its complexity. The bundled `ProfileWitnessSearch` is a
//! bounded best-first search over expected costs that accepts an alternate
//! u -> v path (avoiding x) as a witness only when its cost stochastically
//! dominates the shortcut on every time slice. Incomparable costs keep the
//! shortcut: extra shortcuts are safe, missing ones are not.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;

use crate::graph::{DynamicGraph, EdgeId, NodeId};
use crate::hist_cost::{convolve_hist_cost, CostError, HistCost};
use crate::histogram::{stochastic_dominance, Dominance, Histogram};

/// Verdict on one (u, x, v) shortcut candidate. Searches always decide;
/// "undecided" exists only as absence from the witness cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutStatus {
    Necessary,
    Unnecessary,
}

/// Decision plus the data the ordering engine needs to act on it.
#[derive(Debug)]
pub struct WitnessDecision {
    pub status: ShortcutStatus,
    /// Combined u -> x -> v cost (the shortcut's cost if inserted).
    pub cost: HistCost,
    /// Slice count of the combined cost.
    pub complexity: u32,
}

/// Decision oracle consumed by the ordering engine.
pub trait WitnessSearch: Sync {
    fn decide(
        &self,
        graph: &DynamicGraph,
        u: NodeId,
        e_in: EdgeId,
        x: NodeId,
        e_out: EdgeId,
        v: NodeId,
    ) -> Result<WitnessDecision, CostError>;
}

/// Bounded profile search for witness paths.
#[derive(Debug, Clone)]
pub struct ProfileWitnessSearch {
    /// Maximum path length (edges) a witness may have.
    pub max_hops: u32,
    /// Maximum number of queue pops before giving up and keeping the shortcut.
    pub max_settled: usize,
}

impl Default for ProfileWitnessSearch {
    fn default() -> Self {
        ProfileWitnessSearch { max_hops: 8, max_settled: 512 }
    }
}

struct QueueItem {
    estimate: f64,
    node: NodeId,
    hops: u32,
    cost: HistCost,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.estimate == other.estimate
    }
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap: lower estimates pop first
        other.estimate.total_cmp(&self.estimate)
    }
}

/// True when `witness` is at least as good as `shortcut` for all time:
/// bucket-identical slices count, otherwise the witness must dominate.
fn dominates_everywhere(witness: &HistCost, shortcut: &HistCost) -> bool {
    let beats = |w: &Histogram, s: &Histogram| {
        w.buckets() == s.buckets() || stochastic_dominance(w, s) == Dominance::LeftDominates
    };

    if witness.size() == shortcut.size() {
        witness
            .histograms()
            .iter()
            .zip(shortcut.histograms())
            .all(|(w, s)| beats(w, s))
    } else {
        // differing slice partitions: every witness slice must beat every
        // shortcut slice it overlaps
        witness.histograms().iter().all(|w| {
            shortcut
                .histograms()
                .iter()
                .filter(|s| s.interval().overlaps(&w.interval()))
                .all(|s| beats(w, s))
        })
    }
}

impl WitnessSearch for ProfileWitnessSearch {
    fn decide(
        &self,
        graph: &DynamicGraph,
        u: NodeId,
        e_in: EdgeId,
        x: NodeId,
        e_out: EdgeId,
        v: NodeId,
    ) -> Result<WitnessDecision, CostError> {
        let edge_ux = graph.edge_data(e_in).cost();
        let edge_xv = graph.edge_data(e_out).cost();
        let shortcut = convolve_hist_cost(edge_ux, edge_xv)?;
        let complexity = shortcut.size() as u32;

        let status = if self.has_witness(graph, u, x, v, &shortcut)? {
            ShortcutStatus::Unnecessary
        } else {
            ShortcutStatus::Necessary
        };

        Ok(WitnessDecision { status, cost: shortcut, complexity })
    }
}

impl ProfileWitnessSearch {
    fn has_witness(
        &self,
        graph: &DynamicGraph,
        u: NodeId,
        x: NodeId,
        v: NodeId,
        shortcut: &HistCost,
    ) -> Result<bool, CostError> {
        let mut best: FxHashMap<NodeId, f64> = FxHashMap::default();
        let mut heap: BinaryHeap<QueueItem> = BinaryHeap::new();

        for e in graph.out_edges(u) {
            let w = graph.target(e);
            if w == x || w == u {
                continue;
            }
            let cost = graph.edge_data(e).cost().clone();
            let estimate = cost.expected_cost();
            if best.get(&w).map_or(true, |&b| estimate < b) {
                best.insert(w, estimate);
                heap.push(QueueItem { estimate, node: w, hops: 1, cost });
            }
        }

        let mut settled = 0usize;
        while let Some(item) = heap.pop() {
            settled += 1;
            if settled > self.max_settled {
                break;
            }
            if best.get(&item.node).map_or(false, |&b| item.estimate > b) {
                continue; // superseded entry
            }

            if item.node == v && dominates_everywhere(&item.cost, shortcut) {
                return Ok(true);
            }
            if item.hops >= self.max_hops {
                continue;
            }

            for e in graph.out_edges(item.node) {
                let w = graph.target(e);
                if w == x || w == u {
                    continue;
                }
                let cost = convolve_hist_cost(&item.cost, graph.edge_data(e).cost())?;
                let estimate = cost.expected_cost();
                if best.get(&w).map_or(true, |&b| estimate < b) {
                    best.insert(w, estimate);
                    heap.push(QueueItem { estimate, node: w, hops: item.hops + 1, cost });
                }
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OrderEdgeData;

    fn const_edge(cost: u32) -> OrderEdgeData {
        OrderEdgeData::new(HistCost::constant(cost), 1)
    }

    #[test]
    fn test_no_alternate_path_keeps_shortcut() {
        // a -> b -> c, nothing else
        let mut g = DynamicGraph::with_nodes(3);
        let e_in = g.insert_edge(0, 1, const_edge(5));
        let e_out = g.insert_edge(1, 2, const_edge(7));

        let search = ProfileWitnessSearch::default();
        let decision = search.decide(&g, 0, e_in, 1, e_out, 2).unwrap();
        assert_eq!(decision.status, ShortcutStatus::Necessary);
        assert_eq!(decision.complexity, 1);
        assert_eq!(decision.cost.histograms()[0].probability(12), Some(100.0));
    }

    #[test]
    fn test_cheaper_alternate_path_is_a_witness() {
        // diamond: 0 -> 1 -> 3 (3+3), 0 -> 2 -> 3 (1+1)
        let mut g = DynamicGraph::with_nodes(4);
        let e_in = g.insert_edge(0, 1, const_edge(3));
        let e_out = g.insert_edge(1, 3, const_edge(3));
        g.insert_edge(0, 2, const_edge(1));
        g.insert_edge(2, 3, const_edge(1));

        let search = ProfileWitnessSearch::default();
        let via_b = search.decide(&g, 0, e_in, 1, e_out, 3).unwrap();
        assert_eq!(via_b.status, ShortcutStatus::Unnecessary);

        let e_in_c = g.edge_between(0, 2).unwrap();
        let e_out_c = g.edge_between(2, 3).unwrap();
        let via_c = search.decide(&g, 0, e_in_c, 2, e_out_c, 3).unwrap();
        assert_eq!(via_c.status, ShortcutStatus::Necessary);
    }

    #[test]
    fn test_equal_alternate_path_is_a_witness() {
        // two parallel 2-hop paths of identical constant cost
        let mut g = DynamicGraph::with_nodes(4);
        let e_in = g.insert_edge(0, 1, const_edge(2));
        let e_out = g.insert_edge(1, 3, const_edge(2));
        g.insert_edge(0, 2, const_edge(2));
        g.insert_edge(2, 3, const_edge(2));

        let search = ProfileWitnessSearch::default();
        let decision = search.decide(&g, 0, e_in, 1, e_out, 3).unwrap();
        assert_eq!(decision.status, ShortcutStatus::Unnecessary);
    }

    #[test]
    fn test_incomparable_alternate_keeps_shortcut() {
        // alternate path is sometimes faster, sometimes slower: no witness
        let mut g = DynamicGraph::with_nodes(4);
        let e_in = g.insert_edge(0, 1, const_edge(5));
        let e_out = g.insert_edge(1, 3, const_edge(5));

        let spread = Histogram::new(
            crate::interval::TimeInterval::all_day(),
            2,
            [(1u32, 50.0), (100u32, 50.0)].into_iter().collect(),
        )
        .unwrap();
        g.insert_edge(0, 2, OrderEdgeData::new(HistCost::from_histogram(spread), 1));
        g.insert_edge(2, 3, const_edge(0));

        let search = ProfileWitnessSearch::default();
        let decision = search.decide(&g, 0, e_in, 1, e_out, 3).unwrap();
        assert_eq!(decision.status, ShortcutStatus::Necessary);
    }
}

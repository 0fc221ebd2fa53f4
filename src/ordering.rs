//! Contraction ordering engine.
//!
//! Repeatedly selects an independent set of cheap-to-contract nodes (local
//! minima of the tentative cost within a 2-hop neighborhood), contracts them
//! in parallel, merges the resulting shortcuts back into the graph, and
//! assigns hierarchy levels in contraction order.
//!
//! Phase discipline: COST_INIT, SELECT_SET, CONTRACT and UPDATE_COSTS are
//! data-parallel and only read the graph, accumulating results in per-task
//! buffers; all graph, cache and writer mutation happens in the
//! single-threaded MERGE phase between them. Node costs are written in
//! COST_INIT/UPDATE_COSTS and read in SELECT_SET/CONTRACT, never both in the
//! same phase.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::formats::btch::{HierarchyWriter, WriteError};
use crate::graph::{DynamicGraph, EdgeId, NodeId, OrderEdgeData, Shortcut};
use crate::hist_cost::{convolve_hist_cost, CostError, HistCost};
use crate::witness::{ShortcutStatus, WitnessSearch};
use crate::witness_cache::{CacheError, WitnessCache, WitnessCacheEntry};

#[derive(Debug, Error)]
pub enum OrderingError {
    #[error(transparent)]
    Cost(#[from] CostError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("node {node} was assigned a level twice")]
    DuplicateLevel { node: NodeId },

    #[error("level assignment is not a bijection onto [0, {n_nodes})")]
    LevelsNotBijective { n_nodes: usize },

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

#[derive(Debug, Clone)]
pub struct OrderingConfig {
    /// Worker threads for the parallel phases; 0 means hardware concurrency.
    pub n_threads: usize,
    /// Seed for the tie-break permutation (fixed for the whole run).
    pub seed: u64,
    /// Neighborhood radius for independent-set selection.
    pub hop_radius: u32,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        OrderingConfig { n_threads: 0, seed: 0x5eed_cafe, hop_radius: 2 }
    }
}

/// Result of a completed ordering run. The writer is handed back so callers
/// owning an in-memory sink can inspect what was written.
#[derive(Debug)]
pub struct OrderingRun<W> {
    pub node_to_level: Vec<u32>,
    pub n_shortcuts: u64,
    pub n_rounds: u32,
    pub writer: W,
}

/// A shortcut decided necessary during CONTRACT, waiting to be merged.
struct InsertEdge {
    source: NodeId,
    target: NodeId,
    via: NodeId,
    cost: HistCost,
    n_original_edges: u32,
}

pub struct Ordering<W, S> {
    graph: DynamicGraph,
    writer: W,
    witness_search: S,
    config: OrderingConfig,

    // [0, contracted)              : already contracted
    // [contracted, working_end)    : the current independent set
    // [working_end, nodes.len())   : not yet contracted
    nodes: Vec<NodeId>,
    contracted: usize,
    working_end: usize,

    node_cost: Vec<f64>,
    tie_break: Vec<u32>,
    hierarchy_depth: Vec<u32>,
    node_to_level: Vec<Option<u32>>,
    witness_cache: WitnessCache,

    n_shortcuts: u64,
}

impl<W: HierarchyWriter, S: WitnessSearch> Ordering<W, S> {
    pub fn new(graph: DynamicGraph, writer: W, witness_search: S, config: OrderingConfig) -> Self {
        let n = graph.n_nodes();

        let nodes: Vec<NodeId> = (0..n as NodeId).collect();
        let mut tie_break: Vec<u32> = (0..n as u32).collect();
        let mut rng = StdRng::seed_from_u64(config.seed);
        tie_break.shuffle(&mut rng);

        Ordering {
            graph,
            writer,
            witness_search,
            config,
            nodes,
            contracted: 0,
            working_end: 0,
            node_cost: vec![0.0; n],
            tie_break,
            hierarchy_depth: vec![1; n],
            node_to_level: vec![None; n],
            witness_cache: WitnessCache::new(n),
            n_shortcuts: 0,
        }
    }

    /// Run the full ordering: every node gets contracted and assigned a
    /// level, every removed edge is written to the hierarchy writer, and the
    /// final node-to-level map is a bijection onto `[0, n)`.
    pub fn run(mut self) -> Result<OrderingRun<W>, OrderingError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.n_threads)
            .build()
            .map_err(|e| OrderingError::ThreadPool(e.to_string()))?;

        log::info!(
            "ordering {} nodes / {} edges with {} threads",
            self.graph.n_nodes(),
            self.graph.n_edges(),
            pool.current_num_threads()
        );

        let n_rounds = pool.install(|| self.order_and_construct())?;

        let node_to_level = self.finalize_levels()?;
        self.writer.write_level_info(&node_to_level)?;
        self.writer.close()?;

        Ok(OrderingRun {
            node_to_level,
            n_shortcuts: self.n_shortcuts,
            n_rounds,
            writer: self.writer,
        })
    }

    fn order_and_construct(&mut self) -> Result<u32, OrderingError> {
        // COST_INIT: tentative cost for every node, witness results cached
        let all_nodes: Vec<NodeId> = self.graph.nodes().collect();
        self.recompute_costs(&all_nodes)?;

        let mut round = 0u32;
        while self.contracted < self.nodes.len() {
            round += 1;

            // SELECT_SET
            let n_selected = self.select_independent_set();
            log::info!(
                "round {}: contracting {} of {} remaining nodes",
                round,
                n_selected,
                self.nodes.len() - self.contracted
            );

            // CONTRACT (parallel, read-only; shortcuts land in task buffers)
            let inserts = self.contract_working_set()?;
            self.invalidate_witnesses_of_working_set();

            // MERGE (single-threaded: levels, writer, graph surgery)
            let nodes_to_update = self.merge_working_set(inserts)?;

            // UPDATE_COSTS
            self.recompute_costs(&nodes_to_update)?;

            self.contracted = self.working_end;
        }

        log::info!(
            "ordering finished after {} rounds, {} shortcuts",
            round,
            self.n_shortcuts
        );
        Ok(round)
    }

    /// COST_INIT / UPDATE_COSTS: simulate contraction of each node in
    /// parallel, then apply costs and freshly decided witnesses.
    fn recompute_costs(&mut self, nodes: &[NodeId]) -> Result<(), OrderingError> {
        let graph = &self.graph;
        let cache = &self.witness_cache;
        let search = &self.witness_search;
        let depth = &self.hierarchy_depth;

        let simulated: Vec<(NodeId, f64, Vec<WitnessCacheEntry>)> = nodes
            .par_iter()
            .map(|&x| {
                simulate_contraction(graph, cache, search, depth, x)
                    .map(|(cost, entries)| (x, cost, entries))
            })
            .collect::<Result<_, CostError>>()?;

        for (x, cost, entries) in simulated {
            self.node_cost[x as usize] = cost;
            for entry in entries {
                self.witness_cache.insert(entry)?;
            }
        }
        Ok(())
    }

    /// SELECT_SET: pick every remaining node that is a cost minimum within
    /// the configured hop radius, and move the selection to the front of the
    /// remaining range (stable).
    fn select_independent_set(&mut self) -> usize {
        let graph = &self.graph;
        let node_cost = &self.node_cost;
        let tie_break = &self.tie_break;
        let radius = self.config.hop_radius;

        let remaining = &self.nodes[self.contracted..];
        let flags: Vec<bool> = remaining
            .par_iter()
            .map(|&x| is_local_minimum(graph, node_cost, tie_break, x, radius))
            .collect();

        let mut selected = Vec::new();
        let mut rest = Vec::new();
        for (&x, &keep) in remaining.iter().zip(&flags) {
            if keep {
                selected.push(x);
            } else {
                rest.push(x);
            }
        }

        let n_selected = selected.len();
        debug_assert!(n_selected > 0, "no progress: empty independent set");

        self.nodes.truncate(self.contracted);
        self.nodes.extend(selected);
        self.nodes.extend(rest);
        self.working_end = self.contracted + n_selected;
        n_selected
    }

    /// CONTRACT: decide and build all necessary shortcuts of the working set
    /// in parallel. Nothing is mutated; each task returns its own buffer.
    fn contract_working_set(&self) -> Result<Vec<InsertEdge>, OrderingError> {
        let graph = &self.graph;
        let cache = &self.witness_cache;
        let search = &self.witness_search;

        let buffers: Vec<Vec<InsertEdge>> = self.nodes[self.contracted..self.working_end]
            .par_iter()
            .map(|&x| contract_node(graph, cache, search, x))
            .collect::<Result<_, CostError>>()?;

        Ok(buffers.into_iter().flatten().collect())
    }

    /// Drop cache entries whose reasoning involved the nodes about to lose
    /// all their edges.
    fn invalidate_witnesses_of_working_set(&mut self) {
        for i in self.contracted..self.working_end {
            let x = self.nodes[i];
            self.witness_cache.remove_node(x);

            let sources: Vec<NodeId> = self.graph.in_edges(x).map(|e| self.graph.source(e)).collect();
            let targets: Vec<NodeId> = self.graph.out_edges(x).map(|e| self.graph.target(e)).collect();
            for u in sources {
                // triples through u that ended in the edge u -> x
                self.witness_cache.remove_matching(None, u, Some(x));
            }
            for v in targets {
                // triples through v that started with the edge x -> v
                self.witness_cache.remove_matching(Some(x), v, None);
            }
        }
    }

    /// MERGE: assign levels, write removed edges, strip the contracted nodes
    /// from the graph, then insert or merge the accumulated shortcuts.
    /// Returns the neighbors whose costs must be recomputed.
    fn merge_working_set(&mut self, inserts: Vec<InsertEdge>) -> Result<Vec<NodeId>, OrderingError> {
        let mut nodes_to_update: Vec<NodeId> = Vec::new();

        for i in self.contracted..self.working_end {
            let x = self.nodes[i];

            if self.node_to_level[x as usize].is_some() {
                return Err(OrderingError::DuplicateLevel { node: x });
            }
            self.node_to_level[x as usize] = Some(i as u32);

            let out_edges: Vec<EdgeId> = self.graph.out_edges(x).collect();
            for e in out_edges {
                let v = self.graph.target(e);
                nodes_to_update.push(v);
                self.hierarchy_depth[v as usize] = self.hierarchy_depth[v as usize]
                    .max(self.hierarchy_depth[x as usize] + 1);
                self.writer.write_edge(x, v, self.graph.edge_data(e))?;
            }

            let in_edges: Vec<EdgeId> = self.graph.in_edges(x).collect();
            for e in in_edges {
                let u = self.graph.source(e);
                nodes_to_update.push(u);
                self.hierarchy_depth[u as usize] = self.hierarchy_depth[u as usize]
                    .max(self.hierarchy_depth[x as usize] + 1);
                self.writer.write_edge(u, x, self.graph.edge_data(e))?;
            }

            self.graph.remove_all_edges_of(x);
        }

        nodes_to_update.sort_unstable();
        nodes_to_update.dedup();

        for ins in inserts {
            match self.graph.edge_between(ins.source, ins.target) {
                None => {
                    let mut data = OrderEdgeData::new(ins.cost.clone(), ins.n_original_edges);
                    data.add_shortcut(Shortcut { via: ins.via, cost: ins.cost });
                    self.graph.insert_edge(ins.source, ins.target, data);
                    self.n_shortcuts += 1;
                }
                Some(e) => {
                    // a parallel edge exists: fold the new shortcut into it
                    // and drop witness reasoning that depended on the old cost
                    let merged = convolve_hist_cost(self.graph.edge_data(e).cost(), &ins.cost)?;
                    let data = self.graph.edge_data_mut(e);
                    data.set_cost(merged);
                    data.add_shortcut(Shortcut { via: ins.via, cost: ins.cost });

                    self.witness_cache.remove_matching(None, ins.source, Some(ins.target));
                    self.witness_cache.remove_matching(Some(ins.source), ins.target, None);
                    self.n_shortcuts += 1;
                }
            }
        }

        Ok(nodes_to_update)
    }

    /// DONE: the level map must be a bijection onto `[0, n)`.
    fn finalize_levels(&self) -> Result<Vec<u32>, OrderingError> {
        let n = self.node_to_level.len();
        let mut levels = Vec::with_capacity(n);
        let mut seen = vec![false; n];

        for (x, level) in self.node_to_level.iter().enumerate() {
            let level = level.ok_or(OrderingError::LevelsNotBijective { n_nodes: n })?;
            let slot = seen
                .get_mut(level as usize)
                .ok_or(OrderingError::LevelsNotBijective { n_nodes: n })?;
            if *slot {
                return Err(OrderingError::DuplicateLevel { node: x as NodeId });
            }
            *slot = true;
            levels.push(level);
        }
        Ok(levels)
    }
}

/// Tentative contraction cost of `x`: simulate removing it and compare what
/// would be inserted against what would be removed.
///
///   cost(x) = 2*ins/rm + depth(x) + orig_ins/orig_rm + 2*cplx_ins/cplx_rm
///
/// with all denominators floored at 1. Freshly decided witnesses are
/// returned for insertion into the shared cache after the parallel phase.
fn simulate_contraction<S: WitnessSearch>(
    graph: &DynamicGraph,
    cache: &WitnessCache,
    search: &S,
    hierarchy_depth: &[u32],
    x: NodeId,
) -> Result<(f64, Vec<WitnessCacheEntry>), CostError> {
    let mut n_removed = 0u32;
    let mut orig_removed = 0u32;
    let mut cplx_removed = 0u32;

    for e in graph.out_edges(x).chain(graph.in_edges(x)) {
        let data = graph.edge_data(e);
        n_removed += 1;
        orig_removed += data.n_original_edges();
        cplx_removed += data.complexity();
    }

    let mut n_inserted = 0u32;
    let mut orig_inserted = 0u32;
    let mut cplx_inserted = 0u32;
    let mut fresh: Vec<WitnessCacheEntry> = Vec::new();

    for e_in in graph.in_edges(x) {
        let u = graph.source(e_in);
        for e_out in graph.out_edges(x) {
            let v = graph.target(e_out);
            if u == v || u == x || v == x {
                continue;
            }

            let n_original =
                graph.edge_data(e_in).n_original_edges() + graph.edge_data(e_out).n_original_edges();

            let (status, complexity) = if let Some(entry) = cache.lookup(u, x, v) {
                (entry.status, entry.complexity)
            } else if let Some(entry) = fresh.iter().find(|c| c.u == u && c.v == v) {
                // parallel input edges can repeat a triple within one pass
                (entry.status, entry.complexity)
            } else {
                let decision = search.decide(graph, u, e_in, x, e_out, v)?;
                fresh.push(WitnessCacheEntry {
                    status: decision.status,
                    complexity: decision.complexity,
                    u,
                    x,
                    v,
                });
                (decision.status, decision.complexity)
            };

            if status == ShortcutStatus::Necessary {
                n_inserted += 1;
                orig_inserted += n_original;
                cplx_inserted += complexity;
            }
        }
    }

    let quotient = |num: u32, den: u32| f64::from(num) / f64::from(den.max(1));
    let cost = 2.0 * quotient(n_inserted, n_removed)
        + f64::from(hierarchy_depth[x as usize])
        + quotient(orig_inserted, orig_removed)
        + 2.0 * quotient(cplx_inserted, cplx_removed);

    Ok((cost, fresh))
}

/// Cost comparison used by selection; the fixed random permutation breaks
/// exact ties so the comparison is a strict total order.
fn has_smaller_cost(node_cost: &[f64], tie_break: &[u32], u: NodeId, v: NodeId) -> bool {
    let (cu, cv) = (node_cost[u as usize], node_cost[v as usize]);
    cu < cv || (cu == cv && tie_break[u as usize] < tie_break[v as usize])
}

/// True when no node within `radius` hops of `x` (following edges in either
/// direction) has strictly smaller cost. Such local minima form the
/// independent set contracted in parallel.
fn is_local_minimum(
    graph: &DynamicGraph,
    node_cost: &[f64],
    tie_break: &[u32],
    x: NodeId,
    radius: u32,
) -> bool {
    let mut hops: FxHashMap<NodeId, u32> = FxHashMap::default();
    hops.insert(x, 0);
    let mut queue = std::collections::VecDeque::new();
    queue.push_back(x);

    while let Some(u) = queue.pop_front() {
        let hop = hops[&u];
        let neighbors = graph
            .out_edges(u)
            .map(|e| graph.target(e))
            .chain(graph.in_edges(u).map(|e| graph.source(e)));

        for v in neighbors {
            if hops.contains_key(&v) {
                continue;
            }
            if has_smaller_cost(node_cost, tie_break, v, x) {
                return false;
            }
            hops.insert(v, hop + 1);
            if hop + 1 < radius {
                queue.push_back(v);
            }
        }
    }

    true
}

/// Contract one node: for every in/out edge pair that would lose its path,
/// decide shortcut necessity and build the combined cost when needed.
fn contract_node<S: WitnessSearch>(
    graph: &DynamicGraph,
    cache: &WitnessCache,
    search: &S,
    x: NodeId,
) -> Result<Vec<InsertEdge>, CostError> {
    let mut inserts = Vec::new();

    for e_in in graph.in_edges(x) {
        let u = graph.source(e_in);
        for e_out in graph.out_edges(x) {
            let v = graph.target(e_out);
            if u == v || u == x || v == x {
                continue;
            }

            let n_original =
                graph.edge_data(e_in).n_original_edges() + graph.edge_data(e_out).n_original_edges();

            let (necessary, cost) = match cache.lookup(u, x, v) {
                Some(entry) => (entry.status == ShortcutStatus::Necessary, None),
                None => {
                    let decision = search.decide(graph, u, e_in, x, e_out, v)?;
                    (decision.status == ShortcutStatus::Necessary, Some(decision.cost))
                }
            };

            if !necessary {
                continue;
            }

            // a cached decision carries no cost; build the convolution now
            let cost = match cost {
                Some(cost) => cost,
                None => convolve_hist_cost(
                    graph.edge_data(e_in).cost(),
                    graph.edge_data(e_out).cost(),
                )?,
            };

            inserts.push(InsertEdge { source: u, target: v, via: x, cost, n_original_edges: n_original });
        }
    }

    Ok(inserts)
}

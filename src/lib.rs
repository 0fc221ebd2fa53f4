//! butterfly-tch: time-dependent contraction hierarchy builder.
//!
//! Edge costs are travel-time histograms (one per time-of-day slice); the
//! ordering engine contracts independent node sets in parallel, inserting
//! shortcuts whose necessity is decided by witness search and whose costs
//! come from histogram convolution.

pub mod formats;
pub mod graph;
pub mod hist_cost;
pub mod histogram;
pub mod interval;
pub mod ordering;
pub mod witness;
pub mod witness_cache;

pub use graph::{DynamicGraph, NodeId, OrderEdgeData};
pub use hist_cost::HistCost;
pub use histogram::Histogram;
pub use ordering::{Ordering, OrderingConfig};
pub use witness::ProfileWitnessSearch;

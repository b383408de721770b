//! Aggregation-based coarsening for algebraic multigrid.
//!
//! Multigrid preconditioners for sparse symmetric positive definite systems
//! need a hierarchy of progressively coarser problems. One popular way to
//! build the transfer operators between levels is aggregation: partition the
//! vertices of the matrix graph into small connected clusters and let every
//! cluster become a single coarse unknown. This crate implements the greedy
//! multi-phase variant of that partitioning.
//!
//! The input is an amalgamated vertex graph derived from the matrix sparsity
//! pattern (block rows belonging to one mesh node collapsed into a single
//! vertex, weak couplings dropped). A configurable sequence of passes then
//! claims vertices:
//!
//! 1. seed-and-grow around well connected vertices,
//! 2. absorption of leftovers into existing aggregates (2a) and relaxed
//!    aggregate formation among the remaining ones (2b),
//! 3. an emergency pass that guarantees every vertex ends up aggregated,
//!    producing undersized aggregates where nothing better is available.
//!
//! Aggregation runs per rank. The uncoupled driver never lets an aggregate
//! span two ranks; the coupled driver lets boundary leftovers join
//! aggregates rooted on a neighboring rank through an exchange step.

use sprs::{CsMatBase, TriMatBase};

#[macro_use]
extern crate log;

pub mod aggregates;
pub mod coupled;
pub mod error;
pub mod graph;
pub mod ordering;
pub mod uncoupled;
pub mod utils;

pub type CsrMatrix = CsMatBase<f64, usize, Vec<usize>, Vec<usize>, Vec<f64>, usize>;
pub type CooMatrix = TriMatBase<Vec<usize>, Vec<f64>>;

pub use crate::aggregates::Aggregates;
pub use crate::coupled::{
    aggregate_coupled, AggregateExchange, CoupledAggregates, InProcessExchange,
};
pub use crate::error::{Error, Result};
pub use crate::graph::{amalgamate, AmalgamationInfo, GraphOptions, RowDistribution, VertexGraph};
pub use crate::ordering::Ordering;
pub use crate::uncoupled::AggregationBuilder;

//! Multi-phase greedy aggregation over a local vertex graph.
//!
//! The phases run in a fixed order and each one only sees what the previous
//! ones left unclaimed. Phase 1 seeds aggregates at well connected vertices
//! and grows them one neighbor ring deep. Phase 2a pushes leftovers into
//! adjacent aggregates that still have room, phase 2b lets clusters of
//! leftovers form undersized aggregates, and phase 3 force-claims whatever
//! is left so the partition covers every owned vertex.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::aggregates::Aggregates;
use crate::error::{Error, Result};
use crate::graph::{RowDistribution, VertexGraph};
use crate::ordering::Ordering;

/// Knobs of the greedy sweep. Construct with [`Default`] and overwrite the
/// fields you care about, then call [`aggregate`](Self::aggregate).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregationBuilder {
    /// A phase 1 seed must reach this size from its own neighborhood.
    pub min_agg_size: usize,
    /// No aggregate grows past this size in any phase.
    pub max_agg_size: usize,
    /// A vertex bordering more than this many finished aggregates is not
    /// used as a seed, which keeps new aggregates from clumping around
    /// existing ones.
    pub max_selected_neighbors: usize,
    pub ordering: Ordering,
    pub enable_phase1: bool,
    pub enable_phase2a: bool,
    pub enable_phase2b: bool,
    pub enable_phase3: bool,
    /// Bias of the emergency pass: a leftover merges into a neighboring
    /// aggregate when the fraction of its neighbors already aggregated
    /// exceeds this threshold, and starts a new (undersized) aggregate
    /// otherwise.
    pub phase3_agg_creation: f64,
}

impl Default for AggregationBuilder {
    fn default() -> Self {
        Self {
            min_agg_size: 2,
            max_agg_size: usize::MAX,
            max_selected_neighbors: 0,
            ordering: Ordering::Natural,
            enable_phase1: true,
            enable_phase2a: true,
            enable_phase2b: true,
            enable_phase3: true,
            phase3_agg_creation: 0.5,
        }
    }
}

impl AggregationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the configuration before any phase runs. The leftover phases
    /// only refine a partition produced by phase 1, so enabling them on
    /// their own is a misconfiguration, not an empty result.
    pub fn validate(&self) -> Result<()> {
        if !self.enable_phase1
            && !self.enable_phase2a
            && !self.enable_phase2b
            && !self.enable_phase3
        {
            return Err(Error::NoPhasesEnabled);
        }
        if !self.enable_phase1 {
            if self.enable_phase2a {
                return Err(Error::PhaseDependency { phase: "2a" });
            }
            if self.enable_phase2b {
                return Err(Error::PhaseDependency { phase: "2b" });
            }
        }
        if self.min_agg_size < 2 || self.min_agg_size > self.max_agg_size {
            return Err(Error::InvalidSizeBounds {
                min: self.min_agg_size,
                max: self.max_agg_size,
            });
        }
        if !(0.0..=1.0).contains(&self.phase3_agg_creation) {
            return Err(Error::InvalidThreshold(self.phase3_agg_creation));
        }
        Ok(())
    }

    /// Runs the enabled phases over the owned vertices of `graph` and
    /// returns the owned partition.
    pub fn aggregate(&self, graph: &VertexGraph) -> Result<Aggregates> {
        self.validate()?;
        let mut aggregates = Aggregates::new(graph.num_owned());
        self.run_growth_phases(graph, &mut aggregates);
        if self.enable_phase3 {
            phase3(graph, self, &mut aggregates);
            debug_assert_eq!(aggregates.num_unaggregated(), 0);
        }

        let left = aggregates.num_unaggregated();
        if left > 0 {
            warn!(
                "{left} of {} vertices left unaggregated",
                graph.num_owned()
            );
        }
        debug!(
            "{} vertices -> {} aggregates ({left} unaggregated)",
            graph.num_owned(),
            aggregates.num_aggregates(),
        );
        Ok(aggregates)
    }

    /// Phases 1, 2a and 2b. The coupled driver runs these locally and
    /// defers the emergency pass to the exchange step.
    pub(crate) fn run_growth_phases(&self, graph: &VertexGraph, aggregates: &mut Aggregates) {
        if self.enable_phase1 {
            let order = self.ordering.visit_order(graph);
            phase1(graph, self, &order, aggregates);
            trace!(
                "phase 1: {} aggregates, {} vertices left",
                aggregates.num_aggregates(),
                aggregates.num_unaggregated()
            );
        }
        if self.enable_phase2a {
            phase2a(graph, self, aggregates);
            trace!("phase 2a: {} vertices left", aggregates.num_unaggregated());
        }
        if self.enable_phase2b {
            phase2b(graph, self, aggregates);
            trace!(
                "phase 2b: {} aggregates, {} vertices left",
                aggregates.num_aggregates(),
                aggregates.num_unaggregated()
            );
        }
    }

    /// Uncoupled aggregation of a distributed graph: every rank aggregates
    /// its owned-only view independently, so no aggregate ever spans two
    /// ranks. Returns one partition per rank.
    pub fn aggregate_distributed(
        &self,
        graph: &VertexGraph,
        distribution: &RowDistribution,
    ) -> Result<Vec<Aggregates>> {
        self.validate()?;
        (0..distribution.num_ranks())
            .into_par_iter()
            .map(|rank| {
                let local = distribution.local_graph(graph, rank)?;
                self.aggregate(&local)
            })
            .collect()
    }
}

fn phase1(
    graph: &VertexGraph,
    options: &AggregationBuilder,
    order: &[usize],
    aggregates: &mut Aggregates,
) {
    for &vertex in order {
        if aggregates.aggregate_of(vertex).is_some() {
            continue;
        }
        let mut free = Vec::new();
        let mut selected = 0usize;
        for &u in graph.neighbors(vertex) {
            if !graph.is_owned(u) {
                continue;
            }
            match aggregates.aggregate_of(u) {
                Some(_) => selected += 1,
                None => free.push(u),
            }
        }
        if selected > options.max_selected_neighbors {
            continue;
        }
        if free.len() + 1 < options.min_agg_size {
            continue;
        }
        let agg = aggregates.create(vertex);
        for u in free {
            if aggregates.size_of(agg) >= options.max_agg_size {
                break;
            }
            aggregates.assign(u, agg);
        }
    }
}

fn phase2a(graph: &VertexGraph, options: &AggregationBuilder, aggregates: &mut Aggregates) {
    for vertex in 0..graph.num_owned() {
        if aggregates.aggregate_of(vertex).is_some() {
            continue;
        }
        for &u in graph.neighbors(vertex) {
            if !graph.is_owned(u) {
                continue;
            }
            if let Some(agg) = aggregates.aggregate_of(u) {
                if aggregates.size_of(agg) < options.max_agg_size {
                    aggregates.assign(vertex, agg);
                    break;
                }
            }
        }
    }
}

fn phase2b(graph: &VertexGraph, options: &AggregationBuilder, aggregates: &mut Aggregates) {
    for vertex in 0..graph.num_owned() {
        if aggregates.aggregate_of(vertex).is_some() {
            continue;
        }
        let free: Vec<usize> = graph
            .neighbors(vertex)
            .iter()
            .copied()
            .filter(|&u| graph.is_owned(u) && aggregates.aggregate_of(u).is_none())
            .collect();
        if free.is_empty() {
            continue;
        }
        let agg = aggregates.create(vertex);
        for u in free {
            if aggregates.size_of(agg) >= options.max_agg_size {
                break;
            }
            aggregates.assign(u, agg);
        }
    }
}

fn phase3(graph: &VertexGraph, options: &AggregationBuilder, aggregates: &mut Aggregates) {
    for vertex in 0..graph.num_owned() {
        if aggregates.aggregate_of(vertex).is_some() {
            continue;
        }
        let mut free = Vec::new();
        let mut neighbor_aggs = Vec::new();
        for &u in graph.neighbors(vertex) {
            if !graph.is_owned(u) {
                continue;
            }
            match aggregates.aggregate_of(u) {
                Some(agg) => neighbor_aggs.push(agg),
                None => free.push(u),
            }
        }
        let degree = free.len() + neighbor_aggs.len();
        let aggregated_fraction = if degree == 0 {
            0.0
        } else {
            neighbor_aggs.len() as f64 / degree as f64
        };

        if aggregated_fraction > options.phase3_agg_creation {
            if let Some(&agg) = neighbor_aggs
                .iter()
                .find(|&&a| aggregates.size_of(a) < options.max_agg_size)
            {
                aggregates.assign(vertex, agg);
                continue;
            }
        }
        if !free.is_empty() {
            let agg = aggregates.create(vertex);
            aggregates.mark_emergency(agg);
            for u in free {
                if aggregates.size_of(agg) >= options.max_agg_size {
                    break;
                }
                aggregates.assign(u, agg);
            }
            continue;
        }
        if let Some(&agg) = neighbor_aggs
            .iter()
            .find(|&&a| aggregates.size_of(a) < options.max_agg_size)
        {
            aggregates.assign(vertex, agg);
            continue;
        }
        // nothing adjacent left to pair with or join
        let agg = aggregates.create(vertex);
        aggregates.mark_emergency(agg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{amalgamate, GraphOptions};
    use crate::utils::laplace_1d;
    use crate::CooMatrix;

    fn path(n: usize) -> VertexGraph {
        amalgamate(&laplace_1d(n), &GraphOptions::default()).unwrap().0
    }

    fn star(leaves: usize) -> VertexGraph {
        let n = leaves + 1;
        let mut coo = CooMatrix::new((n, n));
        for i in 0..n {
            coo.add_triplet(i, i, 2.0);
        }
        for leaf in 1..n {
            coo.add_triplet(0, leaf, -1.0);
            coo.add_triplet(leaf, 0, -1.0);
        }
        amalgamate(&coo.to_csr::<usize>(), &GraphOptions::default())
            .unwrap()
            .0
    }

    #[test]
    fn growth_respects_max_size() {
        let builder = AggregationBuilder {
            min_agg_size: 2,
            max_agg_size: 2,
            ..AggregationBuilder::default()
        };
        let aggs = builder.aggregate(&path(6)).unwrap();
        assert_eq!(aggs.num_aggregates(), 3);
        assert!(aggs.aggregate_sizes().iter().all(|&s| s == 2));
    }

    #[test]
    fn absorption_fills_aggregates_with_room() {
        let builder = AggregationBuilder {
            min_agg_size: 3,
            max_agg_size: 4,
            enable_phase2b: false,
            enable_phase3: false,
            ..AggregationBuilder::default()
        };
        let aggs = builder.aggregate(&path(4)).unwrap();
        assert_eq!(aggs.num_aggregates(), 1);
        assert_eq!(aggs.size_of(0), 4);
        assert_eq!(aggs.num_unaggregated(), 0);
    }

    #[test]
    fn relaxed_formation_picks_up_leftover_clusters() {
        // min size 4 starves phase 1 on a 5-path; 2b forms undersized pairs
        let builder = AggregationBuilder {
            min_agg_size: 4,
            max_agg_size: 4,
            enable_phase3: false,
            ..AggregationBuilder::default()
        };
        let aggs = builder.aggregate(&path(5)).unwrap();
        assert_eq!(aggs.num_aggregates(), 2);
        assert_eq!(aggs.members(0), vec![0, 1]);
        assert_eq!(aggs.members(1), vec![2, 3]);
        assert_eq!(aggs.num_unaggregated(), 1);
    }

    #[test]
    fn emergency_merges_surrounded_leftovers() {
        let builder = AggregationBuilder {
            min_agg_size: 4,
            max_agg_size: 4,
            ..AggregationBuilder::default()
        };
        let aggs = builder.aggregate(&path(5)).unwrap();
        // vertex 4 only borders the full {2, 3} pair's neighbor 3, so it
        // merges there instead of forming a singleton
        assert_eq!(aggs.num_aggregates(), 2);
        assert_eq!(aggs.members(1), vec![2, 3, 4]);
        assert_eq!(aggs.num_unaggregated(), 0);
    }

    #[test]
    fn hemmed_in_leaves_become_singletons() {
        let builder = AggregationBuilder {
            min_agg_size: 3,
            max_agg_size: 3,
            ..AggregationBuilder::default()
        };
        let aggs = builder.aggregate(&star(5)).unwrap();
        // the center grabs two leaves; the full aggregate rejects the rest
        assert_eq!(aggs.num_aggregates(), 4);
        assert_eq!(aggs.size_of(0), 3);
        assert!((1..4).all(|agg| aggs.size_of(agg) == 1 && aggs.is_emergency(agg)));
        assert_eq!(aggs.num_unaggregated(), 0);
    }

    #[test]
    fn seed_throttle_skips_vertices_bordering_aggregates() {
        let builder = AggregationBuilder {
            min_agg_size: 2,
            max_agg_size: 2,
            enable_phase2a: false,
            enable_phase2b: false,
            enable_phase3: false,
            ..AggregationBuilder::default()
        };
        let relaxed = AggregationBuilder {
            max_selected_neighbors: 1,
            ..builder.clone()
        };
        let strict = builder.aggregate(&path(5)).unwrap();
        let loose = relaxed.aggregate(&path(5)).unwrap();
        // with the throttle at zero, vertex 2 borders the finished {0, 1}
        // and may not seed, so vertex 3 roots the second pair instead
        assert_eq!(strict.root_of(1), 3);
        assert_eq!(strict.members(1), vec![2, 3]);
        assert_eq!(loose.root_of(1), 2);
        assert_eq!(loose.members(1), vec![2, 3]);
    }

    #[test]
    fn validation_rejects_bad_bounds_and_thresholds() {
        let mut builder = AggregationBuilder::default();
        builder.min_agg_size = 5;
        builder.max_agg_size = 3;
        assert_eq!(
            builder.validate(),
            Err(Error::InvalidSizeBounds { min: 5, max: 3 })
        );

        let mut builder = AggregationBuilder::default();
        builder.phase3_agg_creation = 1.5;
        assert_eq!(builder.validate(), Err(Error::InvalidThreshold(1.5)));
    }
}

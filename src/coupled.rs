//! Aggregation across rank boundaries.
//!
//! Every rank first runs the growth phases on its own vertices, exactly
//! like the uncoupled engine. The leftovers near rank boundaries are then
//! handed to an exchange step together with the local candidate aggregates:
//! the exchange assigns globally unique ids, lets boundary leftovers join
//! aggregates rooted on a neighboring rank, and finally applies the
//! emergency rules to whatever nobody wanted. The exchange is the only
//! collective (blocking) point of the algorithm; everything before it is
//! rank-local.

use rayon::prelude::*;
use serde::Serialize;

use crate::aggregates::Aggregates;
use crate::error::{Error, Result};
use crate::graph::{RowDistribution, VertexGraph};
use crate::uncoupled::AggregationBuilder;

/// One rank's contribution to the exchange step.
pub struct RankCandidates {
    pub rank: usize,
    /// Locally rooted aggregates as global vertex lists, the root first.
    pub aggregates: Vec<Vec<usize>>,
    /// Owned vertices the growth phases failed to claim, ascending.
    pub leftovers: Vec<Leftover>,
}

/// An unclaimed vertex and its off-rank neighborhood.
pub struct Leftover {
    pub vertex: usize,
    /// Global ids of the vertex's neighbors owned by other ranks.
    pub ghost_neighbors: Vec<usize>,
}

/// The consensus step of coupled aggregation: candidate aggregates in,
/// globally consistent partition out. Implementations must be
/// deterministic; every participating rank's candidates are required
/// before any id is final.
pub trait AggregateExchange {
    fn reconcile(
        &self,
        graph: &VertexGraph,
        distribution: &RowDistribution,
        options: &AggregationBuilder,
        candidates: Vec<RankCandidates>,
    ) -> Result<CoupledAggregates>;
}

/// Result of a coupled aggregation: one global partition with aggregate
/// ids grouped contiguously by rooting rank.
#[derive(Clone, Debug, Serialize)]
pub struct CoupledAggregates {
    vertex_to_aggregate: Vec<Option<usize>>,
    roots: Vec<usize>,
    sizes: Vec<usize>,
    emergency: Vec<bool>,
    rank_offsets: Vec<usize>,
    cross_processors: bool,
}

impl CoupledAggregates {
    pub fn num_aggregates(&self) -> usize {
        self.roots.len()
    }

    /// Aggregates rooted on one rank, the per-rank count a distributed run
    /// reports locally.
    pub fn local_num_aggregates(&self, rank: usize) -> usize {
        self.rank_offsets[rank + 1] - self.rank_offsets[rank]
    }

    /// First aggregate id rooted on `rank`.
    pub fn rank_offset(&self, rank: usize) -> usize {
        self.rank_offsets[rank]
    }

    pub fn aggregate_of(&self, vertex: usize) -> Option<usize> {
        self.vertex_to_aggregate[vertex]
    }

    pub fn aggregate_sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn size_of(&self, agg: usize) -> usize {
        self.sizes[agg]
    }

    pub fn root_of(&self, agg: usize) -> usize {
        self.roots[agg]
    }

    pub fn is_emergency(&self, agg: usize) -> bool {
        self.emergency[agg]
    }

    pub fn num_unaggregated(&self) -> usize {
        self.vertex_to_aggregate
            .iter()
            .filter(|a| a.is_none())
            .count()
    }

    /// Global members of one aggregate, ascending.
    pub fn members(&self, agg: usize) -> Vec<usize> {
        self.vertex_to_aggregate
            .iter()
            .enumerate()
            .filter_map(|(v, a)| (*a == Some(agg)).then(|| v))
            .collect()
    }

    /// Whether the members of `agg` are owned by more than one rank.
    pub fn spans_ranks(&self, agg: usize, distribution: &RowDistribution) -> bool {
        let mut owner = None;
        for vertex in self.members(agg) {
            let rank = distribution.owner_of(vertex);
            if owner.get_or_insert(rank) != &rank {
                return true;
            }
        }
        false
    }

    /// True whenever more than one rank took part, regardless of whether a
    /// boundary aggregate actually formed.
    pub fn cross_processors(&self) -> bool {
        self.cross_processors
    }
}

/// Runs coupled aggregation: rank-local growth phases in parallel, then one
/// reconcile pass through `exchange`.
pub fn aggregate_coupled(
    options: &AggregationBuilder,
    graph: &VertexGraph,
    distribution: &RowDistribution,
    exchange: &dyn AggregateExchange,
) -> Result<CoupledAggregates> {
    options.validate()?;
    let candidates: Vec<RankCandidates> = (0..distribution.num_ranks())
        .into_par_iter()
        .map(|rank| {
            let local = distribution.local_graph_with_ghosts(graph, rank)?;
            let mut aggregates = Aggregates::new(local.num_owned());
            options.run_growth_phases(&local, &mut aggregates);

            let member_lists = aggregates.member_lists();
            let candidate_aggs = (0..aggregates.num_aggregates())
                .map(|agg| {
                    let root = aggregates.root_of(agg);
                    let mut members = vec![local.global_id(root)];
                    members.extend(
                        member_lists[agg]
                            .iter()
                            .filter(|&&v| v != root)
                            .map(|&v| local.global_id(v)),
                    );
                    members
                })
                .collect();
            let leftovers = aggregates
                .unaggregated()
                .into_iter()
                .map(|v| Leftover {
                    vertex: local.global_id(v),
                    ghost_neighbors: local
                        .neighbors(v)
                        .iter()
                        .filter(|&&u| !local.is_owned(u))
                        .map(|&u| local.global_id(u))
                        .collect(),
                })
                .collect();
            Ok(RankCandidates {
                rank,
                aggregates: candidate_aggs,
                leftovers,
            })
        })
        .collect::<Result<_>>()?;
    exchange.reconcile(graph, distribution, options, candidates)
}

/// Deterministic single-process stand-in for the distributed exchange.
/// Join requests are served lowest rank first, lowest vertex first.
pub struct InProcessExchange;

impl AggregateExchange for InProcessExchange {
    fn reconcile(
        &self,
        graph: &VertexGraph,
        distribution: &RowDistribution,
        options: &AggregationBuilder,
        mut candidates: Vec<RankCandidates>,
    ) -> Result<CoupledAggregates> {
        let ranks = distribution.num_ranks();
        let num_vertices = graph.num_owned();
        candidates.sort_by_key(|c| c.rank);

        let mut assignment: Vec<Option<(usize, usize)>> = vec![None; num_vertices];
        let mut per_rank: Vec<Vec<Vec<usize>>> = vec![Vec::new(); ranks];
        let mut per_rank_emergency: Vec<Vec<bool>> = vec![Vec::new(); ranks];
        let mut leftovers_by_rank: Vec<Vec<Leftover>> = Vec::with_capacity(ranks);
        leftovers_by_rank.resize_with(ranks, Vec::new);

        for candidate in candidates {
            let RankCandidates {
                rank,
                aggregates,
                leftovers,
            } = candidate;
            if rank >= ranks {
                return Err(Error::RankOutOfRange { rank, ranks });
            }
            for (idx, members) in aggregates.iter().enumerate() {
                for &vertex in members {
                    assignment[vertex] = Some((rank, idx));
                }
            }
            per_rank_emergency[rank] = vec![false; aggregates.len()];
            per_rank[rank] = aggregates;
            leftovers_by_rank[rank] = leftovers;
        }

        // boundary leftovers ask a neighboring rank's aggregate for a spot
        for rank in 0..ranks {
            for leftover in &leftovers_by_rank[rank] {
                let vertex = leftover.vertex;
                if assignment[vertex].is_some() {
                    continue;
                }
                for &ghost in &leftover.ghost_neighbors {
                    if let Some((r, idx)) = assignment[ghost] {
                        if per_rank[r][idx].len() < options.max_agg_size {
                            per_rank[r][idx].push(vertex);
                            assignment[vertex] = Some((r, idx));
                            break;
                        }
                    }
                }
            }
        }

        // emergency pass over whatever is still unclaimed, same bias rules
        // as the local phase 3 but on global adjacency
        if options.enable_phase3 {
            for rank in 0..ranks {
                for leftover in &leftovers_by_rank[rank] {
                    let vertex = leftover.vertex;
                    if assignment[vertex].is_some() {
                        continue;
                    }
                    let mut free = Vec::new();
                    let mut neighbor_aggs = Vec::new();
                    for &u in graph.neighbors(vertex) {
                        match assignment[u] {
                            Some(target) => neighbor_aggs.push(target),
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
                        if let Some(&(r, idx)) = neighbor_aggs
                            .iter()
                            .find(|&&(r, idx)| per_rank[r][idx].len() < options.max_agg_size)
                        {
                            per_rank[r][idx].push(vertex);
                            assignment[vertex] = Some((r, idx));
                            continue;
                        }
                    }
                    if !free.is_empty() {
                        let idx = per_rank[rank].len();
                        let mut members = vec![vertex];
                        assignment[vertex] = Some((rank, idx));
                        for u in free {
                            if members.len() >= options.max_agg_size {
                                break;
                            }
                            assignment[u] = Some((rank, idx));
                            members.push(u);
                        }
                        per_rank[rank].push(members);
                        per_rank_emergency[rank].push(true);
                        continue;
                    }
                    if let Some(&(r, idx)) = neighbor_aggs
                        .iter()
                        .find(|&&(r, idx)| per_rank[r][idx].len() < options.max_agg_size)
                    {
                        per_rank[r][idx].push(vertex);
                        assignment[vertex] = Some((r, idx));
                        continue;
                    }
                    let idx = per_rank[rank].len();
                    per_rank[rank].push(vec![vertex]);
                    per_rank_emergency[rank].push(true);
                    assignment[vertex] = Some((rank, idx));
                }
            }
        }

        let mut rank_offsets = Vec::with_capacity(ranks + 1);
        rank_offsets.push(0);
        for rank in 0..ranks {
            rank_offsets.push(rank_offsets[rank] + per_rank[rank].len());
        }

        let total = rank_offsets[ranks];
        let mut vertex_to_aggregate = vec![None; num_vertices];
        let mut roots = Vec::with_capacity(total);
        let mut sizes = Vec::with_capacity(total);
        let mut emergency = Vec::with_capacity(total);
        for rank in 0..ranks {
            for (idx, members) in per_rank[rank].iter().enumerate() {
                let agg = rank_offsets[rank] + idx;
                roots.push(members[0]);
                sizes.push(members.len());
                emergency.push(per_rank_emergency[rank][idx]);
                for &vertex in members {
                    vertex_to_aggregate[vertex] = Some(agg);
                }
            }
        }
        debug!("reconciled {total} aggregates across {ranks} ranks");

        Ok(CoupledAggregates {
            vertex_to_aggregate,
            roots,
            sizes,
            emergency,
            rank_offsets,
            cross_processors: ranks > 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{amalgamate, GraphOptions};
    use crate::utils::laplace_1d;

    #[test]
    fn single_rank_coupled_matches_uncoupled_shape() {
        let (graph, _) = amalgamate(&laplace_1d(12), &GraphOptions::default()).unwrap();
        let dist = RowDistribution::contiguous(12, 1).unwrap();
        let builder = AggregationBuilder {
            min_agg_size: 3,
            max_agg_size: 3,
            ..AggregationBuilder::default()
        };
        let coupled = aggregate_coupled(&builder, &graph, &dist, &InProcessExchange).unwrap();
        let uncoupled = builder.aggregate(&graph).unwrap();

        assert!(!coupled.cross_processors());
        assert_eq!(coupled.num_aggregates(), uncoupled.num_aggregates());
        for vertex in 0..12 {
            assert_eq!(coupled.aggregate_of(vertex), uncoupled.aggregate_of(vertex));
        }
    }

    #[test]
    fn ids_stay_contiguous_per_rooting_rank() {
        let (graph, _) = amalgamate(&laplace_1d(18), &GraphOptions::default()).unwrap();
        let dist = RowDistribution::contiguous(18, 3).unwrap();
        let builder = AggregationBuilder {
            min_agg_size: 3,
            max_agg_size: 3,
            ..AggregationBuilder::default()
        };
        let coupled = aggregate_coupled(&builder, &graph, &dist, &InProcessExchange).unwrap();
        assert_eq!(coupled.num_aggregates(), 6);
        for rank in 0..3 {
            assert_eq!(coupled.local_num_aggregates(rank), 2);
        }
        // roots of rank r's aggregates are owned by rank r
        for agg in 0..coupled.num_aggregates() {
            let owner = dist.owner_of(coupled.root_of(agg));
            assert_eq!(owner, Some(agg / 2));
        }
    }
}

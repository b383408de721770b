//! The result of one aggregation call and its bookkeeping.

use serde::{Deserialize, Serialize};

use crate::{CooMatrix, CsrMatrix};

/// A partition of graph vertices into aggregates.
///
/// Built fresh by each aggregation call and owned by the caller afterwards.
/// Aggregate ids are contiguous from zero; every aggregate remembers its
/// root (the seed vertex) and whether it was formed by the emergency pass.
/// Vertices the enabled phases failed to claim stay unassigned and are
/// reported by [`num_unaggregated`](Self::num_unaggregated).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aggregates {
    vertex_to_aggregate: Vec<Option<usize>>,
    roots: Vec<usize>,
    sizes: Vec<usize>,
    emergency: Vec<bool>,
    cross_processors: bool,
}

impl Aggregates {
    pub(crate) fn new(num_vertices: usize) -> Self {
        Self {
            vertex_to_aggregate: vec![None; num_vertices],
            roots: Vec::new(),
            sizes: Vec::new(),
            emergency: Vec::new(),
            cross_processors: false,
        }
    }

    /// Starts a new aggregate rooted at `root` and returns its id.
    pub(crate) fn create(&mut self, root: usize) -> usize {
        let agg = self.roots.len();
        self.roots.push(root);
        self.sizes.push(0);
        self.emergency.push(false);
        self.assign(root, agg);
        agg
    }

    pub(crate) fn assign(&mut self, vertex: usize, agg: usize) {
        debug_assert!(self.vertex_to_aggregate[vertex].is_none());
        self.vertex_to_aggregate[vertex] = Some(agg);
        self.sizes[agg] += 1;
    }

    pub(crate) fn mark_emergency(&mut self, agg: usize) {
        self.emergency[agg] = true;
    }

    pub fn num_vertices(&self) -> usize {
        self.vertex_to_aggregate.len()
    }

    pub fn num_aggregates(&self) -> usize {
        self.roots.len()
    }

    pub fn aggregate_of(&self, vertex: usize) -> Option<usize> {
        self.vertex_to_aggregate[vertex]
    }

    pub fn vertex_to_aggregate(&self) -> &[Option<usize>] {
        &self.vertex_to_aggregate
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

    pub fn is_root(&self, vertex: usize) -> bool {
        self.vertex_to_aggregate[vertex]
            .map_or(false, |agg| self.roots[agg] == vertex)
    }

    /// Whether `agg` was formed by the emergency pass, exempting it from the
    /// minimum size bound.
    pub fn is_emergency(&self, agg: usize) -> bool {
        self.emergency[agg]
    }

    /// True when the result may contain aggregates spanning rank boundaries.
    pub fn cross_processors(&self) -> bool {
        self.cross_processors
    }

    pub fn num_unaggregated(&self) -> usize {
        self.vertex_to_aggregate
            .iter()
            .filter(|a| a.is_none())
            .count()
    }

    /// Unclaimed vertices in ascending order.
    pub fn unaggregated(&self) -> Vec<usize> {
        self.vertex_to_aggregate
            .iter()
            .enumerate()
            .filter_map(|(v, agg)| agg.is_none().then(|| v))
            .collect()
    }

    /// Members of one aggregate, ascending.
    pub fn members(&self, agg: usize) -> Vec<usize> {
        self.vertex_to_aggregate
            .iter()
            .enumerate()
            .filter_map(|(v, a)| (*a == Some(agg)).then(|| v))
            .collect()
    }

    /// Member lists for all aggregates in one sweep.
    pub fn member_lists(&self) -> Vec<Vec<usize>> {
        let mut lists = vec![Vec::new(); self.num_aggregates()];
        for (vertex, agg) in self.vertex_to_aggregate.iter().enumerate() {
            if let Some(agg) = agg {
                lists[*agg].push(vertex);
            }
        }
        lists
    }

    /// The tentative prolongator: a 0/1 matrix with one column per
    /// aggregate. Rows of unaggregated vertices are empty; on full coverage
    /// every row sums to one.
    pub fn partition_matrix(&self) -> CsrMatrix {
        let mut partition =
            CooMatrix::new((self.vertex_to_aggregate.len(), self.num_aggregates()));
        for (vertex, agg) in self.vertex_to_aggregate.iter().enumerate() {
            if let Some(agg) = agg {
                partition.add_triplet(vertex, *agg, 1.0);
            }
        }
        partition.to_csr::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_assign_track_sizes_and_roots() {
        let mut aggs = Aggregates::new(5);
        let a = aggs.create(1);
        aggs.assign(0, a);
        aggs.assign(2, a);
        let b = aggs.create(3);

        assert_eq!(aggs.num_aggregates(), 2);
        assert_eq!(aggs.size_of(a), 3);
        assert_eq!(aggs.size_of(b), 1);
        assert_eq!(aggs.root_of(a), 1);
        assert!(aggs.is_root(1));
        assert!(!aggs.is_root(0));
        assert_eq!(aggs.members(a), vec![0, 1, 2]);
        assert_eq!(aggs.unaggregated(), vec![4]);
        assert_eq!(aggs.num_unaggregated(), 1);
    }

    #[test]
    fn partition_matrix_has_one_entry_per_claimed_vertex() {
        let mut aggs = Aggregates::new(4);
        let a = aggs.create(0);
        aggs.assign(1, a);
        let b = aggs.create(2);
        aggs.assign(3, b);

        let p = aggs.partition_matrix();
        assert_eq!(p.shape(), (4, 2));
        assert_eq!(p.nnz(), 4);
        assert_eq!(p.get(1, 0), Some(&1.0));
        assert_eq!(p.get(3, 1), Some(&1.0));
        assert_eq!(p.get(3, 0), None);
    }
}

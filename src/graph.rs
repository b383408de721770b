//! Vertex graph construction from a sparse matrix: dropping of weak
//! couplings, amalgamation of block rows into mesh nodes, and contiguous
//! row distributions for multi-rank runs.

use std::ops::Range;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::{CooMatrix, CsrMatrix};

/// Controls how a matrix is turned into a vertex graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphOptions {
    /// Number of consecutive matrix rows collapsed into one graph vertex.
    pub block_size: usize,
    /// Relative drop tolerance: an off-diagonal entry `a_ij` survives when
    /// `|a_ij| > tol * sqrt(|a_ii| * |a_jj|)`. Zero keeps every entry with a
    /// nonzero value.
    pub drop_tolerance: f64,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            block_size: 1,
            drop_tolerance: 0.0,
        }
    }
}

/// Adjacency over amalgamated vertices, immutable during aggregation.
///
/// Vertices `0..num_owned` are owned by the local rank; any further indices
/// are read-only ghost copies of vertices owned elsewhere. For a graph built
/// directly from a matrix every vertex is owned and `global_id` is the
/// identity.
#[derive(Clone, Debug)]
pub struct VertexGraph {
    offsets: Vec<usize>,
    targets: Vec<usize>,
    num_owned: usize,
    global_ids: Vec<usize>,
}

impl VertexGraph {
    pub(crate) fn new(
        offsets: Vec<usize>,
        targets: Vec<usize>,
        num_owned: usize,
        global_ids: Vec<usize>,
    ) -> Self {
        debug_assert_eq!(offsets.len(), global_ids.len() + 1);
        debug_assert!(num_owned <= global_ids.len());
        Self {
            offsets,
            targets,
            num_owned,
            global_ids,
        }
    }

    /// Number of vertices owned by this rank.
    pub fn num_owned(&self) -> usize {
        self.num_owned
    }

    /// Owned plus ghost vertices.
    pub fn num_total(&self) -> usize {
        self.global_ids.len()
    }

    pub fn is_owned(&self, vertex: usize) -> bool {
        vertex < self.num_owned
    }

    /// Neighbor indices of `vertex`, ascending, self excluded.
    pub fn neighbors(&self, vertex: usize) -> &[usize] {
        &self.targets[self.offsets[vertex]..self.offsets[vertex + 1]]
    }

    pub fn degree(&self, vertex: usize) -> usize {
        self.offsets[vertex + 1] - self.offsets[vertex]
    }

    pub fn global_id(&self, vertex: usize) -> usize {
        self.global_ids[vertex]
    }

    pub fn global_ids(&self) -> &[usize] {
        &self.global_ids
    }

    pub fn num_edges(&self) -> usize {
        self.targets.len()
    }
}

/// Mapping from graph vertices back to the matrix rows they amalgamate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AmalgamationInfo {
    block_size: usize,
    num_rows: usize,
}

impl AmalgamationInfo {
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Matrix rows collapsed into global vertex `node`.
    pub fn rows_of(&self, node: usize) -> Range<usize> {
        node * self.block_size..(node + 1) * self.block_size
    }

    /// Expands aggregate membership back to matrix rows. Returns CSR-style
    /// arrays: `agg_start[a]..agg_start[a + 1]` indexes the rows of
    /// aggregate `a` inside `agg_to_row`. The graph supplies the local to
    /// global vertex translation.
    pub fn unamalgamate(
        &self,
        aggregates: &crate::Aggregates,
        graph: &VertexGraph,
    ) -> (Vec<usize>, Vec<usize>) {
        let lists = aggregates.member_lists();
        let mut agg_start = Vec::with_capacity(lists.len() + 1);
        agg_start.push(0);
        let mut agg_to_row = Vec::new();
        for members in &lists {
            for &vertex in members {
                agg_to_row.extend(self.rows_of(graph.global_id(vertex)));
            }
            agg_start.push(agg_to_row.len());
        }
        (agg_start, agg_to_row)
    }
}

/// Builds the amalgamated vertex graph of a square sparse matrix.
///
/// Self couplings are always removed; off-diagonal entries are kept or
/// dropped by the relative tolerance in `options`. With a block size of `b`
/// rows `b*k..b*(k+1)` collapse into vertex `k` and an edge between two
/// vertices exists when any entry of the corresponding block survives.
pub fn amalgamate(
    mat: &CsrMatrix,
    options: &GraphOptions,
) -> Result<(VertexGraph, AmalgamationInfo)> {
    let (rows, cols) = (mat.rows(), mat.cols());
    if rows != cols {
        return Err(Error::NotSquare { rows, cols });
    }
    let block_size = options.block_size;
    if block_size == 0 || rows % block_size != 0 {
        return Err(Error::BlockMismatch { block_size, rows });
    }
    let num_vertices = rows / block_size;

    let mut diag = vec![0.0; rows];
    for (i, row) in mat.outer_iterator().enumerate() {
        if let Some(&val) = row.get(i) {
            diag[i] = val;
        }
    }

    let mut pattern = CooMatrix::new((num_vertices, num_vertices));
    for (i, row) in mat.outer_iterator().enumerate() {
        for (j, &val) in row.iter() {
            if i == j {
                continue;
            }
            let threshold = options.drop_tolerance * (diag[i].abs() * diag[j].abs()).sqrt();
            if val.abs() > threshold {
                let (node_i, node_j) = (i / block_size, j / block_size);
                if node_i != node_j {
                    pattern.add_triplet(node_i, node_j, 1.0);
                }
            }
        }
    }
    let adjacency = pattern.to_csr::<usize>();

    let mut offsets = Vec::with_capacity(num_vertices + 1);
    offsets.push(0);
    let mut targets = Vec::new();
    for row in adjacency.outer_iterator() {
        targets.extend(row.iter().map(|(j, _)| j));
        offsets.push(targets.len());
    }
    debug!(
        "amalgamated {} rows into {} vertices with {} edges",
        rows,
        num_vertices,
        targets.len()
    );

    Ok((
        VertexGraph::new(offsets, targets, num_vertices, (0..num_vertices).collect()),
        AmalgamationInfo {
            block_size,
            num_rows: rows,
        },
    ))
}

/// Contiguous assignment of graph vertices to ranks, mimicking the row maps
/// of a distributed matrix. Even split, remainder to the leading ranks.
#[derive(Clone, Debug)]
pub struct RowDistribution {
    ranges: Vec<Range<usize>>,
}

impl RowDistribution {
    pub fn contiguous(num_vertices: usize, ranks: usize) -> Result<Self> {
        if ranks == 0 || ranks > num_vertices {
            return Err(Error::BadDistribution {
                vertices: num_vertices,
                ranks,
            });
        }
        let base = num_vertices / ranks;
        let extra = num_vertices % ranks;
        let mut ranges = Vec::with_capacity(ranks);
        let mut start = 0;
        for rank in 0..ranks {
            let len = base + usize::from(rank < extra);
            ranges.push(start..start + len);
            start += len;
        }
        Ok(Self { ranges })
    }

    pub fn num_ranks(&self) -> usize {
        self.ranges.len()
    }

    pub fn owned_range(&self, rank: usize) -> Result<Range<usize>> {
        self.ranges
            .get(rank)
            .cloned()
            .ok_or(Error::RankOutOfRange {
                rank,
                ranks: self.ranges.len(),
            })
    }

    pub fn num_owned(&self, rank: usize) -> usize {
        self.ranges.get(rank).map_or(0, |r| r.len())
    }

    pub fn owner_of(&self, vertex: usize) -> Option<usize> {
        self.ranges.iter().position(|r| r.contains(&vertex))
    }

    /// Owned-only view of `graph` for one rank: vertices re-indexed from
    /// zero, edges to other ranks removed. This is the uncoupled engine's
    /// whole world.
    pub fn local_graph(&self, graph: &VertexGraph, rank: usize) -> Result<VertexGraph> {
        let range = self.owned_range(rank)?;
        let start = range.start;
        let mut offsets = Vec::with_capacity(range.len() + 1);
        offsets.push(0);
        let mut targets = Vec::new();
        for vertex in range.clone() {
            targets.extend(
                graph
                    .neighbors(vertex)
                    .iter()
                    .filter(|&&u| range.contains(&u))
                    .map(|&u| u - start),
            );
            offsets.push(targets.len());
        }
        Ok(VertexGraph::new(
            offsets,
            targets,
            range.len(),
            range.collect(),
        ))
    }

    /// Like [`local_graph`](Self::local_graph) but with off-rank neighbors
    /// present as ghost vertices after the owned block. Ghost adjacency is
    /// restricted to owned vertices.
    pub fn local_graph_with_ghosts(
        &self,
        graph: &VertexGraph,
        rank: usize,
    ) -> Result<VertexGraph> {
        let range = self.owned_range(rank)?;
        let start = range.start;
        let num_owned = range.len();

        let mut ghost_set = IndexSet::new();
        for vertex in range.clone() {
            for &u in graph.neighbors(vertex) {
                if !range.contains(&u) {
                    ghost_set.insert(u);
                }
            }
        }
        let mut ghosts: Vec<usize> = ghost_set.into_iter().collect();
        ghosts.sort_unstable();
        let ghost_index = |u: usize| num_owned + ghosts.binary_search(&u).expect("ghost not indexed");

        let mut offsets = Vec::with_capacity(num_owned + ghosts.len() + 1);
        offsets.push(0);
        let mut targets = Vec::new();
        for vertex in range.clone() {
            let mut row: Vec<usize> = graph
                .neighbors(vertex)
                .iter()
                .map(|&u| {
                    if range.contains(&u) {
                        u - start
                    } else {
                        ghost_index(u)
                    }
                })
                .collect();
            row.sort_unstable();
            targets.extend(row);
            offsets.push(targets.len());
        }
        for &ghost in &ghosts {
            targets.extend(
                graph
                    .neighbors(ghost)
                    .iter()
                    .filter(|&&u| range.contains(&u))
                    .map(|&u| u - start),
            );
            offsets.push(targets.len());
        }

        let global_ids = range.chain(ghosts).collect();
        Ok(VertexGraph::new(offsets, targets, num_owned, global_ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{block_expand, laplace_1d};

    #[test]
    fn path_adjacency_drops_self_loops() {
        let (graph, _) = amalgamate(&laplace_1d(5), &GraphOptions::default()).unwrap();
        assert_eq!(graph.num_owned(), 5);
        assert_eq!(graph.neighbors(0), &[1]);
        assert_eq!(graph.neighbors(2), &[1, 3]);
        assert_eq!(graph.neighbors(4), &[3]);
    }

    #[test]
    fn weak_couplings_are_dropped() {
        let mut coo = crate::CooMatrix::new((3, 3));
        for i in 0..3 {
            coo.add_triplet(i, i, 2.0);
        }
        coo.add_triplet(0, 1, -1.0);
        coo.add_triplet(1, 0, -1.0);
        coo.add_triplet(1, 2, -0.01);
        coo.add_triplet(2, 1, -0.01);
        let mat = coo.to_csr::<usize>();

        let options = GraphOptions {
            drop_tolerance: 0.1,
            ..GraphOptions::default()
        };
        let (graph, _) = amalgamate(&mat, &options).unwrap();
        assert_eq!(graph.neighbors(0), &[1]);
        assert_eq!(graph.neighbors(1), &[0]);
        assert!(graph.neighbors(2).is_empty());
    }

    #[test]
    fn block_rows_collapse_to_one_vertex() {
        let mat = block_expand(&laplace_1d(4), 2);
        let options = GraphOptions {
            block_size: 2,
            ..GraphOptions::default()
        };
        let (graph, amalg) = amalgamate(&mat, &options).unwrap();
        assert_eq!(graph.num_owned(), 4);
        assert_eq!(graph.neighbors(1), &[0, 2]);
        assert_eq!(amalg.rows_of(2), 4..6);
    }

    #[test]
    fn rejects_non_square_and_bad_blocks() {
        let mat = laplace_1d(5);
        let options = GraphOptions {
            block_size: 2,
            ..GraphOptions::default()
        };
        assert_eq!(
            amalgamate(&mat, &options).unwrap_err(),
            Error::BlockMismatch {
                block_size: 2,
                rows: 5
            }
        );
    }

    #[test]
    fn contiguous_split_hands_remainder_to_leading_ranks() {
        let dist = RowDistribution::contiguous(10, 3).unwrap();
        assert_eq!(dist.owned_range(0).unwrap(), 0..4);
        assert_eq!(dist.owned_range(1).unwrap(), 4..7);
        assert_eq!(dist.owned_range(2).unwrap(), 7..10);
        assert_eq!(dist.owner_of(6), Some(1));
        assert_eq!(dist.owner_of(10), None);
    }

    #[test]
    fn local_graph_severs_off_rank_edges() {
        let (graph, _) = amalgamate(&laplace_1d(10), &GraphOptions::default()).unwrap();
        let dist = RowDistribution::contiguous(10, 2).unwrap();
        let local = dist.local_graph(&graph, 1).unwrap();
        assert_eq!(local.num_owned(), 5);
        assert_eq!(local.num_total(), 5);
        // global vertex 5 lost its edge back to 4
        assert_eq!(local.neighbors(0), &[1]);
        assert_eq!(local.global_id(0), 5);
    }

    #[test]
    fn ghost_view_exposes_boundary_vertices() {
        let (graph, _) = amalgamate(&laplace_1d(10), &GraphOptions::default()).unwrap();
        let dist = RowDistribution::contiguous(10, 2).unwrap();
        let local = dist.local_graph_with_ghosts(&graph, 1).unwrap();
        assert_eq!(local.num_owned(), 5);
        assert_eq!(local.num_total(), 6);
        assert!(!local.is_owned(5));
        assert_eq!(local.global_id(5), 4);
        // global 5 sees the ghost of global 4 and its owned neighbor 6
        assert_eq!(local.neighbors(0), &[1, 5]);
        // the ghost only sees back into the owned block
        assert_eq!(local.neighbors(5), &[0]);
    }
}

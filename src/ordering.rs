//! Vertex visitation orders for the seed phase.

use std::collections::VecDeque;

use rand::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::graph::VertexGraph;

/// Order in which phase 1 considers seed candidates. Aggregation is greedy,
/// so the order fully determines the partition.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum Ordering {
    /// Ascending vertex index. Deterministic, the default.
    #[default]
    Natural,
    /// Uniformly shuffled indices.
    // TODO take an explicit seed so shuffled runs can be replayed
    Random,
    /// Breadth-first traversal from vertex 0, unreached components appended
    /// in index order.
    Graph,
}

impl Ordering {
    /// Visitation order over the owned vertices of `graph`.
    pub fn visit_order(&self, graph: &VertexGraph) -> Vec<usize> {
        let num_owned = graph.num_owned();
        match self {
            Ordering::Natural => (0..num_owned).collect(),
            Ordering::Random => {
                let mut order: Vec<usize> = (0..num_owned).collect();
                order.shuffle(&mut thread_rng());
                order
            }
            Ordering::Graph => {
                let mut order = Vec::with_capacity(num_owned);
                let mut visited = vec![false; num_owned];
                let mut queue = VecDeque::new();
                for root in 0..num_owned {
                    if visited[root] {
                        continue;
                    }
                    visited[root] = true;
                    queue.push_back(root);
                    while let Some(vertex) = queue.pop_front() {
                        order.push(vertex);
                        for &u in graph.neighbors(vertex) {
                            if u < num_owned && !visited[u] {
                                visited[u] = true;
                                queue.push_back(u);
                            }
                        }
                    }
                }
                order
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{amalgamate, GraphOptions};
    use crate::utils::laplace_1d;

    fn path(n: usize) -> VertexGraph {
        amalgamate(&laplace_1d(n), &GraphOptions::default()).unwrap().0
    }

    #[test]
    fn natural_is_ascending() {
        let graph = path(6);
        assert_eq!(Ordering::Natural.visit_order(&graph), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn graph_order_walks_the_path() {
        let graph = path(6);
        assert_eq!(Ordering::Graph.visit_order(&graph), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn random_is_a_permutation() {
        let graph = path(16);
        let mut order = Ordering::Random.visit_order(&graph);
        order.sort_unstable();
        assert_eq!(order, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn orderings_parse_from_names() {
        assert_eq!("natural".parse::<Ordering>().unwrap(), Ordering::Natural);
        assert_eq!("random".parse::<Ordering>().unwrap(), Ordering::Random);
        assert_eq!("graph".parse::<Ordering>().unwrap(), Ordering::Graph);
        assert!("spiral".parse::<Ordering>().is_err());
    }
}

//! Error types for graph construction and aggregation configuration.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The leftover phases refine an existing partition and cannot run
    /// without the seed phase having produced one.
    #[error("phase {phase} requires phase 1 to be enabled")]
    PhaseDependency { phase: &'static str },

    #[error("no aggregation phases enabled")]
    NoPhasesEnabled,

    #[error("invalid aggregate size bounds: min {min}, max {max}")]
    InvalidSizeBounds { min: usize, max: usize },

    #[error("phase 3 aggregate creation threshold {0} outside [0, 1]")]
    InvalidThreshold(f64),

    #[error("matrix must be square, got {rows} x {cols}")]
    NotSquare { rows: usize, cols: usize },

    #[error("block size {block_size} does not divide matrix dimension {rows}")]
    BlockMismatch { block_size: usize, rows: usize },

    #[error("rank {rank} out of range for {ranks} ranks")]
    RankOutOfRange { rank: usize, ranks: usize },

    #[error("cannot distribute {vertices} vertices over {ranks} ranks")]
    BadDistribution { vertices: usize, ranks: usize },
}

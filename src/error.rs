use std::path::PathBuf;

use thiserror::Error;

/// Failures that stop a partitioning run. Recoverable conditions such as a
/// malformed auxiliary attribute or an infeasible solver call never surface
/// here; they are logged and the run continues with a degraded input.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("hyperedge {hyperedge} references vertex {vertex}, but there are only {num_vertices} vertices")]
    VertexOutOfRange {
        hyperedge: usize,
        vertex: usize,
        num_vertices: usize,
    },

    #[error("timing path {path} references vertex {vertex}, but there are only {num_vertices} vertices")]
    PathVertexOutOfRange {
        path: usize,
        vertex: usize,
        num_vertices: usize,
    },

    #[error("timing path {path} references hyperedge {hyperedge}, but there are only {num_hyperedges} hyperedges")]
    HyperedgeOutOfRange {
        path: usize,
        hyperedge: usize,
        num_hyperedges: usize,
    },

    #[error("{what} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("number of parts must be at least 2, got {0}")]
    InvalidPartCount(usize),

    #[error("invalid balance configuration: {0}")]
    InvalidBalance(String),

    #[error("hypergraph has no vertices")]
    EmptyHypergraph,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}:{line}: {msg}", file.display())]
    Parse {
        file: PathBuf,
        line: usize,
        msg: String,
    },
}

pub type Result<T> = std::result::Result<T, PartitionError>;

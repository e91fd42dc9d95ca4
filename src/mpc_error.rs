//! MpcError: unified error type for mesh-mpc public APIs
//!
//! Every fallible operation in the crate returns `Result<_, MpcError>`. None of
//! these errors are retried internally: they indicate malformed constraint input,
//! a stale constraint after mutation, or divergent collective participation.

use thiserror::Error;

/// Unified error type for multi-point constraint construction and assembly.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MpcError {
    /// The geometric matcher could not resolve a query point to any cell on any rank.
    #[error("no cell found for query point {x:?} (query #{query})")]
    NoMatchFound { query: usize, x: [f64; 3] },

    /// A slave DOF appeared more than once across the constraint fragments.
    #[error("slave dof {slave} is constrained more than once")]
    DuplicateSlave { slave: usize },

    /// A slave lists the same master more than once in a single relation.
    #[error("slave dof {slave} references master {master} more than once")]
    RedundantMaster { slave: usize, master: u64 },

    /// A master DOF is itself constrained (constraint chains are not supported).
    #[error("master dof {master} (owned by rank {owner}) is itself a slave")]
    CircularConstraint { master: u64, owner: usize },

    /// A master DOF is not present in the extended index map or in the vector layout.
    #[error("master dof {master} is missing from the extended index map: {reason}")]
    IncompleteGhostData { master: u64, reason: String },

    /// A distributed operation observed divergent participation across ranks.
    #[error("collective `{operation}` diverged on rank {rank}: {detail}")]
    CollectiveMismatch {
        operation: &'static str,
        rank: usize,
        detail: String,
    },

    /// The flat constraint arrays are inconsistent (lengths, offsets, empty lists).
    #[error("malformed constraint data: {0}")]
    MalformedData(String),

    /// A DOF (slave, or a shipped matrix row) is not owned by the receiving rank.
    #[error("dof {dof} is not owned by rank {rank}")]
    NotOwned { dof: u64, rank: usize },

    /// A matrix insertion targeted an entry outside the sparsity pattern.
    #[error("entry ({row}, {col}) is not in the sparsity pattern")]
    MissingPatternEntry { row: u64, col: u64 },

    /// Two sizes that must agree do not.
    #[error("dimension mismatch in {context}: expected {expected}, got {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    /// A cell has a singular or inverted geometry map.
    #[error("cell {cell} has degenerate geometry")]
    DegenerateCell { cell: usize },

    /// A local or global index was out of range for the structure it addresses.
    #[error("index {index} out of range (len {len}) in {context}")]
    IndexOutOfRange {
        context: &'static str,
        index: u64,
        len: u64,
    },

    /// Communication with a neighbor failed.
    #[error("communication error with rank {neighbor}: {reason}")]
    CommError { neighbor: usize, reason: String },

    /// The linear system could not be factorised.
    #[error("linear system is singular")]
    SingularSystem,

    /// The requested combination of inputs is not supported.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl MpcError {
    /// Short, stable label used when errors are agreed upon collectively.
    pub fn kind(&self) -> &'static str {
        match self {
            MpcError::NoMatchFound { .. } => "NoMatchFound",
            MpcError::DuplicateSlave { .. } => "DuplicateSlave",
            MpcError::RedundantMaster { .. } => "RedundantMaster",
            MpcError::CircularConstraint { .. } => "CircularConstraint",
            MpcError::IncompleteGhostData { .. } => "IncompleteGhostData",
            MpcError::CollectiveMismatch { .. } => "CollectiveMismatch",
            MpcError::MalformedData(_) => "MalformedData",
            MpcError::NotOwned { .. } => "NotOwned",
            MpcError::MissingPatternEntry { .. } => "MissingPatternEntry",
            MpcError::DimensionMismatch { .. } => "DimensionMismatch",
            MpcError::DegenerateCell { .. } => "DegenerateCell",
            MpcError::IndexOutOfRange { .. } => "IndexOutOfRange",
            MpcError::CommError { .. } => "CommError",
            MpcError::SingularSystem => "SingularSystem",
            MpcError::Unsupported(_) => "Unsupported",
        }
    }
}

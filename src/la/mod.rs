//! Distributed linear algebra collaborators: sparsity, matrix, ghosted
//! vector and a reference solver.

pub mod matrix;
pub mod solver;
pub mod sparsity;
pub mod vector;

pub use matrix::{DistMatrix, MatrixInsert};
pub use solver::{DenseLuSolver, LinearSolver};
pub use sparsity::{SparsityPattern, add_pattern_diagonal};
pub use vector::GhostedVector;

use crate::mpc_error::MpcError;
use crate::space::IndexMap;

/// Global scalar DOF of local scalar DOF `local`.
pub(crate) fn global_dof(map: &IndexMap, bs: usize, local: usize) -> Result<u64, MpcError> {
    Ok(map.local_to_global(local / bs)? * bs as u64 + (local % bs) as u64)
}

/// Owning rank of global scalar DOF `dof`.
pub(crate) fn owner_of_dof(map: &IndexMap, bs: usize, dof: u64) -> Result<usize, MpcError> {
    map.owner(dof / bs as u64)
}

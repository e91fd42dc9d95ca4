#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-mpc
//!
//! mesh-mpc adds multi-point constraints to finite-element assembly on
//! distributed simplex meshes. A constraint ties a *slave* DOF to a weighted
//! sum of *master* DOFs, which may live on other partitions: periodic
//! boundaries, frictionless slip contact, inelastic contact, hanging nodes.
//!
//! ## Features
//! - Geometric matching of points to cells across partitions (R*-tree per rank,
//!   request/response over a sparse all-to-all)
//! - Builders for periodic, slip and inelastic constraints, plus vertex normals
//! - Consolidation with global checks: duplicate slaves, repeated masters,
//!   constraint chains, ghost-slave propagation and index-map extension
//! - Sparsity patterns and matrix/vector assembly with slaves eliminated onto
//!   their masters (`Kᵀ A K`), Dirichlet lifting and backsubstitution
//! - Pluggable communication backends (serial, Rayon threads, MPI)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-mpc = "0.3"
//! # features = ["mpi-support"]
//! ```
//!
//! A typical pipeline builds `MpcData` fragments with the builders in [`mpc`],
//! consolidates them into a [`MultiPointConstraint`](mpc::MultiPointConstraint),
//! and hands it to [`LinearProblem`](problem::LinearProblem) or to the
//! functions in [`assembly`] directly. Every collective function must be
//! called by all ranks in the same order.

pub mod assembly;
pub mod comm;
pub mod config;
pub mod forms;
pub mod la;
pub mod mesh;
pub mod mpc;
pub mod mpc_error;
pub mod problem;
pub mod space;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::assembly::{
        apply_lifting, assemble_matrix, assemble_vector, create_matrix, create_sparsity_pattern,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::comm::{Communicator, NoComm, RayonComm};
    pub use crate::config::{MasterMergePolicy, MpcConfig};
    pub use crate::forms::{BilinearForm, DirichletBC, LinearForm};
    pub use crate::la::{DenseLuSolver, DistMatrix, GhostedVector, LinearSolver, MatrixInsert};
    pub use crate::mesh::{CellKind, Mesh, MeshTags};
    pub use crate::mpc::{MpcData, MultiPointConstraint, RelationKind};
    pub use crate::mpc_error::MpcError;
    pub use crate::problem::LinearProblem;
    pub use crate::space::{FunctionSpace, IndexMap};
}

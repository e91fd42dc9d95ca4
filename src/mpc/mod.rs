//! Multi-point constraints: relation data, geometric builders and the
//! consolidated constraint used by assembly.

pub mod constraint;
pub mod contact;
pub mod data;
pub mod matcher;
pub mod normals;
pub mod periodic;

use std::sync::Arc;

pub use constraint::MultiPointConstraint;
pub use contact::{create_contact_inelastic_condition, create_contact_slip_condition};
pub use data::MpcData;
pub use matcher::{GeometricMatcher, MatchHit};
pub use normals::{create_average_normal, create_dof_to_facet_map, create_normal_approximation};
pub use periodic::{create_periodic_constraint_geometrical, create_periodic_constraint_topological};

use crate::comm::Communicator;
use crate::config::MpcConfig;
use crate::forms::DirichletBC;
use crate::la::GhostedVector;
use crate::mesh::MeshTags;
use crate::mpc_error::MpcError;
use crate::space::FunctionSpace;

/// How slave DOFs on the facets marked with the slave marker find their masters.
pub enum RelationKind<'a> {
    /// Masters at `relation(x)`; DOFs in `bcs` stay unconstrained.
    Periodic {
        relation: &'a dyn Fn(&[f64; 3]) -> [f64; 3],
        bcs: &'a [DirichletBC],
    },
    /// Frictionless slip against the facets marked `master_marker`.
    Slip {
        master_marker: i32,
        normal: &'a GhostedVector,
    },
    /// Inelastic contact against the facets marked `master_marker`.
    Inelastic { master_marker: i32 },
}

impl MultiPointConstraint {
    /// Build the relation of `kind` and consolidate it. Collective.
    pub fn from_relation<C: Communicator>(
        comm: &C,
        space: Arc<FunctionSpace>,
        tags: &MeshTags,
        slave_marker: i32,
        kind: RelationKind<'_>,
        config: MpcConfig,
    ) -> Result<Self, MpcError> {
        let data = match kind {
            RelationKind::Periodic { relation, bcs } => create_periodic_constraint_topological(
                comm,
                &space,
                tags,
                slave_marker,
                relation,
                bcs,
                &config,
            )?,
            RelationKind::Slip {
                master_marker,
                normal,
            } => create_contact_slip_condition(
                comm,
                &space,
                tags,
                slave_marker,
                master_marker,
                normal,
                &config,
            )?,
            RelationKind::Inelastic { master_marker } => create_contact_inelastic_condition(
                comm,
                &space,
                tags,
                slave_marker,
                master_marker,
                &config,
            )?,
        };
        Self::new(comm, space, &data, config)
    }
}

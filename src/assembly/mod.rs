//! Assembly with slave DOFs eliminated onto their masters.
//!
//! Every cell tensor is expanded as `Kᵀ A_e K`, where `K` maps each cell DOF
//! to itself, or, for a slave, to its masters weighted by their coefficients.
//! Cells without slaves take the unexpanded path. All indices are local to
//! the constraint's extended [`IndexMap`](crate::space::IndexMap), whose prefix
//! is the function space's own layout.
//!
//! Dirichlet rows and columns are dropped after expansion; the configured
//! diagonal value is then added once per owned slave and owned Dirichlet DOF.

pub mod matrix;
pub mod pattern;
pub mod vector;

pub use matrix::assemble_matrix;
pub use pattern::{create_matrix, create_sparsity_pattern};
pub use vector::{apply_lifting, assemble_vector};

use hashbrown::HashMap;

use crate::mpc::MultiPointConstraint;
use crate::mpc_error::MpcError;
use crate::space::FunctionSpace;

/// Expanded cell DOFs with the weights mapping each cell position onto them.
pub(crate) struct CellExpansion {
    /// Distinct local DOFs after replacing slaves by masters, in first-seen order.
    pub dofs: Vec<usize>,
    /// For each cell position, `(index into dofs, weight)`.
    pub weights: Vec<Vec<(usize, f64)>>,
}

impl CellExpansion {
    pub(crate) fn new(mpc: &MultiPointConstraint, cell_dofs: &[usize]) -> Self {
        let mut dofs: Vec<usize> = Vec::with_capacity(cell_dofs.len());
        let mut index: HashMap<usize, usize> = HashMap::with_capacity(cell_dofs.len());
        let mut slot = |d: usize| {
            *index.entry(d).or_insert_with(|| {
                dofs.push(d);
                dofs.len() - 1
            })
        };
        let weights = cell_dofs
            .iter()
            .map(|&d| match mpc.slave_index(d) {
                Some(i) => mpc.relation(i).map(|(m, c)| (slot(m), c)).collect(),
                None => vec![(slot(d), 1.0)],
            })
            .collect();
        Self { dofs, weights }
    }

    /// The unexpanded cell: identity weights.
    pub(crate) fn identity(cell_dofs: &[usize]) -> Self {
        Self {
            dofs: cell_dofs.to_vec(),
            weights: (0..cell_dofs.len()).map(|p| vec![(p, 1.0)]).collect(),
        }
    }

    /// `Kᵀ A_e K` for a row-major cell matrix.
    pub(crate) fn matrix(&self, ae: &[f64]) -> Vec<f64> {
        let n = self.weights.len();
        let m = self.dofs.len();
        let mut ke = vec![0.0; m * m];
        for (p, wp) in self.weights.iter().enumerate() {
            for (q, wq) in self.weights.iter().enumerate() {
                let a = ae[p * n + q];
                if a == 0.0 {
                    continue;
                }
                for &(i, ci) in wp {
                    for &(j, cj) in wq {
                        ke[i * m + j] += ci * a * cj;
                    }
                }
            }
        }
        ke
    }

    /// `Kᵀ b_e` for a cell vector.
    pub(crate) fn vector(&self, be: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.dofs.len()];
        for (wp, &b) in self.weights.iter().zip(be) {
            for &(i, c) in wp {
                out[i] += c * b;
            }
        }
        out
    }
}

/// Expansion of `cell`, or the identity when it has no slaves.
pub(crate) fn expand_cell(mpc: &MultiPointConstraint, cell: usize) -> CellExpansion {
    let dofs = mpc.dofmap().cell_dofs(cell);
    if mpc.cell_to_slaves(cell).is_empty() {
        CellExpansion::identity(&dofs)
    } else {
        CellExpansion::new(mpc, &dofs)
    }
}

/// The form must live on the constraint's space.
pub(crate) fn check_space(form_space: &FunctionSpace, mpc: &MultiPointConstraint) -> Result<(), MpcError> {
    let own = mpc.function_space();
    if form_space.bs() != own.bs() {
        return Err(MpcError::DimensionMismatch {
            context: "form block size",
            expected: own.bs(),
            found: form_space.bs(),
        });
    }
    if form_space.dofmap() != own.dofmap() {
        return Err(MpcError::MalformedData(
            "form and constraint are defined on different function spaces".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use crate::config::MpcConfig;
    use crate::mesh::generation::create_interval;
    use crate::mpc::MpcData;
    use std::sync::Arc;

    #[test]
    fn slave_position_is_replaced_by_masters() {
        let mesh = Arc::new(create_interval(3, 0.0, 1.0).unwrap());
        let v = Arc::new(FunctionSpace::p1(mesh, 1).unwrap());
        let mut d = MpcData::new();
        d.push(1, [(0, 0.5, 0), (3, 0.5, 0)]);
        let mpc = MultiPointConstraint::new(&NoComm, v, &d, MpcConfig::default()).unwrap();

        let e = expand_cell(&mpc, 0);
        assert_eq!(e.dofs, vec![0, 3]);
        // cell 0 = {0, 1}: position 0 -> dof 0, position 1 -> 0.5 dof 0 + 0.5 dof 3
        let ke = e.matrix(&[1.0, -1.0, -1.0, 1.0]);
        assert_eq!(ke, vec![0.25, -0.25, -0.25, 0.25]);
        assert_eq!(e.vector(&[1.0, 2.0]), vec![2.0, 1.0]);

        let plain = expand_cell(&mpc, 2);
        assert_eq!(plain.dofs, vec![2, 3]);
        assert_eq!(plain.matrix(&[1.0, 2.0, 3.0, 4.0]), vec![1.0, 2.0, 3.0, 4.0]);
    }
}

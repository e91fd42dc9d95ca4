//! Constrained right-hand side and Dirichlet lifting.

use rayon::prelude::*;

use crate::assembly::{check_space, expand_cell};
use crate::forms::{BilinearForm, DirichletBC, LinearForm};
use crate::la::GhostedVector;
use crate::mpc::MultiPointConstraint;
use crate::mpc_error::MpcError;

fn check_vector(b: &GhostedVector, mpc: &MultiPointConstraint) -> Result<(), MpcError> {
    if b.bs() != mpc.function_space().bs() {
        return Err(MpcError::DimensionMismatch {
            context: "vector block size",
            expected: mpc.function_space().bs(),
            found: b.bs(),
        });
    }
    mpc.check_layout(b.index_map())
}

/// Add `Kᵀ b_e` of every cell into `b`, ghosts included.
///
/// Slave entries receive nothing; follow with
/// [`GhostedVector::scatter_reverse_add`] to move ghost contributions to
/// their owners.
pub fn assemble_vector(
    b: &mut GhostedVector,
    form: &impl LinearForm,
    mpc: &MultiPointConstraint,
) -> Result<(), MpcError> {
    check_space(form.function_space(), mpc)?;
    check_vector(b, mpc)?;
    let n = mpc.dofmap().cell_size();
    let cells: Vec<(Vec<usize>, Vec<f64>)> = (0..mpc.dofmap().num_cells())
        .into_par_iter()
        .map(|cell| -> Result<(Vec<usize>, Vec<f64>), MpcError> {
            let mut be = vec![0.0; n];
            form.cell_vector(cell, &mut be)?;
            let expansion = expand_cell(mpc, cell);
            let values = expansion.vector(&be);
            Ok((expansion.dofs, values))
        })
        .collect::<Result<_, MpcError>>()?;
    let out = b.values_mut();
    for (dofs, values) in &cells {
        for (&d, &v) in dofs.iter().zip(values) {
            out[d] += v;
        }
    }
    Ok(())
}

/// `b -= scale * A g` over the constrained operator of `form`, where `g`
/// holds the Dirichlet values and zero elsewhere. Rows of Dirichlet DOFs are
/// left alone; they are overwritten by [`DirichletBC::set`].
pub fn apply_lifting(
    b: &mut GhostedVector,
    form: &impl BilinearForm,
    mpc: &MultiPointConstraint,
    bcs: &[DirichletBC],
    scale: f64,
) -> Result<(), MpcError> {
    check_space(form.function_space(), mpc)?;
    check_vector(b, mpc)?;
    let bc_value = |d: usize| bcs.iter().find_map(|bc| bc.value(d));
    let n = mpc.dofmap().cell_size();
    let cells: Vec<(Vec<usize>, Vec<f64>)> = (0..mpc.dofmap().num_cells())
        .into_par_iter()
        .map(|cell| -> Result<Option<(Vec<usize>, Vec<f64>)>, MpcError> {
            let expansion = expand_cell(mpc, cell);
            let g: Vec<Option<f64>> = expansion.dofs.iter().map(|&d| bc_value(d)).collect();
            if g.iter().all(Option::is_none) {
                return Ok(None);
            }
            let mut ae = vec![0.0; n * n];
            form.cell_matrix(cell, &mut ae)?;
            let ke = expansion.matrix(&ae);
            let m = expansion.dofs.len();
            let lifted = (0..m)
                .map(|i| match g[i] {
                    Some(_) => 0.0,
                    None => (0..m)
                        .filter_map(|j| g[j].map(|gj| ke[i * m + j] * gj))
                        .sum(),
                })
                .collect();
            Ok(Some((expansion.dofs, lifted)))
        })
        .filter_map(Result::transpose)
        .collect::<Result<_, MpcError>>()?;
    let out = b.values_mut();
    for (dofs, values) in &cells {
        for (&d, &v) in dofs.iter().zip(values) {
            out[d] -= scale * v;
        }
    }
    log::debug!("[apply_lifting] {} cells touch Dirichlet DOFs", cells.len());
    Ok(())
}

//! Constrained matrix assembly.

use std::collections::BTreeSet;

use rayon::prelude::*;

use crate::assembly::{check_space, expand_cell};
use crate::forms::{BilinearForm, DirichletBC};
use crate::la::MatrixInsert;
use crate::mpc::MultiPointConstraint;
use crate::mpc_error::MpcError;

/// Add the constrained operator of `form` into `a`.
///
/// Element tensors are computed and expanded in parallel; nothing is inserted
/// unless every cell succeeds. Off-process rows stay stashed in `a` until it is
/// finalized.
pub fn assemble_matrix(
    a: &mut impl MatrixInsert,
    form: &impl BilinearForm,
    mpc: &MultiPointConstraint,
    bcs: &[DirichletBC],
) -> Result<(), MpcError> {
    check_space(form.function_space(), mpc)?;
    if a.bs() != mpc.function_space().bs() {
        return Err(MpcError::DimensionMismatch {
            context: "matrix block size",
            expected: mpc.function_space().bs(),
            found: a.bs(),
        });
    }
    mpc.check_layout(a.layout())?;

    let is_bc = |d: usize| bcs.iter().any(|bc| bc.contains(d));
    let n = mpc.dofmap().cell_size();
    let cells: Vec<(Vec<usize>, Vec<f64>)> = (0..mpc.dofmap().num_cells())
        .into_par_iter()
        .map(|cell| -> Result<(Vec<usize>, Vec<f64>), MpcError> {
            let mut ae = vec![0.0; n * n];
            form.cell_matrix(cell, &mut ae)?;
            let expansion = expand_cell(mpc, cell);
            let mut ke = expansion.matrix(&ae);
            let m = expansion.dofs.len();
            for (k, &d) in expansion.dofs.iter().enumerate() {
                if is_bc(d) {
                    ke[k * m..(k + 1) * m].iter_mut().for_each(|v| *v = 0.0);
                    (0..m).for_each(|i| ke[i * m + k] = 0.0);
                }
            }
            Ok((expansion.dofs, ke))
        })
        .collect::<Result<_, MpcError>>()?;

    let owned = mpc.num_owned_dofs();
    let diagonal: BTreeSet<usize> = mpc.slaves()[..mpc.num_local_slaves()]
        .iter()
        .copied()
        .chain(bcs.iter().flat_map(|bc| bc.owned_dofs()))
        .filter(|&d| d < owned)
        .collect();

    for (dofs, _) in &cells {
        a.check(dofs, dofs)?;
    }
    for &d in &diagonal {
        a.check(&[d], &[d])?;
    }

    for (dofs, ke) in &cells {
        a.add(dofs, dofs, ke)?;
    }
    let value = mpc.config().diagonal_value;
    for &d in &diagonal {
        a.add(&[d], &[d], &[value])?;
    }
    log::debug!(
        "[assemble_matrix] {} cells ({} with slaves), {} diagonal entries",
        cells.len(),
        mpc.slave_cells().len(),
        diagonal.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::create_matrix;
    use crate::comm::NoComm;
    use crate::config::MpcConfig;
    use crate::forms::StiffnessForm;
    use crate::la::{DistMatrix, SparsityPattern};
    use crate::mesh::generation::create_interval;
    use crate::mpc::MpcData;
    use crate::space::FunctionSpace;
    use std::sync::Arc;

    fn periodic_interval() -> (Arc<FunctionSpace>, MultiPointConstraint) {
        let mesh = Arc::new(create_interval(3, 0.0, 1.0).unwrap());
        let v = Arc::new(FunctionSpace::p1(mesh, 1).unwrap());
        let mut d = MpcData::new();
        d.push(3, [(0, 1.0, 0)]);
        let mpc = MultiPointConstraint::new(&NoComm, Arc::clone(&v), &d, MpcConfig::default())
            .unwrap();
        (v, mpc)
    }

    #[test]
    fn slave_row_holds_only_the_diagonal() {
        let (v, mpc) = periodic_interval();
        let a = StiffnessForm::new(v, 1.0);
        let mut mat = create_matrix(&NoComm, &a, &mpc).unwrap();
        assemble_matrix(&mut mat, &a, &mpc, &[]).unwrap();
        mat.finalize(&NoComm).unwrap();
        // h = 1/3, so each element contributes 3 * [[1, -1], [-1, 1]]
        assert!((mat.get(0, 0) - 6.0).abs() < 1e-12);
        assert!((mat.get(0, 2) + 3.0).abs() < 1e-12);
        assert_eq!(mat.get(3, 3), 1.0);
        assert_eq!(mat.get(3, 2), 0.0);
        assert_eq!(mat.get(2, 3), 0.0);
    }

    #[test]
    fn dirichlet_rows_are_dropped_after_expansion() {
        let (v, mpc) = periodic_interval();
        let bc = DirichletBC::new(&v, &[1], |_, _| 0.0).unwrap();
        let a = StiffnessForm::new(Arc::clone(&v), 1.0);
        let mut mat = create_matrix(&NoComm, &a, &mpc).unwrap();
        assemble_matrix(&mut mat, &a, &mpc, &[bc]).unwrap();
        assert_eq!(mat.get(1, 1), 1.0);
        assert_eq!(mat.get(0, 1), 0.0);
        assert_eq!(mat.get(1, 2), 0.0);
    }

    #[test]
    fn missing_pattern_entry_leaves_the_matrix_untouched() {
        let (v, mpc) = periodic_interval();
        // pattern of the unconstrained operator lacks the (2, 0) coupling
        let mut p = SparsityPattern::new(Arc::clone(mpc.index_map()), 1);
        for c in 0..3 {
            p.insert(&[c, c + 1], &[c, c + 1]).unwrap();
        }
        p.assemble(&NoComm).unwrap();
        let mut mat = DistMatrix::new(&p).unwrap();
        let a = StiffnessForm::new(v, 1.0);
        assert!(matches!(
            assemble_matrix(&mut mat, &a, &mpc, &[]),
            Err(MpcError::MissingPatternEntry { .. })
        ));
        assert!(mat.to_dense().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn form_on_another_space_is_rejected() {
        let (v, mpc) = periodic_interval();
        let a = StiffnessForm::new(v, 1.0);
        let mut mat = create_matrix(&NoComm, &a, &mpc).unwrap();
        let finer = Arc::new(create_interval(4, 0.0, 1.0).unwrap());
        let w = Arc::new(FunctionSpace::p1(finer, 1).unwrap());
        assert!(matches!(
            assemble_matrix(&mut mat, &StiffnessForm::new(w, 1.0), &mpc, &[]),
            Err(MpcError::MalformedData(_))
        ));
    }
}

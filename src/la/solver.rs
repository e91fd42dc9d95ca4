//! Linear solvers for the assembled constrained system.
//!
//! [`DenseLuSolver`] gathers the whole system on every rank and factorises it
//! with `nalgebra`; it is meant for small problems and tests.

use nalgebra::{DMatrix, DVector};

use crate::comm::wire::WireEntry;
use crate::comm::{CommTag, Communicator, all_gather, collective_check};
use crate::la::{DistMatrix, GhostedVector};
use crate::mpc_error::MpcError;

const GATHER_A_TAG: CommTag = CommTag::new(0x4d00);
const GATHER_B_TAG: CommTag = CommTag::new(0x4d04);
const SOLVE_CHECK_TAG: CommTag = CommTag::new(0x4d08);

/// Solve `A x = b` for distributed operands.
pub trait LinearSolver: Send + Sync {
    /// Writes the owned entries of `x` and refreshes its ghosts. Collective.
    fn solve<C: Communicator>(
        &self,
        comm: &C,
        a: &DistMatrix,
        b: &GhostedVector,
        x: &mut GhostedVector,
    ) -> Result<(), MpcError>;

    /// Solver name for diagnostics.
    fn name(&self) -> &str;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DenseLuSolver;

impl LinearSolver for DenseLuSolver {
    fn solve<C: Communicator>(
        &self,
        comm: &C,
        a: &DistMatrix,
        b: &GhostedVector,
        x: &mut GhostedVector,
    ) -> Result<(), MpcError> {
        let map = a.index_map();
        let bs = b.bs() as u64;
        let n = (map.size_global() * bs) as usize;
        let row0 = map.local_range().0 * bs;

        let mut local_a = Vec::with_capacity(a.num_nonzeros());
        for r in 0..a.num_owned_rows() {
            let (cols, vals) = a.row(r);
            local_a.extend(
                cols.iter()
                    .zip(vals)
                    .map(|(&c, &v)| WireEntry::new(row0 + r as u64, c, v)),
            );
        }
        let local_b: Vec<WireEntry> = b
            .owned()
            .iter()
            .enumerate()
            .map(|(i, &v)| WireEntry::new(row0 + i as u64, 0, v))
            .collect();
        let all_a = all_gather(comm, GATHER_A_TAG, &local_a)?;
        let all_b = all_gather(comm, GATHER_B_TAG, &local_b)?;

        let mut dense = DMatrix::zeros(n, n);
        for e in all_a.iter().flatten() {
            dense[(e.row() as usize, e.col() as usize)] += e.value();
        }
        let mut rhs = DVector::zeros(n);
        for e in all_b.iter().flatten() {
            rhs[e.row() as usize] = e.value();
        }
        let solution = dense.lu().solve(&rhs).ok_or(MpcError::SingularSystem);
        let solution = collective_check(comm, SOLVE_CHECK_TAG, "DenseLuSolver::solve", solution)?;
        log::debug!("[{}] solved {n} unknowns on rank {}", self.name(), comm.rank());

        for (i, v) in x.owned_mut().iter_mut().enumerate() {
            *v = solution[row0 as usize + i];
        }
        x.scatter_forward(comm)
    }

    fn name(&self) -> &str {
        "DenseLuSolver"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use crate::la::{MatrixInsert, SparsityPattern};
    use crate::space::IndexMap;
    use std::sync::Arc;

    #[test]
    fn solves_small_system() {
        let map = Arc::new(IndexMap::serial(2));
        let mut p = SparsityPattern::new(Arc::clone(&map), 1);
        p.insert(&[0, 1], &[0, 1]).unwrap();
        p.assemble(&NoComm).unwrap();
        let mut a = DistMatrix::new(&p).unwrap();
        a.add(&[0, 1], &[0, 1], &[2.0, 1.0, 1.0, 3.0]).unwrap();
        let b = GhostedVector::from_values(Arc::clone(&map), 1, vec![3.0, 5.0]).unwrap();
        let mut x = GhostedVector::new(map, 1);
        DenseLuSolver.solve(&NoComm, &a, &b, &mut x).unwrap();
        assert!((x.values()[0] - 0.8).abs() < 1e-12);
        assert!((x.values()[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn singular_matrix_is_reported() {
        let map = Arc::new(IndexMap::serial(2));
        let mut p = SparsityPattern::new(Arc::clone(&map), 1);
        p.insert(&[0], &[0]).unwrap();
        p.assemble(&NoComm).unwrap();
        let a = DistMatrix::new(&p).unwrap();
        let b = GhostedVector::new(Arc::clone(&map), 1);
        let mut x = GhostedVector::new(map, 1);
        assert_eq!(
            DenseLuSolver.solve(&NoComm, &a, &b, &mut x),
            Err(MpcError::SingularSystem)
        );
    }
}

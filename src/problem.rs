//! Linear variational problem with multi-point constraints.
//!
//! [`LinearProblem::solve`] runs the full constrained pipeline:
//! 1. assemble the constrained operator and ship off-process rows,
//! 2. assemble the right-hand side, lift Dirichlet values, reverse-scatter,
//! 3. set Dirichlet rows, solve,
//! 4. refresh ghosts and recover slave values by backsubstitution.

use std::sync::Arc;

use crate::assembly::{apply_lifting, assemble_matrix, assemble_vector, create_matrix};
use crate::comm::{CommTag, Communicator, collective_check};
use crate::forms::{BilinearForm, DirichletBC, LinearForm};
use crate::la::{DistMatrix, GhostedVector, LinearSolver};
use crate::mpc::MultiPointConstraint;
use crate::mpc_error::MpcError;

const PROBLEM_TAG: CommTag = CommTag::new(0x5300);

pub struct LinearProblem<A, L, S> {
    a: A,
    l: L,
    mpc: Arc<MultiPointConstraint>,
    bcs: Vec<DirichletBC>,
    solver: S,
    matrix: DistMatrix,
    b: GhostedVector,
    u: GhostedVector,
}

impl<A, L, S> LinearProblem<A, L, S>
where
    A: BilinearForm,
    L: LinearForm,
    S: LinearSolver,
{
    /// Build the constrained sparsity pattern once. Collective.
    pub fn new<C: Communicator>(
        comm: &C,
        a: A,
        l: L,
        mpc: Arc<MultiPointConstraint>,
        bcs: Vec<DirichletBC>,
        solver: S,
    ) -> Result<Self, MpcError> {
        let matrix = create_matrix(comm, &a, &mpc)?;
        let bs = mpc.function_space().bs();
        let b = GhostedVector::new(Arc::clone(mpc.index_map()), bs);
        let u = GhostedVector::new(Arc::clone(mpc.index_map()), bs);
        Ok(Self {
            a,
            l,
            mpc,
            bcs,
            solver,
            matrix,
            b,
            u,
        })
    }

    /// Assemble and solve; returns the solution with slave and ghost values
    /// filled in. Collective.
    pub fn solve<C: Communicator>(&mut self, comm: &C) -> Result<&GhostedVector, MpcError> {
        self.matrix.zero_entries();
        let assembled = assemble_matrix(&mut self.matrix, &self.a, &self.mpc, &self.bcs);
        collective_check(comm, PROBLEM_TAG, "LinearProblem::assemble_matrix", assembled)?;
        self.matrix.finalize(comm)?;

        self.b.set(0.0);
        let rhs = assemble_vector(&mut self.b, &self.l, &self.mpc)
            .and_then(|_| apply_lifting(&mut self.b, &self.a, &self.mpc, &self.bcs, 1.0));
        collective_check(comm, PROBLEM_TAG, "LinearProblem::assemble_vector", rhs)?;
        self.b.scatter_reverse_add(comm)?;
        let diagonal = self.mpc.config().diagonal_value;
        for bc in &self.bcs {
            bc.set(&mut self.b, diagonal);
        }

        self.solver.solve(comm, &self.matrix, &self.b, &mut self.u)?;
        let recovered = self.mpc.backsubstitution(&mut self.u);
        collective_check(comm, PROBLEM_TAG, "LinearProblem::backsubstitution", recovered)?;
        log::info!(
            "[LinearProblem] rank {} solved with {}",
            comm.rank(),
            self.solver.name()
        );
        Ok(&self.u)
    }

    pub fn matrix(&self) -> &DistMatrix {
        &self.matrix
    }

    pub fn rhs(&self) -> &GhostedVector {
        &self.b
    }

    pub fn solution(&self) -> &GhostedVector {
        &self.u
    }

    pub fn mpc(&self) -> &Arc<MultiPointConstraint> {
        &self.mpc
    }

    pub fn bcs(&self) -> &[DirichletBC] {
        &self.bcs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use crate::config::MpcConfig;
    use crate::forms::{SourceForm, StiffnessForm};
    use crate::la::DenseLuSolver;
    use crate::mesh::generation::create_interval;
    use crate::mpc::MpcData;
    use crate::space::FunctionSpace;

    #[test]
    fn periodic_end_matches_clamped_start() {
        // -u'' = 1, u(0) = 0 and u(1) tied to u(0): nodal values are x(1 - x)/2
        let mesh = Arc::new(create_interval(4, 0.0, 1.0).unwrap());
        let v = Arc::new(FunctionSpace::p1(mesh, 1).unwrap());
        let mut d = MpcData::new();
        d.push(4, [(0, 1.0, 0)]);
        let mpc = Arc::new(
            MultiPointConstraint::new(&NoComm, Arc::clone(&v), &d, MpcConfig::default()).unwrap(),
        );
        let bc = DirichletBC::new(&v, &[0], |_, _| 0.0).unwrap();
        let mut problem = LinearProblem::new(
            &NoComm,
            StiffnessForm::new(Arc::clone(&v), 1.0),
            SourceForm::new(Arc::clone(&v), |_, _| 1.0),
            mpc,
            vec![bc],
            DenseLuSolver,
        )
        .unwrap();
        let u = problem.solve(&NoComm).unwrap().values().to_vec();
        for (i, ui) in u.iter().enumerate() {
            let x = i as f64 / 4.0;
            assert!((ui - x * (1.0 - x) / 2.0).abs() < 1e-12, "node {i}: {ui}");
        }

        // a second solve reassembles from scratch
        let again = problem.solve(&NoComm).unwrap().values().to_vec();
        assert_eq!(u, again);
    }
}

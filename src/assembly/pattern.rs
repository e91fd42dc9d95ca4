//! Sparsity pattern with master couplings.

use std::sync::Arc;

use itertools::Itertools;

use crate::assembly::{check_space, expand_cell};
use crate::comm::{CommTag, Communicator, collective_check};
use crate::forms::BilinearForm;
use crate::la::{DistMatrix, SparsityPattern, add_pattern_diagonal};
use crate::mpc::MultiPointConstraint;
use crate::mpc_error::MpcError;

const PATTERN_CHECK_TAG: CommTag = CommTag::new(0x5200);

/// Pattern of `form` on the constraint's extended layout. Collective.
///
/// Holds every unconstrained cell coupling, plus, for each slave in a cell,
/// its masters against every cell DOF and against the masters of every slave
/// in the cell, plus the diagonal block of each owned slave block.
pub fn create_sparsity_pattern<C: Communicator>(
    comm: &C,
    form: &impl BilinearForm,
    mpc: &MultiPointConstraint,
) -> Result<SparsityPattern, MpcError> {
    let bs = mpc.function_space().bs();
    let mut pattern = SparsityPattern::new(Arc::clone(mpc.index_map()), bs);
    let inserted = check_space(form.function_space(), mpc).and_then(|_| {
        let dofmap = mpc.dofmap();
        for cell in 0..dofmap.num_cells() {
            let dofs = dofmap.cell_dofs(cell);
            pattern.insert(&dofs, &dofs)?;
            if mpc.cell_to_slaves(cell).is_empty() {
                continue;
            }
            let expanded = expand_cell(mpc, cell).dofs;
            let masters: Vec<usize> =
                expanded.into_iter().filter(|d| !dofs.contains(d)).collect();
            pattern.insert(&masters, &dofs)?;
            pattern.insert(&dofs, &masters)?;
            pattern.insert(&masters, &masters)?;
        }
        let blocks: Vec<usize> = mpc.slaves()[..mpc.num_local_slaves()]
            .iter()
            .map(|s| s / bs)
            .sorted_unstable()
            .dedup()
            .collect();
        add_pattern_diagonal(&mut pattern, &blocks)
    });
    collective_check(comm, PATTERN_CHECK_TAG, "create_sparsity_pattern", inserted)?;
    pattern.assemble(comm)?;
    log::debug!(
        "[create_sparsity_pattern] rank {}: {} nonzeros in {} owned rows",
        comm.rank(),
        pattern.num_nonzeros(),
        pattern.num_owned_rows()
    );
    Ok(pattern)
}

/// Zeroed matrix on [`create_sparsity_pattern`]. Collective.
pub fn create_matrix<C: Communicator>(
    comm: &C,
    form: &impl BilinearForm,
    mpc: &MultiPointConstraint,
) -> Result<DistMatrix, MpcError> {
    let pattern = create_sparsity_pattern(comm, form, mpc)?;
    DistMatrix::new(&pattern)
}

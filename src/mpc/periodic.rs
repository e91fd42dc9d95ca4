//! Periodic constraints: `u(x) = u(relation(x))` on a marked boundary.

use std::sync::Arc;

use crate::comm::Communicator;
use crate::config::MpcConfig;
use crate::forms::DirichletBC;
use crate::mesh::MeshTags;
use crate::mpc::MpcData;
use crate::mpc::matcher::GeometricMatcher;
use crate::mpc_error::MpcError;
use crate::space::FunctionSpace;

/// Periodic condition on the blocks of facets marked `marker`. Collective.
///
/// Each slave block's coordinates are mapped through `relation` and located
/// among all local cells of every rank. DOFs in `bcs` are not constrained.
pub fn create_periodic_constraint_topological<C: Communicator>(
    comm: &C,
    space: &Arc<FunctionSpace>,
    tags: &MeshTags,
    marker: i32,
    relation: impl Fn(&[f64; 3]) -> [f64; 3],
    bcs: &[DirichletBC],
    config: &MpcConfig,
) -> Result<MpcData, MpcError> {
    let blocks = space.locate_dofs_topological(&tags.find(marker));
    periodic_from_blocks(comm, space, &blocks, relation, bcs, config)
}

/// Periodic condition on the blocks whose coordinates satisfy `on`. Collective.
pub fn create_periodic_constraint_geometrical<C: Communicator>(
    comm: &C,
    space: &Arc<FunctionSpace>,
    on: impl Fn(&[f64; 3]) -> bool,
    relation: impl Fn(&[f64; 3]) -> [f64; 3],
    bcs: &[DirichletBC],
    config: &MpcConfig,
) -> Result<MpcData, MpcError> {
    let blocks = space.locate_dofs_geometrical(on);
    periodic_from_blocks(comm, space, &blocks, relation, bcs, config)
}

fn periodic_from_blocks<C: Communicator>(
    comm: &C,
    space: &Arc<FunctionSpace>,
    blocks: &[usize],
    relation: impl Fn(&[f64; 3]) -> [f64; 3],
    bcs: &[DirichletBC],
    config: &MpcConfig,
) -> Result<MpcData, MpcError> {
    let bs = space.bs();
    let owned = space.index_map().size_local();
    let constrained = |dof: usize| bcs.iter().any(|bc| bc.contains(dof));
    let blocks: Vec<usize> = blocks
        .iter()
        .copied()
        .filter(|&b| b < owned && (0..bs).any(|c| !constrained(b * bs + c)))
        .collect();

    let cells: Vec<usize> = (0..space.mesh().num_cells()).collect();
    let matcher = GeometricMatcher::new(comm, Arc::clone(space), &cells, config)?;
    let x = space.tabulate_dof_coordinates();
    let points: Vec<[f64; 3]> = blocks.iter().map(|&b| relation(&x[b])).collect();
    let hits = matcher.find(comm, &points)?;

    let map = space.index_map();
    let mut data = MpcData::new();
    let mut skipped = 0;
    for (&b, hit) in blocks.iter().zip(&hits) {
        let gb = (map.local_range().0 + b as u64) * bs as u64;
        for c in (0..bs).filter(|&c| !constrained(b * bs + c)) {
            let terms: Vec<(u64, f64, usize)> = hit
                .blocks
                .iter()
                .zip(&hit.owners)
                .zip(&hit.basis)
                .filter(|&(_, &phi)| phi.abs() >= config.coefficient_tolerance)
                .map(|((&mb, &o), &phi)| (mb * bs as u64 + c as u64, phi, o))
                .collect();
            if terms.is_empty() || terms.iter().any(|t| t.0 == gb + c as u64) {
                skipped += 1;
                continue;
            }
            data.push(b * bs + c, terms);
        }
    }
    log::info!(
        "[create_periodic_constraint] rank {}: {} slaves, {skipped} mapped onto themselves",
        comm.rank(),
        data.num_slaves()
    );
    Ok(data)
}

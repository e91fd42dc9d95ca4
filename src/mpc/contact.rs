//! Contact constraints between two marked boundaries.
//!
//! Each owned vertex on the slave boundary is matched to a cell touching the
//! master boundary. Slip ties the normal displacement of the slave to the
//! interpolated normal displacement of the master cell; inelastic contact
//! ties every component.

use std::sync::Arc;

use itertools::Itertools;

use crate::comm::{CommTag, Communicator, collective_check};
use crate::config::MpcConfig;
use crate::la::GhostedVector;
use crate::mesh::MeshTags;
use crate::mpc::MpcData;
use crate::mpc::matcher::{GeometricMatcher, MatchHit};
use crate::mpc_error::MpcError;
use crate::space::FunctionSpace;

const CONTACT_TAG: CommTag = CommTag::new(0x5100);

/// Owned blocks on the slave facets and the cells touching the master facets.
fn contact_sides(
    space: &FunctionSpace,
    tags: &MeshTags,
    slave_marker: i32,
    master_marker: i32,
) -> (Vec<usize>, Vec<usize>) {
    let owned = space.index_map().size_local();
    let slaves: Vec<usize> = space
        .locate_dofs_topological(&tags.find(slave_marker))
        .into_iter()
        .filter(|&b| b < owned)
        .collect();
    let facets = space.mesh().facets();
    let cells: Vec<usize> = tags
        .find(master_marker)
        .into_iter()
        .filter_map(|f| facets.get(f))
        .flat_map(|f| f.cells.iter().map(|&(c, _)| c))
        .sorted_unstable()
        .dedup()
        .collect();
    (slaves, cells)
}

fn match_slaves<C: Communicator>(
    comm: &C,
    space: &Arc<FunctionSpace>,
    slaves: &[usize],
    master_cells: &[usize],
    config: &MpcConfig,
) -> Result<Vec<MatchHit>, MpcError> {
    let matcher = GeometricMatcher::new(comm, Arc::clone(space), master_cells, config)?;
    let x = space.tabulate_dof_coordinates();
    let points: Vec<[f64; 3]> = slaves.iter().map(|&b| x[b]).collect();
    matcher.find(comm, &points)
}

/// Add `(master, coeff, owner)` to `terms`, summing repeated masters.
fn add_term(terms: &mut Vec<(u64, f64, usize)>, master: u64, coeff: f64, owner: usize) {
    match terms.iter().position(|t| t.0 == master) {
        Some(k) => terms[k].1 += coeff,
        None => terms.push((master, coeff, owner)),
    }
}

/// Drop small coefficients; returns how many were dropped.
fn prune(terms: &mut Vec<(u64, f64, usize)>, tol: f64) -> usize {
    let before = terms.len();
    terms.retain(|t| t.1.abs() >= tol);
    before - terms.len()
}

/// Frictionless slip: `u_s · n = u_m · n` at each slave vertex.
///
/// `normal` holds a unit normal per block (block size = geometric dimension),
/// typically from
/// [`create_normal_approximation`](crate::mpc::normals::create_normal_approximation).
/// The constrained component is the one where `|n|` is largest. Collective.
pub fn create_contact_slip_condition<C: Communicator>(
    comm: &C,
    space: &Arc<FunctionSpace>,
    tags: &MeshTags,
    slave_marker: i32,
    master_marker: i32,
    normal: &GhostedVector,
    config: &MpcConfig,
) -> Result<MpcData, MpcError> {
    let bs = space.bs();
    let gdim = space.mesh().gdim();
    if bs != gdim {
        return Err(MpcError::Unsupported(format!(
            "slip contact needs a vector space with {gdim} components, got {bs}"
        )));
    }
    let (slaves, master_cells) = contact_sides(space, tags, slave_marker, master_marker);
    let hits = match_slaves(comm, space, &slaves, &master_cells, config)?;

    let data = (|| -> Result<MpcData, MpcError> {
        let mut data = MpcData::new();
        let mut dropped = 0;
        let me = comm.rank();
        for (&b, hit) in slaves.iter().zip(&hits) {
            let n: Vec<f64> = (0..gdim)
                .map(|d| {
                    normal.values().get(b * bs + d).copied().ok_or(MpcError::DimensionMismatch {
                        context: "slip normal vector",
                        expected: (b + 1) * bs,
                        found: normal.len(),
                    })
                })
                .collect::<Result<_, _>>()?;
            let i = (0..gdim)
                .max_by(|&a, &c| n[a].abs().total_cmp(&n[c].abs()))
                .unwrap_or(0);
            if n[i].abs() <= config.coefficient_tolerance {
                return Err(MpcError::MalformedData(format!(
                    "zero normal at slave block {b}"
                )));
            }
            let gb = space.index_map().local_to_global(b)? * bs as u64;
            let mut terms = Vec::new();
            for j in (0..gdim).filter(|&j| j != i) {
                add_term(&mut terms, gb + j as u64, -n[j] / n[i], me);
            }
            for ((&mb, &owner), &phi) in hit.blocks.iter().zip(&hit.owners).zip(&hit.basis) {
                for (j, nj) in n.iter().enumerate() {
                    add_term(&mut terms, mb * bs as u64 + j as u64, nj / n[i] * phi, owner);
                }
            }
            dropped += prune(&mut terms, config.coefficient_tolerance);
            if !terms.is_empty() {
                data.push(b * bs + i, terms);
            }
        }
        log::info!(
            "[create_contact_slip_condition] rank {me}: {} slaves, {dropped} coefficients dropped",
            data.num_slaves()
        );
        Ok(data)
    })();
    collective_check(comm, CONTACT_TAG, "create_contact_slip_condition", data)
}

/// Inelastic contact: every component of the slave vertex follows the P1
/// interpolant of the master cell. Collective.
pub fn create_contact_inelastic_condition<C: Communicator>(
    comm: &C,
    space: &Arc<FunctionSpace>,
    tags: &MeshTags,
    slave_marker: i32,
    master_marker: i32,
    config: &MpcConfig,
) -> Result<MpcData, MpcError> {
    let bs = space.bs();
    let (slaves, master_cells) = contact_sides(space, tags, slave_marker, master_marker);
    let hits = match_slaves(comm, space, &slaves, &master_cells, config)?;

    let mut data = MpcData::new();
    let mut dropped = 0;
    for (&b, hit) in slaves.iter().zip(&hits) {
        for j in 0..bs {
            let mut terms = Vec::with_capacity(hit.blocks.len());
            for ((&mb, &owner), &phi) in hit.blocks.iter().zip(&hit.owners).zip(&hit.basis) {
                add_term(&mut terms, mb * bs as u64 + j as u64, phi, owner);
            }
            dropped += prune(&mut terms, config.coefficient_tolerance);
            if !terms.is_empty() {
                data.push(b * bs + j, terms);
            }
        }
    }
    log::info!(
        "[create_contact_inelastic_condition] rank {}: {} slaves, {dropped} coefficients dropped",
        comm.rank(),
        data.num_slaves()
    );
    Ok(data)
}

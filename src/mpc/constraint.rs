//! Consolidated multi-point constraint.
//!
//! Construction is collective and runs, on every rank:
//! 1. local checks (duplicate slaves, repeated masters, ownership),
//! 2. a query of every remote master's owner to reject constraint chains,
//! 3. propagation of relations to ranks that ghost a slave,
//! 4. extension of the block [`IndexMap`] with every remote master,
//! 5. the cell/slave adjacency used by assembly.
//!
//! Steps 3-5 are derived views of the owned relations; [`MultiPointConstraint::add_masters`]
//! recomputes all of them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::comm::wire::{WireIndex, WireMaster, kind};
use crate::comm::{CommTag, Communicator, all_to_all_v, collective_check};
use crate::config::{MasterMergePolicy, MpcConfig};
use crate::la::GhostedVector;
use crate::mpc::MpcData;
use crate::mpc_error::MpcError;
use crate::space::{DofMap, FunctionSpace, IndexMap};

const CHECK_TAG: CommTag = CommTag::new(0x4e00);
const SLAVE_QUERY_TAG: CommTag = CommTag::new(0x4e10);
const SLAVE_REPLY_TAG: CommTag = CommTag::new(0x4e20);
const GHOST_SLAVE_TAG: CommTag = CommTag::new(0x4e30);

/// Slaves of this rank (owned, then ghost) with their master relations,
/// the extended block layout and the cell adjacency.
#[derive(Debug)]
pub struct MultiPointConstraint {
    space: Arc<FunctionSpace>,
    config: MpcConfig,
    owned: MpcData,
    slaves: Vec<usize>,
    num_owned_slaves: usize,
    offsets: Vec<usize>,
    masters: Vec<u64>,
    masters_local: Vec<usize>,
    coeffs: Vec<f64>,
    owners: Vec<usize>,
    slave_lookup: HashMap<usize, usize>,
    index_map: Arc<IndexMap>,
    dofmap: DofMap,
    cell_offsets: Vec<usize>,
    cell_slaves: Vec<usize>,
    slave_cells: Vec<usize>,
    slave_cell_offsets: Vec<usize>,
    slave_cell_list: Vec<usize>,
}

/// Reject repeated slaves and apply the merge policy to repeated masters.
fn consolidate(data: &MpcData, config: &MpcConfig) -> Result<MpcData, MpcError> {
    data.validate()?;
    let mut seen = HashSet::with_capacity(data.num_slaves());
    let mut out = MpcData::new();
    for (i, &slave) in data.slaves().iter().enumerate() {
        if !seen.insert(slave) {
            return Err(MpcError::DuplicateSlave { slave });
        }
        let mut terms: Vec<(u64, f64, usize)> = Vec::new();
        for (m, c, o) in data.relation(i) {
            let Some(k) = terms.iter().position(|t| t.0 == m) else {
                terms.push((m, c, o));
                continue;
            };
            match config.merge_policy {
                MasterMergePolicy::Error => {
                    return Err(MpcError::RedundantMaster { slave, master: m });
                }
                MasterMergePolicy::Sum if terms[k].2 != o => {
                    return Err(MpcError::MalformedData(format!(
                        "master {m} of slave {slave} given owners {} and {o}",
                        terms[k].2
                    )));
                }
                MasterMergePolicy::Sum => terms[k].1 += c,
            }
        }
        out.push(slave, terms);
    }
    Ok(out)
}

/// Slaves must be owned; masters must exist and carry their true owner.
fn check_ownership(space: &FunctionSpace, data: &MpcData) -> Result<(), MpcError> {
    let rank = space.index_map().rank();
    let num_owned = space.num_owned_dofs();
    if let Some(&s) = data.slaves().iter().find(|&&s| s >= num_owned) {
        return Err(MpcError::NotOwned {
            dof: s as u64,
            rank,
        });
    }
    for (&m, &o) in data.masters().iter().zip(data.owners()) {
        let owner = space.global_dof_owner(m)?;
        if owner != o {
            return Err(MpcError::MalformedData(format!(
                "master {m} is owned by rank {owner}, not {o}"
            )));
        }
    }
    Ok(())
}

/// Ask each master's owner whether the master is one of its slaves.
fn check_circular<C: Communicator>(
    comm: &C,
    space: &FunctionSpace,
    data: &MpcData,
) -> Result<(), MpcError> {
    let me = comm.rank();
    let num_owned = space.num_owned_dofs();
    let slave_set: HashSet<usize> = data.slaves().iter().copied().collect();
    let is_owned_slave = |g: u64| {
        space
            .local_dof(g)
            .is_some_and(|l| l < num_owned && slave_set.contains(&l))
    };

    let mut local = Ok(());
    let mut remote: BTreeMap<usize, BTreeSet<u64>> = BTreeMap::new();
    for (&m, &o) in data.masters().iter().zip(data.owners()) {
        if o != me {
            remote.entry(o).or_default().insert(m);
        } else if is_owned_slave(m) && local.is_ok() {
            local = Err(MpcError::CircularConstraint { master: m, owner: o });
        }
    }
    let queries: BTreeMap<usize, Vec<WireIndex>> = remote
        .iter()
        .map(|(&o, ms)| (o, ms.iter().map(|&m| WireIndex::of(m)).collect()))
        .collect();
    let asked = all_to_all_v(comm, SLAVE_QUERY_TAG, kind::SLAVE_QUERY, &queries)?;
    let replies: BTreeMap<usize, Vec<WireIndex>> = asked
        .into_iter()
        .map(|(peer, ms)| {
            let flags = ms
                .iter()
                .map(|m| WireIndex::of(u64::from(is_owned_slave(m.get()))))
                .collect();
            (peer, flags)
        })
        .collect();
    let answers = all_to_all_v(comm, SLAVE_REPLY_TAG, kind::SLAVE_REPLY, &replies)?;
    for (owner, ms) in &remote {
        let flags = answers.get(owner).map_or(&[][..], Vec::as_slice);
        if flags.len() != ms.len() {
            local = local.and(Err(MpcError::CommError {
                neighbor: *owner,
                reason: format!("{} answers for {} slave queries", flags.len(), ms.len()),
            }));
            continue;
        }
        if let Some((&m, _)) = ms.iter().zip(flags).find(|(_, f)| f.get() != 0) {
            local = local.and(Err(MpcError::CircularConstraint {
                master: m,
                owner: *owner,
            }));
        }
    }
    collective_check(comm, CHECK_TAG, "MultiPointConstraint::circularity", local)
}

/// Send each owned slave's relation to the ranks that ghost it; returns the
/// relations received for local ghost DOFs, ordered by local DOF.
fn propagate_ghost_slaves<C: Communicator>(
    comm: &C,
    space: &FunctionSpace,
    data: &MpcData,
) -> Result<MpcData, MpcError> {
    let bs = space.bs();
    let shared = space.index_map().shared_indices();
    let mut outgoing: BTreeMap<usize, Vec<WireMaster>> = BTreeMap::new();
    let mut local = Ok(());
    for (i, &s) in data.slaves().iter().enumerate() {
        let Some(ranks) = shared.get(&(s / bs)) else {
            continue;
        };
        match space.global_dof(s) {
            Ok(gs) => {
                for &r in ranks {
                    outgoing
                        .entry(r)
                        .or_default()
                        .extend(data.relation(i).map(|(m, c, o)| WireMaster::new(gs, m, o, c)));
                }
            }
            Err(e) => local = local.and(Err(e)),
        }
    }
    let incoming = all_to_all_v(comm, GHOST_SLAVE_TAG, kind::GHOST_SLAVES, &outgoing)?;
    let mut grouped: BTreeMap<usize, Vec<(u64, f64, usize)>> = BTreeMap::new();
    for rec in incoming.values().flatten() {
        match space.local_dof(rec.slave()) {
            Some(l) if l >= space.num_owned_dofs() => grouped
                .entry(l)
                .or_default()
                .push((rec.master(), rec.coeff(), rec.owner())),
            _ => {
                local = local.and(Err(MpcError::MalformedData(format!(
                    "received relation for slave {} which is not a ghost here",
                    rec.slave()
                ))))
            }
        }
    }
    let mut ghosts = MpcData::new();
    for (s, terms) in grouped {
        ghosts.push(s, terms);
    }
    collective_check(comm, CHECK_TAG, "MultiPointConstraint::ghost_slaves", local.map(|_| ghosts))
}

impl MultiPointConstraint {
    /// Consolidate the owned relations in `data` (one or more appended
    /// fragments) into a constraint on `space`. Collective.
    pub fn new<C: Communicator>(
        comm: &C,
        space: Arc<FunctionSpace>,
        data: &MpcData,
        config: MpcConfig,
    ) -> Result<Self, MpcError> {
        let owned = consolidate(data, &config);
        let owned = collective_check(comm, CHECK_TAG, "MultiPointConstraint::consolidate", owned)?;
        Self::build(comm, space, owned, config)
    }

    fn build<C: Communicator>(
        comm: &C,
        space: Arc<FunctionSpace>,
        owned: MpcData,
        config: MpcConfig,
    ) -> Result<Self, MpcError> {
        let checked = check_ownership(&space, &owned);
        collective_check(comm, CHECK_TAG, "MultiPointConstraint::ownership", checked)?;
        check_circular(comm, &space, &owned)?;
        let ghosts = propagate_ghost_slaves(comm, &space, &owned)?;

        let bs = space.bs();
        let base = space.index_map();
        let extra: Vec<(u64, usize)> = owned
            .masters()
            .iter()
            .chain(ghosts.masters())
            .zip(owned.owners().iter().chain(ghosts.owners()))
            .map(|(&m, &o)| (m / bs as u64, o))
            .filter(|&(b, _)| base.global_to_local(b).is_none())
            .collect();
        let index_map = Arc::new(base.extend(comm, &extra)?);

        let mut all = owned.clone();
        all.append(&ghosts);
        let masters_local = all
            .masters()
            .iter()
            .map(|&m| {
                index_map
                    .global_to_local(m / bs as u64)
                    .map(|b| b * bs + (m % bs as u64) as usize)
                    .ok_or_else(|| MpcError::IncompleteGhostData {
                        master: m,
                        reason: "not added to the extended index map".into(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let slave_lookup: HashMap<usize, usize> = all
            .slaves()
            .iter()
            .enumerate()
            .map(|(i, &s)| (s, i))
            .collect();

        let dofmap = space.dofmap().clone();
        let mut cell_offsets = Vec::with_capacity(dofmap.num_cells() + 1);
        cell_offsets.push(0);
        let mut cell_slaves = Vec::new();
        let mut slave_cells = Vec::new();
        let mut per_slave: Vec<Vec<usize>> = vec![Vec::new(); all.num_slaves()];
        for cell in 0..dofmap.num_cells() {
            let before = cell_slaves.len();
            for d in dofmap.cell_dofs(cell) {
                if let Some(&i) = slave_lookup.get(&d) {
                    cell_slaves.push(i);
                    per_slave[i].push(cell);
                }
            }
            if cell_slaves.len() > before {
                slave_cells.push(cell);
            }
            cell_offsets.push(cell_slaves.len());
        }
        let mut slave_cell_offsets = Vec::with_capacity(per_slave.len() + 1);
        slave_cell_offsets.push(0);
        let mut slave_cell_list = Vec::new();
        for cells in per_slave {
            slave_cell_list.extend(cells);
            slave_cell_offsets.push(slave_cell_list.len());
        }

        log::info!(
            "[MultiPointConstraint] rank {}: {} owned slaves, {} ghost slaves, {} ghost blocks added",
            comm.rank(),
            owned.num_slaves(),
            ghosts.num_slaves(),
            index_map.num_ghosts() - base.num_ghosts()
        );

        Ok(Self {
            num_owned_slaves: owned.num_slaves(),
            slaves: all.slaves().to_vec(),
            offsets: all.offsets().to_vec(),
            masters: all.masters().to_vec(),
            coeffs: all.coeffs().to_vec(),
            owners: all.owners().to_vec(),
            masters_local,
            slave_lookup,
            index_map,
            dofmap,
            cell_offsets,
            cell_slaves,
            slave_cells,
            slave_cell_offsets,
            slave_cell_list,
            owned,
            space,
            config,
        })
    }

    /// Append masters to slaves this rank already owns, then rebuild the
    /// ghost slaves, extended index map and adjacency. Collective.
    ///
    /// A master already present in the slave's relation is kept as a second
    /// term; repeats within `extra` follow the merge policy.
    pub fn add_masters<C: Communicator>(
        &mut self,
        comm: &C,
        extra: &MpcData,
    ) -> Result<(), MpcError> {
        let merged = consolidate(extra, &self.config).and_then(|extra| {
            let mut by_slave: HashMap<usize, usize> = HashMap::new();
            for (i, &s) in extra.slaves().iter().enumerate() {
                match self.slave_lookup.get(&s) {
                    Some(&k) if k < self.num_owned_slaves => {
                        by_slave.insert(s, i);
                    }
                    _ => {
                        return Err(MpcError::MalformedData(format!(
                            "add_masters: dof {s} is not an owned slave"
                        )));
                    }
                }
            }
            let mut merged = MpcData::new();
            for (i, &s) in self.owned.slaves().iter().enumerate() {
                let appended = by_slave.get(&s).map(|&j| extra.relation(j));
                merged.push(s, self.owned.relation(i).chain(appended.into_iter().flatten()));
            }
            Ok(merged)
        });
        let merged = collective_check(comm, CHECK_TAG, "MultiPointConstraint::add_masters", merged)?;
        *self = Self::build(comm, Arc::clone(&self.space), merged, self.config.clone())?;
        Ok(())
    }

    pub fn function_space(&self) -> &Arc<FunctionSpace> {
        &self.space
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    /// Relations of the owned slaves, as consolidated.
    pub fn owned_data(&self) -> &MpcData {
        &self.owned
    }

    /// Local slave DOFs: owned first, then ghosts.
    pub fn slaves(&self) -> &[usize] {
        &self.slaves
    }

    pub fn num_local_slaves(&self) -> usize {
        self.num_owned_slaves
    }

    /// Position of `dof` in [`slaves`](Self::slaves).
    pub fn slave_index(&self, dof: usize) -> Option<usize> {
        self.slave_lookup.get(&dof).copied()
    }

    pub fn is_slave(&self, dof: usize) -> bool {
        self.slave_lookup.contains_key(&dof)
    }

    /// Cells containing at least one slave, ascending.
    pub fn slave_cells(&self) -> &[usize] {
        &self.slave_cells
    }

    /// Slave positions in `cell`.
    pub fn cell_to_slaves(&self, cell: usize) -> &[usize] {
        &self.cell_slaves[self.cell_offsets[cell]..self.cell_offsets[cell + 1]]
    }

    /// Cells containing slave position `i`.
    pub fn slave_to_cells(&self, i: usize) -> &[usize] {
        &self.slave_cell_list[self.slave_cell_offsets[i]..self.slave_cell_offsets[i + 1]]
    }

    /// Global masters of slave position `i`.
    pub fn masters(&self, i: usize) -> &[u64] {
        &self.masters[self.offsets[i]..self.offsets[i + 1]]
    }

    /// CSR offsets and local master DOFs (in the extended layout) of every slave.
    pub fn masters_local(&self) -> (&[usize], &[usize]) {
        (&self.offsets, &self.masters_local)
    }

    /// `(local master, coefficient)` terms of slave position `i`.
    pub fn relation(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let r = self.offsets[i]..self.offsets[i + 1];
        self.masters_local[r.clone()]
            .iter()
            .copied()
            .zip(self.coeffs[r].iter().copied())
    }

    /// Coefficients of every slave, laid out like [`masters_local`](Self::masters_local).
    pub fn coefficients(&self) -> &[f64] {
        &self.coeffs
    }

    /// Owning rank of every master, laid out like [`masters_local`](Self::masters_local).
    pub fn owners(&self) -> &[usize] {
        &self.owners
    }

    /// Block layout including every remote master as a ghost.
    pub fn index_map(&self) -> &Arc<IndexMap> {
        &self.index_map
    }

    pub fn dofmap(&self) -> &DofMap {
        &self.dofmap
    }

    /// Owned scalar DOFs, ghosts excluded.
    pub fn num_owned_dofs(&self) -> usize {
        self.index_map.size_local() * self.space.bs()
    }

    /// Every master must sit at its recorded local position in the extended map.
    pub fn validate_ghosts(&self) -> Result<(), MpcError> {
        self.check_layout(&self.index_map)
    }

    /// Check that `map` numbers every master like the extended map does.
    pub(crate) fn check_layout(&self, map: &IndexMap) -> Result<(), MpcError> {
        let bs = self.space.bs();
        for (&m, &local) in self.masters.iter().zip(&self.masters_local) {
            let found = map
                .global_to_local(m / bs as u64)
                .map(|b| b * bs + (m % bs as u64) as usize);
            if found != Some(local) {
                return Err(MpcError::IncompleteGhostData {
                    master: m,
                    reason: match found {
                        None => "absent from the target layout".into(),
                        Some(l) => format!("at local {l} instead of {local}"),
                    },
                });
            }
        }
        Ok(())
    }

    /// Overwrite every slave entry of `u` (owned and ghost) with
    /// `sum(c * u[master])`. Ghost masters must be up to date.
    pub fn backsubstitution(&self, u: &mut GhostedVector) -> Result<(), MpcError> {
        if u.bs() != self.space.bs() {
            return Err(MpcError::DimensionMismatch {
                context: "backsubstitution block size",
                expected: self.space.bs(),
                found: u.bs(),
            });
        }
        self.check_layout(u.index_map())?;
        let values = u.values_mut();
        for (i, &s) in self.slaves.iter().enumerate() {
            let v: f64 = self.relation(i).map(|(m, c)| c * values[m]).sum();
            values[s] = v;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use crate::mesh::generation::create_interval;

    fn space(n: usize) -> Arc<FunctionSpace> {
        let mesh = Arc::new(create_interval(n, 0.0, 1.0).unwrap());
        Arc::new(FunctionSpace::p1(mesh, 1).unwrap())
    }

    fn averaging() -> MpcData {
        let mut d = MpcData::new();
        d.push(2, [(0, 0.5, 0), (4, 0.5, 0)]);
        d
    }

    #[test]
    fn queries_after_consolidation() {
        let mpc = MultiPointConstraint::new(&NoComm, space(4), &averaging(), MpcConfig::default())
            .unwrap();
        assert_eq!(mpc.slaves(), &[2]);
        assert_eq!(mpc.num_local_slaves(), 1);
        assert_eq!(mpc.slave_cells(), &[1, 2]);
        assert_eq!(mpc.cell_to_slaves(1), &[0]);
        assert!(mpc.cell_to_slaves(0).is_empty());
        assert_eq!(mpc.slave_to_cells(0), &[1, 2]);
        assert_eq!(mpc.masters(0), &[0, 4]);
        assert_eq!(mpc.masters_local(), (&[0usize, 2][..], &[0usize, 4][..]));
        assert_eq!(mpc.coefficients(), &[0.5, 0.5]);
        assert_eq!(mpc.num_owned_dofs(), 5);
        mpc.validate_ghosts().unwrap();
    }

    #[test]
    fn duplicate_slave_and_redundant_master() {
        let mut d = averaging();
        d.append(&averaging());
        assert_eq!(
            MultiPointConstraint::new(&NoComm, space(4), &d, MpcConfig::default()).err(),
            Some(MpcError::DuplicateSlave { slave: 2 })
        );

        let mut d = MpcData::new();
        d.push(1, [(0, 0.25, 0), (0, 0.75, 0)]);
        assert_eq!(
            MultiPointConstraint::new(&NoComm, space(2), &d, MpcConfig::default()).err(),
            Some(MpcError::RedundantMaster { slave: 1, master: 0 })
        );
        let sum = MpcConfig {
            merge_policy: MasterMergePolicy::Sum,
            ..MpcConfig::default()
        };
        let mpc = MultiPointConstraint::new(&NoComm, space(2), &d, sum).unwrap();
        assert_eq!(mpc.coefficients(), &[1.0]);
    }

    #[test]
    fn chains_are_rejected() {
        let mut d = MpcData::new();
        d.push(1, [(0, 1.0, 0)]);
        d.push(2, [(1, 1.0, 0)]);
        assert_eq!(
            MultiPointConstraint::new(&NoComm, space(2), &d, MpcConfig::default()).err(),
            Some(MpcError::CircularConstraint { master: 1, owner: 0 })
        );
    }

    #[test]
    fn slaves_must_be_owned_and_masters_exist() {
        let mut d = MpcData::new();
        d.push(7, [(0, 1.0, 0)]);
        assert_eq!(
            MultiPointConstraint::new(&NoComm, space(2), &d, MpcConfig::default()).err(),
            Some(MpcError::NotOwned { dof: 7, rank: 0 })
        );
        let mut d = MpcData::new();
        d.push(1, [(9, 1.0, 0)]);
        assert!(matches!(
            MultiPointConstraint::new(&NoComm, space(2), &d, MpcConfig::default()),
            Err(MpcError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn add_masters_extends_relation() {
        let mut d = MpcData::new();
        d.push(2, [(0, 0.5, 0)]);
        let mut mpc =
            MultiPointConstraint::new(&NoComm, space(4), &d, MpcConfig::default()).unwrap();
        let mut extra = MpcData::new();
        extra.push(2, [(4, 0.5, 0)]);
        mpc.add_masters(&NoComm, &extra).unwrap();
        assert_eq!(mpc.masters(0), &[0, 4]);
        assert_eq!(mpc.owned_data().offsets(), &[0, 2]);

        let mut not_slave = MpcData::new();
        not_slave.push(3, [(4, 1.0, 0)]);
        assert!(matches!(
            mpc.add_masters(&NoComm, &not_slave),
            Err(MpcError::MalformedData(_))
        ));
        // the failed call leaves the constraint untouched
        assert_eq!(mpc.masters(0), &[0, 4]);
    }

    #[test]
    fn backsubstitution_overwrites() {
        let mpc = MultiPointConstraint::new(&NoComm, space(4), &averaging(), MpcConfig::default())
            .unwrap();
        let mut u = GhostedVector::from_values(
            Arc::clone(mpc.index_map()),
            1,
            vec![2.0, 0.0, 99.0, 0.0, 4.0],
        )
        .unwrap();
        mpc.backsubstitution(&mut u).unwrap();
        assert_eq!(u.values()[2], 3.0);

        let stale = Arc::new(IndexMap::serial(3));
        let mut short = GhostedVector::new(stale, 1);
        assert!(matches!(
            mpc.backsubstitution(&mut short),
            Err(MpcError::IncompleteGhostData { master: 4, .. })
        ));
    }
}

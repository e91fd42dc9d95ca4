//! Ownership-aware block numbering for one partition.
//!
//! An [`IndexMap`] numbers the blocks a rank can address: owned blocks first
//! (`0..size_local`), then ghosts (`size_local..size_local + num_ghosts`).
//! Owned blocks are contiguous in the global numbering and ordered by rank, so
//! the owner of any global index is a binary search over the rank ranges.
//!
//! Construction is collective: ghosting ranks tell each owner which of its
//! blocks they read, which yields the plan used by [`IndexMap::scatter_forward`]
//! and [`IndexMap::scatter_reverse_add`].

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};

use crate::comm::wire::{WireIndex, WireValue, kind};
use crate::comm::{CommTag, Communicator, all_gather, all_to_all_v, collective_check};
use crate::mpc_error::MpcError;

const RANGES_TAG: CommTag = CommTag::new(0x4900);
const PLAN_TAG: CommTag = CommTag::new(0x4904);
const PLAN_CHECK_TAG: CommTag = CommTag::new(0x4908);
const FORWARD_TAG: CommTag = CommTag::new(0x4910);
const REVERSE_TAG: CommTag = CommTag::new(0x4920);

/// Block ownership, ghost layout and ghost exchange plan of one rank.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexMap {
    rank: usize,
    /// `ranges[r]..ranges[r + 1]` are the global blocks owned by rank `r`.
    ranges: Vec<u64>,
    ghosts: Vec<u64>,
    ghost_owners: Vec<usize>,
    ghost_lookup: HashMap<u64, usize>,
    /// peer -> owned local blocks the peer ghosts, in the peer's ghost order
    shared: BTreeMap<usize, Vec<usize>>,
    /// owner -> positions in `ghosts` owned by that rank, in request order
    ghost_slots: BTreeMap<usize, Vec<usize>>,
}

impl IndexMap {
    /// Collectively build a map with `size_local` owned blocks and the given ghosts.
    pub fn new<C: Communicator>(
        comm: &C,
        size_local: usize,
        ghosts: Vec<u64>,
        ghost_owners: Vec<usize>,
    ) -> Result<Self, MpcError> {
        let sizes = all_gather(comm, RANGES_TAG, &[WireIndex::of(size_local as u64)])?;
        let mut ranges = Vec::with_capacity(sizes.len() + 1);
        ranges.push(0u64);
        for (r, s) in sizes.iter().enumerate() {
            let n = s.first().map(WireIndex::get).ok_or(MpcError::CommError {
                neighbor: r,
                reason: "missing local size".into(),
            })?;
            ranges.push(ranges[r] + n);
        }
        Self::from_ranges(comm, ranges, ghosts, ghost_owners)
    }

    /// Single-rank map without ghosts; needs no communication.
    pub fn serial(size_local: usize) -> Self {
        Self {
            rank: 0,
            ranges: vec![0, size_local as u64],
            ..Default::default()
        }
    }

    /// Collectively build a map from known rank ranges.
    pub fn from_ranges<C: Communicator>(
        comm: &C,
        ranges: Vec<u64>,
        ghosts: Vec<u64>,
        ghost_owners: Vec<usize>,
    ) -> Result<Self, MpcError> {
        let local = Self::layout(comm.rank(), ranges, ghosts, ghost_owners);
        let mut map = collective_check(comm, PLAN_CHECK_TAG, "IndexMap::layout", local)?;
        let plan = map.build_plan(comm);
        map.shared = collective_check(comm, PLAN_CHECK_TAG, "IndexMap::plan", plan)?;
        Ok(map)
    }

    fn layout(
        rank: usize,
        ranges: Vec<u64>,
        ghosts: Vec<u64>,
        ghost_owners: Vec<usize>,
    ) -> Result<Self, MpcError> {
        if ghosts.len() != ghost_owners.len() {
            return Err(MpcError::DimensionMismatch {
                context: "IndexMap ghost owners",
                expected: ghosts.len(),
                found: ghost_owners.len(),
            });
        }
        if rank + 1 >= ranges.len() {
            return Err(MpcError::IndexOutOfRange {
                context: "IndexMap rank ranges",
                index: rank as u64,
                len: ranges.len().saturating_sub(1) as u64,
            });
        }
        let mut map = Self {
            rank,
            ranges,
            ..Default::default()
        };
        let mut ghost_slots: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (pos, (&g, &owner)) in ghosts.iter().zip(&ghost_owners).enumerate() {
            if owner == rank || map.owner(g)? != owner {
                return Err(MpcError::MalformedData(format!(
                    "ghost {g} declared owned by rank {owner}, but rank {} owns it",
                    map.owner(g)?
                )));
            }
            if map.ghost_lookup.insert(g, pos).is_some() {
                return Err(MpcError::MalformedData(format!("ghost {g} listed twice")));
            }
            ghost_slots.entry(owner).or_default().push(pos);
        }
        map.ghosts = ghosts;
        map.ghost_owners = ghost_owners;
        map.ghost_slots = ghost_slots;
        Ok(map)
    }

    fn build_plan<C: Communicator>(
        &self,
        comm: &C,
    ) -> Result<BTreeMap<usize, Vec<usize>>, MpcError> {
        let requests: BTreeMap<usize, Vec<WireIndex>> = self
            .ghost_slots
            .iter()
            .map(|(&owner, slots)| {
                let wanted = slots.iter().map(|&p| WireIndex::of(self.ghosts[p])).collect();
                (owner, wanted)
            })
            .collect();
        let incoming = all_to_all_v(comm, PLAN_TAG, kind::GHOST_REQUEST, &requests)?;
        let (start, end) = self.local_range();
        let mut shared = BTreeMap::new();
        for (peer, wanted) in incoming {
            let locals = wanted
                .iter()
                .map(|w| {
                    let g = w.get();
                    if (start..end).contains(&g) {
                        Ok((g - start) as usize)
                    } else {
                        Err(MpcError::IncompleteGhostData {
                            master: g,
                            reason: format!("rank {peer} requested it from rank {}", self.rank),
                        })
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            shared.insert(peer, locals);
        }
        Ok(shared)
    }

    /// Collectively build a new map with `extra` `(global, owner)` ghosts appended.
    ///
    /// Entries that are owned here or already ghosted are skipped, so local
    /// indices of the existing map stay valid in the extended one.
    pub fn extend<C: Communicator>(
        &self,
        comm: &C,
        extra: &[(u64, usize)],
    ) -> Result<Self, MpcError> {
        let mut ghosts = self.ghosts.clone();
        let mut owners = self.ghost_owners.clone();
        let (start, end) = self.local_range();
        let mut seen: HashSet<u64> = self.ghost_lookup.keys().copied().collect();
        for &(g, owner) in extra {
            if (start..end).contains(&g) || !seen.insert(g) {
                continue;
            }
            ghosts.push(g);
            owners.push(owner);
        }
        log::debug!(
            "[IndexMap] rank {} extended ghosts {} -> {}",
            self.rank,
            self.ghosts.len(),
            ghosts.len()
        );
        Self::from_ranges(comm, self.ranges.clone(), ghosts, owners)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size_local(&self) -> usize {
        let (start, end) = self.local_range();
        (end - start) as usize
    }

    pub fn num_ghosts(&self) -> usize {
        self.ghosts.len()
    }

    pub fn size_global(&self) -> u64 {
        self.ranges.last().copied().unwrap_or(0)
    }

    /// Global `[start, end)` of the owned blocks.
    pub fn local_range(&self) -> (u64, u64) {
        match (self.ranges.get(self.rank), self.ranges.get(self.rank + 1)) {
            (Some(&s), Some(&e)) => (s, e),
            _ => (0, 0),
        }
    }

    pub fn ghosts(&self) -> &[u64] {
        &self.ghosts
    }

    pub fn ghost_owners(&self) -> &[usize] {
        &self.ghost_owners
    }

    pub fn local_to_global(&self, local: usize) -> Result<u64, MpcError> {
        let n = self.size_local();
        if local < n {
            Ok(self.local_range().0 + local as u64)
        } else {
            self.ghosts
                .get(local - n)
                .copied()
                .ok_or(MpcError::IndexOutOfRange {
                    context: "IndexMap::local_to_global",
                    index: local as u64,
                    len: (n + self.ghosts.len()) as u64,
                })
        }
    }

    pub fn global_to_local(&self, global: u64) -> Option<usize> {
        let (start, end) = self.local_range();
        if (start..end).contains(&global) {
            Some((global - start) as usize)
        } else {
            self.ghost_lookup
                .get(&global)
                .map(|&pos| self.size_local() + pos)
        }
    }

    /// Owning rank of any global block.
    pub fn owner(&self, global: u64) -> Result<usize, MpcError> {
        if global >= self.size_global() {
            return Err(MpcError::IndexOutOfRange {
                context: "IndexMap::owner",
                index: global,
                len: self.size_global(),
            });
        }
        // first rank whose range end exceeds `global`
        Ok(self.ranges[1..].partition_point(|&end| end <= global))
    }

    /// Owning rank of a local (owned or ghost) block.
    pub fn owner_of_local(&self, local: usize) -> Result<usize, MpcError> {
        let n = self.size_local();
        if local < n {
            Ok(self.rank)
        } else {
            self.ghost_owners
                .get(local - n)
                .copied()
                .ok_or(MpcError::IndexOutOfRange {
                    context: "IndexMap::owner_of_local",
                    index: local as u64,
                    len: (n + self.ghosts.len()) as u64,
                })
        }
    }

    /// Owned local blocks that other ranks ghost, with the ranks ghosting them.
    pub fn shared_indices(&self) -> BTreeMap<usize, Vec<usize>> {
        let mut out: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (&peer, locals) in &self.shared {
            for &l in locals {
                out.entry(l).or_default().push(peer);
            }
        }
        out
    }

    fn check_len(&self, values: &[f64], bs: usize) -> Result<(), MpcError> {
        let expected = (self.size_local() + self.num_ghosts()) * bs;
        if values.len() < expected {
            return Err(MpcError::DimensionMismatch {
                context: "ghosted values",
                expected,
                found: values.len(),
            });
        }
        Ok(())
    }

    /// Copy owned values into the ghost slots of every rank that ghosts them.
    pub fn scatter_forward<C: Communicator>(
        &self,
        comm: &C,
        values: &mut [f64],
        bs: usize,
    ) -> Result<(), MpcError> {
        self.check_len(values, bs)?;
        let outgoing: BTreeMap<usize, Vec<WireValue>> = self
            .shared
            .iter()
            .map(|(&peer, locals)| {
                let vals = locals
                    .iter()
                    .flat_map(|&l| (0..bs).map(move |c| l * bs + c))
                    .map(|i| WireValue::of(values[i]))
                    .collect();
                (peer, vals)
            })
            .collect();
        let incoming = all_to_all_v(comm, FORWARD_TAG, kind::SCATTER_FORWARD, &outgoing)?;
        let n = self.size_local();
        for (owner, vals) in incoming {
            let slots = self.ghost_slots.get(&owner).map_or(&[][..], Vec::as_slice);
            if vals.len() != slots.len() * bs {
                return Err(MpcError::CommError {
                    neighbor: owner,
                    reason: format!("expected {} ghost values, got {}", slots.len() * bs, vals.len()),
                });
            }
            for (k, &pos) in slots.iter().enumerate() {
                for c in 0..bs {
                    values[(n + pos) * bs + c] = vals[k * bs + c].get();
                }
            }
        }
        Ok(())
    }

    /// Add ghost contributions into the owned entries on their owning ranks.
    /// Ghost entries are left untouched.
    pub fn scatter_reverse_add<C: Communicator>(
        &self,
        comm: &C,
        values: &mut [f64],
        bs: usize,
    ) -> Result<(), MpcError> {
        self.check_len(values, bs)?;
        let n = self.size_local();
        let outgoing: BTreeMap<usize, Vec<WireValue>> = self
            .ghost_slots
            .iter()
            .map(|(&owner, slots)| {
                let vals = slots
                    .iter()
                    .flat_map(|&p| (0..bs).map(move |c| (n + p) * bs + c))
                    .map(|i| WireValue::of(values[i]))
                    .collect();
                (owner, vals)
            })
            .collect();
        let incoming = all_to_all_v(comm, REVERSE_TAG, kind::SCATTER_REVERSE, &outgoing)?;
        for (peer, vals) in incoming {
            let locals = self.shared.get(&peer).map_or(&[][..], Vec::as_slice);
            if vals.len() != locals.len() * bs {
                return Err(MpcError::CommError {
                    neighbor: peer,
                    reason: format!("expected {} ghost values, got {}", locals.len() * bs, vals.len()),
                });
            }
            for (k, &l) in locals.iter().enumerate() {
                for c in 0..bs {
                    values[l * bs + c] += vals[k * bs + c].get();
                }
            }
        }
        Ok(())
    }
}

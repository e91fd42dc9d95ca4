//! Distributed sparsity pattern.
//!
//! Rows are scalar DOFs owned by this rank; columns are global scalar DOFs.
//! Entries for rows owned elsewhere are stashed and shipped to their owners
//! by [`SparsityPattern::assemble`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::comm::wire::{WirePair, kind};
use crate::comm::{CommTag, Communicator, all_to_all_v, collective_check};
use crate::la::{global_dof, owner_of_dof};
use crate::mpc_error::MpcError;
use crate::space::IndexMap;

const PATTERN_TAG: CommTag = CommTag::new(0x4b00);
const PATTERN_CHECK_TAG: CommTag = CommTag::new(0x4b04);

#[derive(Clone, Debug)]
pub struct SparsityPattern {
    index_map: Arc<IndexMap>,
    bs: usize,
    rows: Vec<BTreeSet<u64>>,
    off_process: BTreeMap<u64, BTreeSet<u64>>,
    assembled: bool,
}

impl SparsityPattern {
    /// Empty square pattern over the blocks of `index_map`.
    pub fn new(index_map: Arc<IndexMap>, bs: usize) -> Self {
        let n = index_map.size_local() * bs;
        Self {
            index_map,
            bs,
            rows: vec![BTreeSet::new(); n],
            off_process: BTreeMap::new(),
            assembled: false,
        }
    }

    pub fn index_map(&self) -> &Arc<IndexMap> {
        &self.index_map
    }

    pub fn bs(&self) -> usize {
        self.bs
    }

    pub fn is_assembled(&self) -> bool {
        self.assembled
    }

    /// Couple every local DOF in `rows` with every local DOF in `cols`.
    pub fn insert(&mut self, rows: &[usize], cols: &[usize]) -> Result<(), MpcError> {
        let cols = cols
            .iter()
            .map(|&c| global_dof(&self.index_map, self.bs, c))
            .collect::<Result<Vec<_>, _>>()?;
        for &r in rows {
            let row = global_dof(&self.index_map, self.bs, r)?;
            for &col in &cols {
                self.insert_global(row, col)?;
            }
        }
        Ok(())
    }

    pub fn insert_global(&mut self, row: u64, col: u64) -> Result<(), MpcError> {
        let n = self.index_map.size_global() * self.bs as u64;
        if col >= n {
            return Err(MpcError::IndexOutOfRange {
                context: "SparsityPattern column",
                index: col,
                len: n,
            });
        }
        match self.owned_row(row)? {
            Some(local) => {
                self.rows[local].insert(col);
            }
            None => {
                self.off_process.entry(row).or_default().insert(col);
                self.assembled = false;
            }
        }
        Ok(())
    }

    /// Local index of an owned global row, `None` if owned elsewhere.
    fn owned_row(&self, row: u64) -> Result<Option<usize>, MpcError> {
        let bs = self.bs as u64;
        let (start, end) = self.index_map.local_range();
        if (start * bs..end * bs).contains(&row) {
            Ok(Some((row - start * bs) as usize))
        } else if row < self.index_map.size_global() * bs {
            Ok(None)
        } else {
            Err(MpcError::IndexOutOfRange {
                context: "SparsityPattern row",
                index: row,
                len: self.index_map.size_global() * bs,
            })
        }
    }

    /// Collectively move stashed rows to their owners.
    pub fn assemble<C: Communicator>(&mut self, comm: &C) -> Result<(), MpcError> {
        let mut outgoing: BTreeMap<usize, Vec<WirePair>> = BTreeMap::new();
        let routed: Result<(), MpcError> = self.off_process.iter().try_for_each(|(&row, cols)| {
            let owner = owner_of_dof(&self.index_map, self.bs, row)?;
            outgoing
                .entry(owner)
                .or_default()
                .extend(cols.iter().map(|&c| WirePair::new(row, c)));
            Ok(())
        });
        collective_check(comm, PATTERN_CHECK_TAG, "SparsityPattern::assemble", routed)?;
        let incoming = all_to_all_v(comm, PATTERN_TAG, kind::PATTERN_ROWS, &outgoing)?;
        let shipped: usize = outgoing.values().map(Vec::len).sum();
        let mut received = 0;
        let mut result = Ok(());
        for pair in incoming.values().flatten() {
            received += 1;
            match self.owned_row(pair.row()) {
                Ok(Some(local)) => {
                    self.rows[local].insert(pair.col());
                }
                Ok(None) => {
                    result = Err(MpcError::NotOwned {
                        dof: pair.row(),
                        rank: self.index_map.rank(),
                    });
                }
                Err(e) => result = Err(e),
            }
        }
        log::debug!(
            "[SparsityPattern] rank {} shipped {shipped} and received {received} off-process entries",
            self.index_map.rank()
        );
        collective_check(comm, PATTERN_CHECK_TAG, "SparsityPattern::assemble", result)?;
        self.off_process.clear();
        self.assembled = true;
        Ok(())
    }

    pub fn num_owned_rows(&self) -> usize {
        self.rows.len()
    }

    /// Global columns of owned local row `row`, ascending.
    pub fn row(&self, row: usize) -> impl Iterator<Item = u64> + '_ {
        self.rows.get(row).into_iter().flatten().copied()
    }

    /// Whether owned global `row` holds global `col`.
    pub fn contains(&self, row: u64, col: u64) -> bool {
        matches!(self.owned_row(row), Ok(Some(r)) if self.rows[r].contains(&col))
    }

    pub fn num_nonzeros(&self) -> usize {
        self.rows.iter().map(BTreeSet::len).sum()
    }

    /// Every owned `(row, col)` entry in global numbering.
    pub fn entries(&self) -> Vec<(u64, u64)> {
        let offset = self.index_map.local_range().0 * self.bs as u64;
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(r, cols)| cols.iter().map(move |&c| (offset + r as u64, c)))
            .collect()
    }
}

/// Ensure the `bs`×`bs` diagonal block of every local block in `blocks` is present.
pub fn add_pattern_diagonal(
    pattern: &mut SparsityPattern,
    blocks: &[usize],
) -> Result<(), MpcError> {
    let bs = pattern.bs();
    for &b in blocks {
        let dofs: Vec<usize> = (0..bs).map(|c| b * bs + c).collect();
        pattern.insert(&dofs, &dofs)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{NoComm, RayonComm};
    use serial_test::serial;

    #[test]
    fn diagonal_blocks() {
        let mut p = SparsityPattern::new(Arc::new(IndexMap::serial(3)), 2);
        add_pattern_diagonal(&mut p, &[1]).unwrap();
        p.assemble(&NoComm).unwrap();
        assert_eq!(p.entries(), vec![(2, 2), (2, 3), (3, 2), (3, 3)]);
        assert!(p.contains(3, 2));
        assert!(!p.contains(0, 0));
    }

    #[test]
    fn out_of_range_column_is_rejected() {
        let mut p = SparsityPattern::new(Arc::new(IndexMap::serial(2)), 1);
        assert!(matches!(
            p.insert_global(0, 2),
            Err(MpcError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    #[serial]
    fn ghost_rows_reach_their_owner() {
        let handles: Vec<_> = RayonComm::world(2)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    // each rank owns two blocks and ghosts the first block of the other
                    let (ghost, owner) = if comm.rank() == 0 { (2, 1) } else { (0, 0) };
                    let map = IndexMap::new(&comm, 2, vec![ghost], vec![owner]).unwrap();
                    let mut p = SparsityPattern::new(Arc::new(map), 1);
                    p.insert(&[2], &[0, 2]).unwrap();
                    p.assemble(&comm).unwrap();
                    (comm.rank(), p.entries())
                })
            })
            .collect();
        for h in handles {
            let (rank, entries) = h.join().unwrap();
            if rank == 0 {
                assert_eq!(entries, vec![(0, 0), (0, 2)]);
            } else {
                assert_eq!(entries, vec![(2, 0), (2, 2)]);
            }
        }
    }
}

//! Row-distributed CSR matrix with a fixed sparsity pattern.

use std::collections::BTreeMap;
use std::sync::Arc;

use nalgebra::DMatrix;

use crate::comm::wire::{WireEntry, kind};
use crate::comm::{CommTag, Communicator, all_to_all_v, collective_check};
use crate::la::{SparsityPattern, global_dof, owner_of_dof};
use crate::mpc_error::MpcError;
use crate::space::IndexMap;

const MATRIX_TAG: CommTag = CommTag::new(0x4c00);
const MATRIX_CHECK_TAG: CommTag = CommTag::new(0x4c04);

/// Additive insertion of dense element blocks, addressed by local indices.
pub trait MatrixInsert {
    /// Scalar DOFs per block.
    fn bs(&self) -> usize;

    /// Block layout the local indices refer to.
    fn layout(&self) -> &IndexMap;

    /// Fail if any `(row, col)` of the block at local scalar DOFs has no slot.
    /// Rows owned elsewhere are only checked for a known owner.
    fn check(&self, rows: &[usize], cols: &[usize]) -> Result<(), MpcError>;

    /// Add the row-major `rows.len()`×`cols.len()` block `values` at local
    /// scalar DOFs. Nothing is added if any entry lies outside the target.
    fn add(&mut self, rows: &[usize], cols: &[usize], values: &[f64]) -> Result<(), MpcError>;

    /// Like [`MatrixInsert::add`], with rows and columns given as local
    /// blocks; `values` is block-major.
    fn add_block(&mut self, rows: &[usize], cols: &[usize], values: &[f64]) -> Result<(), MpcError> {
        let bs = self.bs();
        let expand = |blocks: &[usize]| -> Vec<usize> {
            blocks
                .iter()
                .flat_map(|&b| (0..bs).map(move |c| b * bs + c))
                .collect()
        };
        self.add(&expand(rows), &expand(cols), values)
    }
}

#[derive(Clone, Debug)]
pub struct DistMatrix {
    index_map: Arc<IndexMap>,
    bs: usize,
    row_ptr: Vec<usize>,
    cols: Vec<u64>,
    values: Vec<f64>,
    stash: Vec<(u64, u64, f64)>,
}

impl DistMatrix {
    /// Zero matrix on an assembled pattern.
    pub fn new(pattern: &SparsityPattern) -> Result<Self, MpcError> {
        if !pattern.is_assembled() {
            return Err(MpcError::MalformedData(
                "sparsity pattern must be assembled before creating a matrix".into(),
            ));
        }
        let mut row_ptr = Vec::with_capacity(pattern.num_owned_rows() + 1);
        row_ptr.push(0);
        let mut cols = Vec::with_capacity(pattern.num_nonzeros());
        for r in 0..pattern.num_owned_rows() {
            cols.extend(pattern.row(r));
            row_ptr.push(cols.len());
        }
        Ok(Self {
            index_map: Arc::clone(pattern.index_map()),
            bs: pattern.bs(),
            values: vec![0.0; cols.len()],
            row_ptr,
            cols,
            stash: Vec::new(),
        })
    }

    pub fn index_map(&self) -> &Arc<IndexMap> {
        &self.index_map
    }

    pub fn num_owned_rows(&self) -> usize {
        self.row_ptr.len() - 1
    }

    pub fn num_nonzeros(&self) -> usize {
        self.cols.len()
    }

    pub fn zero_entries(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
        self.stash.clear();
    }

    fn position(&self, local_row: usize, col: u64) -> Option<usize> {
        let (a, b) = (self.row_ptr[local_row], self.row_ptr[local_row + 1]);
        self.cols[a..b].binary_search(&col).ok().map(|k| a + k)
    }

    fn local_row(&self, row: u64) -> Option<usize> {
        let bs = self.bs as u64;
        let (start, end) = self.index_map.local_range();
        (start * bs..end * bs)
            .contains(&row)
            .then(|| (row - start * bs) as usize)
    }

    /// Add `value` at global `(row, col)`; rows owned elsewhere are stashed
    /// until [`DistMatrix::finalize`].
    pub fn add_global(&mut self, row: u64, col: u64, value: f64) -> Result<(), MpcError> {
        match self.local_row(row) {
            Some(r) => {
                let k = self
                    .position(r, col)
                    .ok_or(MpcError::MissingPatternEntry { row, col })?;
                self.values[k] += value;
            }
            None => {
                owner_of_dof(&self.index_map, self.bs, row)?;
                self.stash.push((row, col, value));
            }
        }
        Ok(())
    }

    /// Collectively send stashed contributions to the owning ranks.
    pub fn finalize<C: Communicator>(&mut self, comm: &C) -> Result<(), MpcError> {
        let mut outgoing: BTreeMap<usize, Vec<WireEntry>> = BTreeMap::new();
        for &(row, col, value) in &self.stash {
            let owner = owner_of_dof(&self.index_map, self.bs, row)?;
            outgoing
                .entry(owner)
                .or_default()
                .push(WireEntry::new(row, col, value));
        }
        self.stash.clear();
        let incoming = all_to_all_v(comm, MATRIX_TAG, kind::MATRIX_ROWS, &outgoing)?;
        let result = incoming
            .values()
            .flatten()
            .try_for_each(|e| match self.local_row(e.row()) {
                Some(_) => self.add_global(e.row(), e.col(), e.value()),
                None => Err(MpcError::NotOwned {
                    dof: e.row(),
                    rank: self.index_map.rank(),
                }),
            });
        collective_check(comm, MATRIX_CHECK_TAG, "DistMatrix::finalize", result)
    }

    /// Value at owned global `(row, col)`; zero outside the pattern.
    pub fn get(&self, row: u64, col: u64) -> f64 {
        self.local_row(row)
            .and_then(|r| self.position(r, col))
            .map_or(0.0, |k| self.values[k])
    }

    /// Global columns and values of owned local row `row`.
    pub fn row(&self, row: usize) -> (&[u64], &[f64]) {
        let (a, b) = (self.row_ptr[row], self.row_ptr[row + 1]);
        (&self.cols[a..b], &self.values[a..b])
    }

    /// Owned rows as a dense `owned rows × global columns` matrix.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let n = (self.index_map.size_global() * self.bs as u64) as usize;
        let mut dense = DMatrix::zeros(self.num_owned_rows(), n);
        for r in 0..self.num_owned_rows() {
            let (cols, vals) = self.row(r);
            for (&c, &v) in cols.iter().zip(vals) {
                dense[(r, c as usize)] = v;
            }
        }
        dense
    }
}

impl MatrixInsert for DistMatrix {
    fn bs(&self) -> usize {
        self.bs
    }

    fn layout(&self) -> &IndexMap {
        &self.index_map
    }

    fn check(&self, rows: &[usize], cols: &[usize]) -> Result<(), MpcError> {
        let gcols = cols
            .iter()
            .map(|&c| global_dof(&self.index_map, self.bs, c))
            .collect::<Result<Vec<_>, _>>()?;
        for &r in rows {
            let grow = global_dof(&self.index_map, self.bs, r)?;
            match self.local_row(grow) {
                Some(lr) => {
                    if let Some(&col) = gcols.iter().find(|&&c| self.position(lr, c).is_none()) {
                        return Err(MpcError::MissingPatternEntry { row: grow, col });
                    }
                }
                None => {
                    owner_of_dof(&self.index_map, self.bs, grow)?;
                }
            }
        }
        Ok(())
    }

    fn add(&mut self, rows: &[usize], cols: &[usize], values: &[f64]) -> Result<(), MpcError> {
        if values.len() != rows.len() * cols.len() {
            return Err(MpcError::DimensionMismatch {
                context: "DistMatrix::add values",
                expected: rows.len() * cols.len(),
                found: values.len(),
            });
        }
        self.check(rows, cols)?;
        let gcols = cols
            .iter()
            .map(|&c| global_dof(&self.index_map, self.bs, c))
            .collect::<Result<Vec<_>, _>>()?;
        for (i, &r) in rows.iter().enumerate() {
            let grow = global_dof(&self.index_map, self.bs, r)?;
            for (j, &gc) in gcols.iter().enumerate() {
                self.add_global(grow, gc, values[i * cols.len() + j])?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use crate::la::add_pattern_diagonal;

    fn tridiagonal(n: usize) -> SparsityPattern {
        let mut p = SparsityPattern::new(Arc::new(IndexMap::serial(n)), 1);
        for i in 0..n - 1 {
            p.insert(&[i, i + 1], &[i, i + 1]).unwrap();
        }
        p.assemble(&NoComm).unwrap();
        p
    }

    #[test]
    fn add_accumulates_inside_pattern() {
        let p = tridiagonal(3);
        let mut a = DistMatrix::new(&p).unwrap();
        a.add(&[0, 1], &[0, 1], &[1.0, -1.0, -1.0, 1.0]).unwrap();
        a.add(&[1, 2], &[1, 2], &[1.0, -1.0, -1.0, 1.0]).unwrap();
        assert_eq!(a.get(1, 1), 2.0);
        assert_eq!(
            a.add(&[0], &[2], &[1.0]),
            Err(MpcError::MissingPatternEntry { row: 0, col: 2 })
        );
        // the valid (0, 0) slot of a rejected block stays untouched
        assert_eq!(
            a.add(&[0], &[0, 2], &[5.0, 1.0]),
            Err(MpcError::MissingPatternEntry { row: 0, col: 2 })
        );
        assert_eq!(a.get(0, 0), 1.0);
        a.finalize(&NoComm).unwrap();
        let dense = a.to_dense();
        assert_eq!(dense[(2, 1)], -1.0);
        a.zero_entries();
        assert_eq!(a.get(1, 1), 0.0);
    }

    #[test]
    fn block_insert_expands_components() {
        let mut p = SparsityPattern::new(Arc::new(IndexMap::serial(2)), 2);
        add_pattern_diagonal(&mut p, &[0, 1]).unwrap();
        p.assemble(&NoComm).unwrap();
        let mut a = DistMatrix::new(&p).unwrap();
        a.add_block(&[1], &[1], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(a.get(2, 3), 2.0);
        assert_eq!(a.get(3, 2), 3.0);
    }

    #[test]
    fn unassembled_pattern_is_rejected() {
        let p = SparsityPattern::new(Arc::new(IndexMap::serial(2)), 1);
        assert!(DistMatrix::new(&p).is_err());
    }
}

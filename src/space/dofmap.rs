//! Cell-to-DOF connectivity.

/// Local block indices per cell, with a block size.
///
/// Scalar DOF `block * bs + component` is the local DOF numbering used by
/// vectors and element tensors; element tensors list DOFs block-major.
#[derive(Clone, Debug, PartialEq)]
pub struct DofMap {
    bs: usize,
    blocks_per_cell: usize,
    cell_blocks: Vec<usize>,
}

impl DofMap {
    pub fn new(cell_blocks: Vec<usize>, blocks_per_cell: usize, bs: usize) -> Self {
        Self {
            bs,
            blocks_per_cell,
            cell_blocks,
        }
    }

    pub fn bs(&self) -> usize {
        self.bs
    }

    pub fn num_cells(&self) -> usize {
        self.cell_blocks.len().checked_div(self.blocks_per_cell).unwrap_or(0)
    }

    /// Scalar DOFs per cell.
    pub fn cell_size(&self) -> usize {
        self.blocks_per_cell * self.bs
    }

    pub fn cell_blocks(&self, cell: usize) -> &[usize] {
        let n = self.blocks_per_cell;
        &self.cell_blocks[cell * n..(cell + 1) * n]
    }

    /// Scalar DOFs of `cell`, block-major.
    pub fn cell_dofs(&self, cell: usize) -> Vec<usize> {
        let bs = self.bs;
        self.cell_blocks(cell)
            .iter()
            .flat_map(|&b| (0..bs).map(move |c| b * bs + c))
            .collect()
    }
}

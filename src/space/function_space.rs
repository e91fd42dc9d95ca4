//! Vector-valued P1 Lagrange space on a [`Mesh`].

use std::sync::Arc;

use crate::mesh::Mesh;
use crate::mpc_error::MpcError;
use crate::space::{DofMap, IndexMap};

/// Continuous piecewise-linear space with `bs` components per vertex.
///
/// DOF blocks coincide with mesh vertices, so the block layout is the mesh's
/// vertex [`IndexMap`].
#[derive(Debug)]
pub struct FunctionSpace {
    mesh: Arc<Mesh>,
    dofmap: DofMap,
    bs: usize,
}

impl FunctionSpace {
    pub fn p1(mesh: Arc<Mesh>, bs: usize) -> Result<Self, MpcError> {
        if bs == 0 {
            return Err(MpcError::Unsupported("block size 0".into()));
        }
        let nv = mesh.kind().num_vertices();
        let cells = (0..mesh.num_cells())
            .flat_map(|c| mesh.cell_vertices(c).to_vec())
            .collect();
        Ok(Self {
            dofmap: DofMap::new(cells, nv, bs),
            mesh,
            bs,
        })
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    pub fn dofmap(&self) -> &DofMap {
        &self.dofmap
    }

    pub fn index_map(&self) -> &Arc<IndexMap> {
        self.mesh.vertex_map()
    }

    pub fn bs(&self) -> usize {
        self.bs
    }

    pub fn num_owned_dofs(&self) -> usize {
        self.index_map().size_local() * self.bs
    }

    /// Owned plus ghost scalar DOFs.
    pub fn num_dofs(&self) -> usize {
        (self.index_map().size_local() + self.index_map().num_ghosts()) * self.bs
    }

    /// Coordinates of every local block.
    pub fn tabulate_dof_coordinates(&self) -> &[[f64; 3]] {
        self.mesh.coordinates()
    }

    pub fn global_dof(&self, local: usize) -> Result<u64, MpcError> {
        let block = self.index_map().local_to_global(local / self.bs)?;
        Ok(block * self.bs as u64 + (local % self.bs) as u64)
    }

    pub fn local_dof(&self, global: u64) -> Option<usize> {
        let bs = self.bs as u64;
        self.index_map()
            .global_to_local(global / bs)
            .map(|b| b * self.bs + (global % bs) as usize)
    }

    pub fn dof_owner(&self, local: usize) -> Result<usize, MpcError> {
        self.index_map().owner_of_local(local / self.bs)
    }

    pub fn global_dof_owner(&self, global: u64) -> Result<usize, MpcError> {
        self.index_map().owner(global / self.bs as u64)
    }

    /// Blocks on the closure of the given facets, ascending.
    pub fn locate_dofs_topological(&self, facets: &[usize]) -> Vec<usize> {
        let all = self.mesh.facets();
        let mut blocks: Vec<usize> = facets
            .iter()
            .filter_map(|&f| all.get(f))
            .flat_map(|f| f.vertices.iter().copied())
            .collect();
        blocks.sort_unstable();
        blocks.dedup();
        blocks
    }

    /// Blocks whose coordinates satisfy `on`, ascending.
    pub fn locate_dofs_geometrical(&self, on: impl Fn(&[f64; 3]) -> bool) -> Vec<usize> {
        self.tabulate_dof_coordinates()
            .iter()
            .enumerate()
            .filter_map(|(b, x)| on(x).then_some(b))
            .collect()
    }
}

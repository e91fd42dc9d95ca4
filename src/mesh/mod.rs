//! Minimal distributed simplex mesh.
//!
//! A [`Mesh`] stores the vertices a rank can see (owned first, then ghosts, in
//! the order of its vertex [`IndexMap`]) together with the local cells. Facets
//! are derived on first use and cached.
//!
//! Reference ordering: local facet `i` of a simplex is the facet opposite
//! local vertex `i`.

pub mod bbox_tree;
pub mod generation;
pub mod geometry;
pub mod tags;

use std::sync::Arc;

use hashbrown::HashMap;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::comm::Communicator;
use crate::mpc_error::MpcError;
use crate::space::IndexMap;

pub use bbox_tree::{BoundingBoxTree, PartitionBoxes};
pub use geometry::{basis_values, get_basis_functions, point_in_cell, pull_back};
pub use tags::MeshTags;

/// Supported cell shapes (all simplices, so P1 DOFs live on vertices).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum CellKind {
    Interval,
    Triangle,
    Tetrahedron,
}

impl CellKind {
    /// Topological dimension.
    pub fn tdim(self) -> usize {
        match self {
            CellKind::Interval => 1,
            CellKind::Triangle => 2,
            CellKind::Tetrahedron => 3,
        }
    }

    pub fn num_vertices(self) -> usize {
        self.tdim() + 1
    }

    /// Local vertices of local facet `i` (every vertex but `i`).
    pub fn facet_vertices(self, i: usize) -> impl Iterator<Item = usize> {
        (0..self.num_vertices()).filter(move |&v| v != i)
    }
}

/// A codimension-1 entity and the local cells it bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct Facet {
    /// Sorted local vertex indices.
    pub vertices: Vec<usize>,
    /// `(cell, local facet index)` for each incident local cell.
    pub cells: Vec<(usize, usize)>,
}

impl Facet {
    /// Facet bounded by a single local cell.
    ///
    /// Facets on a partition interface also have one local cell; mark
    /// boundaries geometrically (see [`MeshTags::locate_facets`]).
    pub fn is_exterior(&self) -> bool {
        self.cells.len() == 1
    }
}

/// The local part of a distributed simplex mesh.
#[derive(Debug)]
pub struct Mesh {
    kind: CellKind,
    gdim: usize,
    coordinates: Vec<[f64; 3]>,
    cells: Vec<usize>,
    vertex_map: Arc<IndexMap>,
    facets: OnceCell<Vec<Facet>>,
}

impl Mesh {
    /// Build a mesh from local vertex coordinates and flat cell connectivity.
    ///
    /// `coordinates` must list owned vertices first, then ghosts, matching
    /// `vertex_map`. Unused coordinate components are ignored.
    pub fn new(
        kind: CellKind,
        gdim: usize,
        coordinates: Vec<[f64; 3]>,
        cells: Vec<usize>,
        vertex_map: Arc<IndexMap>,
    ) -> Result<Self, MpcError> {
        if !(kind.tdim()..=3).contains(&gdim) {
            return Err(MpcError::Unsupported(format!(
                "{kind:?} cells in geometric dimension {gdim}"
            )));
        }
        let nv = vertex_map.size_local() + vertex_map.num_ghosts();
        if coordinates.len() != nv {
            return Err(MpcError::DimensionMismatch {
                context: "mesh coordinates",
                expected: nv,
                found: coordinates.len(),
            });
        }
        if cells.len() % kind.num_vertices() != 0 {
            return Err(MpcError::MalformedData(format!(
                "cell connectivity of length {} is not a multiple of {}",
                cells.len(),
                kind.num_vertices()
            )));
        }
        if let Some(&bad) = cells.iter().find(|&&v| v >= nv) {
            return Err(MpcError::IndexOutOfRange {
                context: "mesh cell vertex",
                index: bad as u64,
                len: nv as u64,
            });
        }
        let mut coordinates = coordinates;
        for x in &mut coordinates {
            x[gdim..].iter_mut().for_each(|c| *c = 0.0);
        }
        Ok(Self {
            kind,
            gdim,
            coordinates,
            cells,
            vertex_map,
            facets: OnceCell::new(),
        })
    }

    /// Single-rank mesh; every vertex is owned.
    pub fn serial(
        kind: CellKind,
        gdim: usize,
        coordinates: Vec<[f64; 3]>,
        cells: Vec<usize>,
    ) -> Result<Self, MpcError> {
        let map = IndexMap::serial(coordinates.len());
        Self::new(kind, gdim, coordinates, cells, Arc::new(map))
    }

    /// Collectively build one partition of a distributed mesh.
    ///
    /// The first `num_owned` vertices are owned; the rest are ghosts with
    /// the given global indices and owners.
    #[allow(clippy::too_many_arguments)]
    pub fn distributed<C: Communicator>(
        comm: &C,
        kind: CellKind,
        gdim: usize,
        coordinates: Vec<[f64; 3]>,
        cells: Vec<usize>,
        num_owned: usize,
        ghosts: Vec<u64>,
        ghost_owners: Vec<usize>,
    ) -> Result<Self, MpcError> {
        let map = IndexMap::new(comm, num_owned, ghosts, ghost_owners)?;
        Self::new(kind, gdim, coordinates, cells, Arc::new(map))
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn gdim(&self) -> usize {
        self.gdim
    }

    pub fn tdim(&self) -> usize {
        self.kind.tdim()
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len() / self.kind.num_vertices()
    }

    /// Owned plus ghost vertices.
    pub fn num_vertices(&self) -> usize {
        self.coordinates.len()
    }

    pub fn coordinates(&self) -> &[[f64; 3]] {
        &self.coordinates
    }

    pub fn vertex_map(&self) -> &Arc<IndexMap> {
        &self.vertex_map
    }

    pub fn cell_vertices(&self, cell: usize) -> &[usize] {
        let nv = self.kind.num_vertices();
        &self.cells[cell * nv..(cell + 1) * nv]
    }

    pub fn cell_coordinates(&self, cell: usize) -> Vec<[f64; 3]> {
        self.cell_vertices(cell)
            .iter()
            .map(|&v| self.coordinates[v])
            .collect()
    }

    /// All local facets, ordered by first appearance in the cell list.
    pub fn facets(&self) -> &[Facet] {
        self.facets.get_or_init(|| {
            let mut lookup: HashMap<Vec<usize>, usize> = HashMap::new();
            let mut facets: Vec<Facet> = Vec::new();
            for cell in 0..self.num_cells() {
                let verts = self.cell_vertices(cell);
                for local in 0..self.kind.num_vertices() {
                    let mut key: Vec<usize> =
                        self.kind.facet_vertices(local).map(|i| verts[i]).collect();
                    key.sort_unstable();
                    let idx = *lookup.entry(key.clone()).or_insert_with(|| {
                        facets.push(Facet {
                            vertices: key,
                            cells: Vec::new(),
                        });
                        facets.len() - 1
                    });
                    facets[idx].cells.push((cell, local));
                }
            }
            facets
        })
    }

    /// Indices of facets bounded by a single local cell.
    pub fn exterior_facets(&self) -> Vec<usize> {
        self.facets()
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.is_exterior().then_some(i))
            .collect()
    }

    pub fn facet_midpoint(&self, facet: usize) -> [f64; 3] {
        let verts = &self.facets()[facet].vertices;
        let mut mid = [0.0; 3];
        for &v in verts {
            for (m, x) in mid.iter_mut().zip(self.coordinates[v]) {
                *m += x;
            }
        }
        mid.map(|m| m / verts.len() as f64)
    }

    /// Unit normal of `facet`, pointing out of its first incident cell.
    pub fn facet_normal(&self, facet: usize) -> Result<[f64; 3], MpcError> {
        let f = self.facets().get(facet).ok_or(MpcError::IndexOutOfRange {
            context: "Mesh::facet_normal",
            index: facet as u64,
            len: self.facets().len() as u64,
        })?;
        let (cell, local) = f.cells[0];
        let opposite = self.coordinates[self.cell_vertices(cell)[local]];
        let points: Vec<[f64; 3]> = f.vertices.iter().map(|&v| self.coordinates[v]).collect();
        geometry::outward_normal(&points, opposite).ok_or(MpcError::DegenerateCell { cell })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_triangles() -> Mesh {
        // unit square split along the diagonal 0-2
        let x = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]];
        Mesh::serial(CellKind::Triangle, 2, x, vec![0, 1, 2, 0, 2, 3]).unwrap()
    }

    #[test]
    fn facets_are_shared_between_neighbours() {
        let mesh = two_triangles();
        assert_eq!(mesh.facets().len(), 5);
        let interior: Vec<_> = mesh.facets().iter().filter(|f| !f.is_exterior()).collect();
        assert_eq!(interior.len(), 1);
        assert_eq!(interior[0].vertices, vec![0, 2]);
        assert_eq!(mesh.exterior_facets().len(), 4);
    }

    #[test]
    fn exterior_normals_point_outwards() {
        let mesh = two_triangles();
        for f in mesh.exterior_facets() {
            let n = mesh.facet_normal(f).unwrap();
            let mid = mesh.facet_midpoint(f);
            // outward from the square's centre
            let d = [mid[0] - 0.5, mid[1] - 0.5];
            assert!(n[0] * d[0] + n[1] * d[1] > 0.0);
            assert!(((n[0] * n[0] + n[1] * n[1]).sqrt() - 1.0).abs() < 1e-14);
        }
    }

    #[test]
    fn rejects_bad_connectivity() {
        let x = vec![[0.0; 3], [1.0, 0.0, 0.0]];
        assert!(matches!(
            Mesh::serial(CellKind::Interval, 1, x.clone(), vec![0, 2]),
            Err(MpcError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            Mesh::serial(CellKind::Triangle, 1, x, vec![0, 1, 1]),
            Err(MpcError::Unsupported(_))
        ));
    }
}

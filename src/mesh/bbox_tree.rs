//! Spatial search over cells and over whole partitions.

use rayon::prelude::*;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, RTree};

use crate::comm::wire::WireValue;
use crate::comm::{CommTag, Communicator, all_gather};
use crate::mesh::Mesh;
use crate::mesh::geometry::cell_bounding_box;
use crate::mpc_error::MpcError;

type CellBox = GeomWithData<Rectangle<[f64; 3]>, usize>;

const BOXES_TAG: CommTag = CommTag::new(0x4a00);

/// R*-tree over the padded bounding boxes of a subset of local cells.
#[derive(Debug)]
pub struct BoundingBoxTree {
    tree: RTree<CellBox>,
    bounds: Option<([f64; 3], [f64; 3])>,
}

impl BoundingBoxTree {
    pub fn new(mesh: &Mesh, cells: &[usize], padding: f64) -> Self {
        let boxes: Vec<(usize, [f64; 3], [f64; 3])> = cells
            .par_iter()
            .map(|&c| {
                let (lo, hi) = cell_bounding_box(mesh, c, padding);
                (c, lo, hi)
            })
            .collect();
        let bounds = boxes.iter().fold(None, |acc, &(_, lo, hi)| match acc {
            None => Some((lo, hi)),
            Some((a, b)) => Some((
                [a[0].min(lo[0]), a[1].min(lo[1]), a[2].min(lo[2])],
                [b[0].max(hi[0]), b[1].max(hi[1]), b[2].max(hi[2])],
            )),
        });
        let items = boxes
            .into_iter()
            .map(|(c, lo, hi)| GeomWithData::new(Rectangle::from_corners(lo, hi), c))
            .collect();
        Self {
            tree: RTree::bulk_load(items),
            bounds,
        }
    }

    /// Tree over every local cell.
    pub fn all_cells(mesh: &Mesh, padding: f64) -> Self {
        let cells: Vec<usize> = (0..mesh.num_cells()).collect();
        Self::new(mesh, &cells, padding)
    }

    /// Cells whose box contains `x`, ascending.
    pub fn candidates(&self, x: &[f64; 3]) -> Vec<usize> {
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&AABB::from_point(*x))
            .map(|b| b.data)
            .collect();
        hits.sort_unstable();
        hits
    }

    pub fn bounds(&self) -> Option<([f64; 3], [f64; 3])> {
        self.bounds
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

/// Bounding box of every rank's search tree, gathered once.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionBoxes {
    boxes: Vec<Option<([f64; 3], [f64; 3])>>,
}

impl PartitionBoxes {
    /// Collective.
    pub fn gather<C: Communicator>(comm: &C, tree: &BoundingBoxTree) -> Result<Self, MpcError> {
        let local: Vec<WireValue> = tree
            .bounds()
            .map(|(lo, hi)| lo.iter().chain(&hi).map(|&v| WireValue::of(v)).collect())
            .unwrap_or_default();
        let gathered = all_gather(comm, BOXES_TAG, &local)?;
        let boxes = gathered
            .into_iter()
            .enumerate()
            .map(|(rank, vals)| match vals.len() {
                0 => Ok(None),
                6 => {
                    let v: Vec<f64> = vals.iter().map(WireValue::get).collect();
                    Ok(Some(([v[0], v[1], v[2]], [v[3], v[4], v[5]])))
                }
                n => Err(MpcError::CommError {
                    neighbor: rank,
                    reason: format!("partition box with {n} values"),
                }),
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { boxes })
    }

    /// Ranks whose box contains `x`, ascending.
    pub fn ranks_containing(&self, x: &[f64; 3]) -> Vec<usize> {
        self.boxes
            .iter()
            .enumerate()
            .filter_map(|(r, b)| {
                b.filter(|(lo, hi)| (0..3).all(|d| lo[d] <= x[d] && x[d] <= hi[d]))
                    .map(|_| r)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use crate::mesh::CellKind;

    #[test]
    fn candidates_on_shared_vertex() {
        let x = vec![[0.0; 3], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
        let mesh = Mesh::serial(CellKind::Interval, 1, x, vec![0, 1, 1, 2]).unwrap();
        let tree = BoundingBoxTree::all_cells(&mesh, 1e-8);
        assert_eq!(tree.candidates(&[1.0, 0.0, 0.0]), vec![0, 1]);
        assert_eq!(tree.candidates(&[1.5, 0.0, 0.0]), vec![1]);
        assert!(tree.candidates(&[3.0, 0.0, 0.0]).is_empty());

        let boxes = PartitionBoxes::gather(&NoComm, &tree).unwrap();
        assert_eq!(boxes.ranks_containing(&[0.5, 0.0, 0.0]), vec![0]);
        assert!(boxes.ranks_containing(&[0.5, 1.0, 0.0]).is_empty());
    }

    #[test]
    fn empty_tree_has_no_bounds() {
        let x = vec![[0.0; 3], [1.0, 0.0, 0.0]];
        let mesh = Mesh::serial(CellKind::Interval, 1, x, vec![0, 1]).unwrap();
        let tree = BoundingBoxTree::new(&mesh, &[], 0.0);
        assert!(tree.is_empty());
        let boxes = PartitionBoxes::gather(&NoComm, &tree).unwrap();
        assert!(boxes.ranks_containing(&[0.0; 3]).is_empty());
    }
}

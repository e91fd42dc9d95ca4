//! Distributed point-to-cell matching.
//!
//! A query point is first searched among the local candidate cells. Points
//! that may lie on other partitions are sent to every rank whose partition box
//! contains them; if the point was found locally, only lower ranks are asked,
//! since a lower rank would win the tie anyway. The winning hit is the one with
//! the lowest rank, then the lowest cell index.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::comm::wire::{MAX_CELL_NODES, WireHit, WireQuery, kind};
use crate::comm::{CommTag, Communicator, all_to_all_v, collective_check};
use crate::config::MpcConfig;
use crate::mesh::{BoundingBoxTree, PartitionBoxes, point_in_cell};
use crate::mpc_error::MpcError;
use crate::space::FunctionSpace;

const QUERY_TAG: CommTag = CommTag::new(0x4f00);
const REPLY_TAG: CommTag = CommTag::new(0x4f10);
const CHECK_TAG: CommTag = CommTag::new(0x4f20);

/// A cell that contains a query point, described in global numbering.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchHit {
    pub rank: usize,
    pub cell: usize,
    /// Global vertex blocks of the cell, in local vertex order.
    pub blocks: Vec<u64>,
    pub owners: Vec<usize>,
    /// P1 basis values at the query point.
    pub basis: Vec<f64>,
}

impl MatchHit {
    fn from_wire(rank: usize, hit: &WireHit) -> Self {
        Self {
            rank,
            cell: hit.cell(),
            blocks: hit.blocks(),
            owners: hit.owners(),
            basis: hit.basis(),
        }
    }

    fn beats(&self, other: &MatchHit) -> bool {
        (self.rank, self.cell) < (other.rank, other.cell)
    }
}

/// Search structure over a subset of local cells plus every rank's bounds.
#[derive(Debug)]
pub struct GeometricMatcher {
    space: Arc<FunctionSpace>,
    tree: BoundingBoxTree,
    boxes: PartitionBoxes,
    tolerance: f64,
}

impl GeometricMatcher {
    /// Index `cells` of `space`'s mesh. Collective.
    pub fn new<C: Communicator>(
        comm: &C,
        space: Arc<FunctionSpace>,
        cells: &[usize],
        config: &MpcConfig,
    ) -> Result<Self, MpcError> {
        let tree = BoundingBoxTree::new(space.mesh(), cells, config.bbox_padding);
        let boxes = PartitionBoxes::gather(comm, &tree)?;
        log::debug!(
            "[GeometricMatcher] rank {} indexed {} cells",
            comm.rank(),
            tree.len()
        );
        Ok(Self {
            space,
            tree,
            boxes,
            tolerance: config.point_tolerance,
        })
    }

    /// Lowest-indexed local cell containing `x`.
    pub fn locate_local(&self, x: &[f64; 3]) -> Result<Option<MatchHit>, MpcError> {
        let mesh = self.space.mesh();
        let map = self.space.index_map();
        for cell in self.tree.candidates(x) {
            let Some(basis) = point_in_cell(mesh, cell, x, self.tolerance)? else {
                continue;
            };
            let verts = mesh.cell_vertices(cell);
            let blocks = verts
                .iter()
                .map(|&v| map.local_to_global(v))
                .collect::<Result<Vec<_>, _>>()?;
            let owners = verts
                .iter()
                .map(|&v| map.owner_of_local(v))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Some(MatchHit {
                rank: map.rank(),
                cell,
                blocks,
                owners,
                basis,
            }));
        }
        Ok(None)
    }

    /// Resolve every point to its winning cell. Collective; fails with
    /// [`MpcError::NoMatchFound`] if some point lies in no indexed cell.
    pub fn find<C: Communicator>(
        &self,
        comm: &C,
        points: &[[f64; 3]],
    ) -> Result<Vec<MatchHit>, MpcError> {
        let me = comm.rank();
        let local: Result<Vec<Option<MatchHit>>, MpcError> =
            points.iter().map(|x| self.locate_local(x)).collect();
        let mut best = collective_check(comm, CHECK_TAG, "GeometricMatcher::local", local)?;

        let mut queries: BTreeMap<usize, Vec<WireQuery>> = BTreeMap::new();
        for (i, x) in points.iter().enumerate() {
            let limit = if best[i].is_some() { me } else { usize::MAX };
            for r in self.boxes.ranks_containing(x) {
                if r != me && r < limit {
                    queries.entry(r).or_default().push(WireQuery::new(i, *x));
                }
            }
        }
        let asked = all_to_all_v(comm, QUERY_TAG, kind::MATCH_QUERY, &queries)?;

        let mut answer_err = Ok(());
        let mut replies: BTreeMap<usize, Vec<WireHit>> = BTreeMap::new();
        for (&peer, qs) in &asked {
            for q in qs {
                match self.locate_local(&q.point()) {
                    Ok(Some(hit)) if hit.blocks.len() <= MAX_CELL_NODES => replies
                        .entry(peer)
                        .or_default()
                        .push(WireHit::new(q.id(), hit.cell, &hit.blocks, &hit.owners, &hit.basis)),
                    Ok(Some(_)) => {
                        answer_err = answer_err.and(Err(MpcError::Unsupported(
                            "cell with more vertices than a tetrahedron".into(),
                        )))
                    }
                    Ok(None) => {}
                    Err(e) => answer_err = answer_err.and(Err(e)),
                }
            }
        }
        let answers = all_to_all_v(comm, REPLY_TAG, kind::MATCH_REPLY, &replies)?;

        let mut resolved = answer_err;
        for (&rank, hits) in &answers {
            for h in hits {
                let Some(slot) = best.get_mut(h.id()) else {
                    resolved = resolved.and(Err(MpcError::CommError {
                        neighbor: rank,
                        reason: format!("reply for unknown query {}", h.id()),
                    }));
                    continue;
                };
                let hit = MatchHit::from_wire(rank, h);
                if slot.as_ref().is_none_or(|b| hit.beats(b)) {
                    *slot = Some(hit);
                }
            }
        }
        let hits = resolved.and_then(|_| {
            best.into_iter()
                .enumerate()
                .map(|(query, hit)| {
                    hit.ok_or(MpcError::NoMatchFound {
                        query,
                        x: points[query],
                    })
                })
                .collect::<Result<Vec<_>, _>>()
        });
        collective_check(comm, CHECK_TAG, "GeometricMatcher::find", hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use crate::mesh::generation::create_rectangle;

    #[test]
    fn shared_vertex_goes_to_lowest_cell() {
        let mesh = Arc::new(create_rectangle([0.0, 0.0], [2.0, 1.0], 2, 1).unwrap());
        let v = Arc::new(FunctionSpace::p1(mesh, 1).unwrap());
        let cells: Vec<usize> = (0..4).collect();
        let m = GeometricMatcher::new(&NoComm, v, &cells, &MpcConfig::default()).unwrap();
        let hits = m.find(&NoComm, &[[1.0, 0.0, 0.0], [1.5, 0.75, 0.0]]).unwrap();
        assert_eq!(hits[0].cell, 0);
        assert!((hits[0].basis.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(hits[1].cell, 3);
        assert_eq!(hits[1].rank, 0);
    }

    #[test]
    fn outside_point_is_reported() {
        let mesh = Arc::new(create_rectangle([0.0, 0.0], [1.0, 1.0], 1, 1).unwrap());
        let v = Arc::new(FunctionSpace::p1(mesh, 1).unwrap());
        let m = GeometricMatcher::new(&NoComm, v, &[0, 1], &MpcConfig::default()).unwrap();
        assert_eq!(
            m.find(&NoComm, &[[0.5, 0.5, 0.0], [3.0, 0.0, 0.0]]).err(),
            Some(MpcError::NoMatchFound {
                query: 1,
                x: [3.0, 0.0, 0.0]
            })
        );
    }
}

//! Vertex normals from facet normals.

use crate::comm::{CommTag, Communicator, collective_check};
use crate::la::GhostedVector;
use crate::mesh::geometry::norm;
use crate::mpc_error::MpcError;
use crate::space::FunctionSpace;

const NORMALS_TAG: CommTag = CommTag::new(0x5000);

/// For every local block (owned and ghost), the facets of `facets` it lies on.
pub fn create_dof_to_facet_map(space: &FunctionSpace, facets: &[usize]) -> Vec<Vec<usize>> {
    let all = space.mesh().facets();
    let mut map = vec![Vec::new(); space.mesh().num_vertices()];
    for &f in facets {
        if let Some(facet) = all.get(f) {
            for &v in &facet.vertices {
                map[v].push(f);
            }
        }
    }
    map
}

/// Normalised mean of the outward normals of the facets around `block`.
pub fn create_average_normal(
    space: &FunctionSpace,
    block: usize,
    dof_to_facet: &[Vec<usize>],
) -> Result<[f64; 3], MpcError> {
    let facets = dof_to_facet.get(block).ok_or(MpcError::IndexOutOfRange {
        context: "create_average_normal block",
        index: block as u64,
        len: dof_to_facet.len() as u64,
    })?;
    let mut n = [0.0; 3];
    for &f in facets {
        let nf = space.mesh().facet_normal(f)?;
        n.iter_mut().zip(nf).for_each(|(a, b)| *a += b);
    }
    let len = norm(n);
    if len <= f64::EPSILON {
        return Err(MpcError::MalformedData(format!(
            "no usable facet normal at block {block}"
        )));
    }
    Ok(n.map(|c| c / len))
}

/// Fill `normals` (block size = geometric dimension) with averaged unit
/// normals of `facets` at their vertices, consistent across ranks. Collective.
///
/// Vertices off the facets get a zero vector.
pub fn create_normal_approximation<C: Communicator>(
    comm: &C,
    space: &FunctionSpace,
    facets: &[usize],
    normals: &mut GhostedVector,
) -> Result<(), MpcError> {
    let gdim = space.mesh().gdim();
    let accumulated = accumulate(space, facets, normals, gdim);
    collective_check(comm, NORMALS_TAG, "create_normal_approximation", accumulated)?;
    normals.scatter_reverse_add(comm)?;
    for n in normals.owned_mut().chunks_mut(gdim) {
        let len = n.iter().map(|c| c * c).sum::<f64>().sqrt();
        if len > f64::EPSILON {
            n.iter_mut().for_each(|c| *c /= len);
        }
    }
    normals.scatter_forward(comm)
}

fn accumulate(
    space: &FunctionSpace,
    facets: &[usize],
    normals: &mut GhostedVector,
    gdim: usize,
) -> Result<(), MpcError> {
    if normals.bs() != gdim {
        return Err(MpcError::DimensionMismatch {
            context: "normal vector block size",
            expected: gdim,
            found: normals.bs(),
        });
    }
    let needed = space.mesh().num_vertices() * gdim;
    if normals.len() < needed {
        return Err(MpcError::DimensionMismatch {
            context: "normal vector length",
            expected: needed,
            found: normals.len(),
        });
    }
    normals.set(0.0);
    let mesh = space.mesh();
    let values = normals.values_mut();
    for &f in facets {
        let nf = mesh.facet_normal(f)?;
        for &v in &mesh.facets()[f].vertices {
            for d in 0..gdim {
                values[v * gdim + d] += nf[d];
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use crate::mesh::MeshTags;
    use crate::mesh::generation::create_rectangle;
    use std::sync::Arc;

    #[test]
    fn corner_normal_is_diagonal() {
        let mesh = Arc::new(create_rectangle([0.0, 0.0], [1.0, 1.0], 2, 2).unwrap());
        let v = FunctionSpace::p1(Arc::clone(&mesh), 2).unwrap();
        let right = MeshTags::locate_facets(&mesh, 1, |x| (x[0] - 1.0).abs() < 1e-12);
        let top = MeshTags::locate_facets(&mesh, 1, |x| (x[1] - 1.0).abs() < 1e-12);
        let facets = right.merge(&top).find(1);
        let map = create_dof_to_facet_map(&v, &facets);

        // vertex 8 is the corner (1, 1)
        let n = create_average_normal(&v, 8, &map).unwrap();
        let s = 0.5f64.sqrt();
        assert!((n[0] - s).abs() < 1e-12 && (n[1] - s).abs() < 1e-12);
        // vertex 5 is (1, 0.5)
        let n = create_average_normal(&v, 5, &map).unwrap();
        assert!((n[0] - 1.0).abs() < 1e-12 && n[1].abs() < 1e-12);
        assert!(create_average_normal(&v, 0, &map).is_err());

        let mut normals = GhostedVector::new(Arc::clone(v.index_map()), 2);
        create_normal_approximation(&NoComm, &v, &facets, &mut normals).unwrap();
        assert!((normals.values()[16] - s).abs() < 1e-12);
        assert!((normals.values()[10] - 1.0).abs() < 1e-12);
        assert_eq!(&normals.values()[0..2], &[0.0, 0.0]);
    }
}

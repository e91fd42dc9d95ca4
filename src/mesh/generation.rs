//! Structured single-rank simplex meshes.

use crate::mesh::{CellKind, Mesh};
use crate::mpc_error::MpcError;

fn positive(n: &[usize]) -> Result<(), MpcError> {
    if n.contains(&0) {
        return Err(MpcError::MalformedData(
            "cell counts must be positive".into(),
        ));
    }
    Ok(())
}

/// `n` intervals over `[min, max]`, vertices numbered left to right.
pub fn create_interval(n: usize, min: f64, max: f64) -> Result<Mesh, MpcError> {
    positive(&[n])?;
    let dx = (max - min) / n as f64;
    let x = (0..=n).map(|i| [min + dx * i as f64, 0.0, 0.0]).collect();
    let cells = (0..n).flat_map(|i| [i, i + 1]).collect();
    Mesh::serial(CellKind::Interval, 1, x, cells)
}

/// `nx`×`ny` squares over `[min, max]`, each split into two triangles along
/// the diagonal from its lower-left corner.
pub fn create_rectangle(
    min: [f64; 2],
    max: [f64; 2],
    nx: usize,
    ny: usize,
) -> Result<Mesh, MpcError> {
    positive(&[nx, ny])?;
    let dx = (max[0] - min[0]) / nx as f64;
    let dy = (max[1] - min[1]) / ny as f64;
    let mut x = Vec::with_capacity((nx + 1) * (ny + 1));
    for j in 0..=ny {
        for i in 0..=nx {
            x.push([min[0] + dx * i as f64, min[1] + dy * j as f64, 0.0]);
        }
    }
    let row = nx + 1;
    let mut cells = Vec::with_capacity(6 * nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            let v0 = j * row + i;
            let v1 = v0 + 1;
            let v3 = v0 + row;
            let v2 = v3 + 1;
            cells.extend_from_slice(&[v0, v1, v2, v0, v2, v3]);
        }
    }
    Mesh::serial(CellKind::Triangle, 2, x, cells)
}

/// `nx`×`ny`×`nz` cubes over `[min, max]`, six tetrahedra per cube sharing
/// the main diagonal.
pub fn create_box(
    min: [f64; 3],
    max: [f64; 3],
    n: [usize; 3],
) -> Result<Mesh, MpcError> {
    positive(&n)?;
    let h: Vec<f64> = (0..3).map(|d| (max[d] - min[d]) / n[d] as f64).collect();
    let mut x = Vec::with_capacity((n[0] + 1) * (n[1] + 1) * (n[2] + 1));
    for k in 0..=n[2] {
        for j in 0..=n[1] {
            for i in 0..=n[0] {
                x.push([
                    min[0] + h[0] * i as f64,
                    min[1] + h[1] * j as f64,
                    min[2] + h[2] * k as f64,
                ]);
            }
        }
    }
    let id = |i: usize, j: usize, k: usize| (k * (n[1] + 1) + j) * (n[0] + 1) + i;
    let mut cells = Vec::with_capacity(24 * n[0] * n[1] * n[2]);
    for k in 0..n[2] {
        for j in 0..n[1] {
            for i in 0..n[0] {
                let v = |a: usize, b: usize, c: usize| id(i + a, j + b, k + c);
                let (v000, v111) = (v(0, 0, 0), v(1, 1, 1));
                for [p, q] in [
                    [v(1, 0, 0), v(1, 1, 0)],
                    [v(1, 0, 0), v(1, 0, 1)],
                    [v(0, 1, 0), v(1, 1, 0)],
                    [v(0, 1, 0), v(0, 1, 1)],
                    [v(0, 0, 1), v(1, 0, 1)],
                    [v(0, 0, 1), v(0, 1, 1)],
                ] {
                    cells.extend_from_slice(&[v000, p, q, v111]);
                }
            }
        }
    }
    Mesh::serial(CellKind::Tetrahedron, 3, x, cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts() {
        let m = create_interval(3, 0.0, 1.0).unwrap();
        assert_eq!((m.num_cells(), m.num_vertices()), (3, 4));
        let m = create_rectangle([0.0, 0.0], [2.0, 1.0], 2, 1).unwrap();
        assert_eq!((m.num_cells(), m.num_vertices()), (4, 6));
        assert_eq!(m.exterior_facets().len(), 6);
        let m = create_box([0.0; 3], [1.0; 3], [1, 1, 1]).unwrap();
        assert_eq!((m.num_cells(), m.num_vertices()), (6, 8));
        // two triangles on each of the six faces
        assert_eq!(m.exterior_facets().len(), 12);
    }

    #[test]
    fn zero_cells_rejected() {
        assert!(create_interval(0, 0.0, 1.0).is_err());
    }
}

//! Affine simplex geometry and P1 basis evaluation.
//!
//! Reference simplices have vertex 0 at the origin and vertex `i` at the
//! `i`-th unit vector, so the P1 basis is `[1 - sum(xi), xi_0, .., xi_{d-1}]`.
//! Manifold cells (a triangle in 3D, an interval in 2D or 3D) are pulled back
//! by least squares; [`point_in_cell`] then rejects points off the cell.

use nalgebra::{DMatrix, DVector};

use crate::mesh::{CellKind, Mesh};
use crate::mpc_error::MpcError;

#[inline]
pub(crate) fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub(crate) fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub(crate) fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

#[inline]
fn axpy(alpha: f64, x: [f64; 3], y: [f64; 3]) -> [f64; 3] {
    [y[0] + alpha * x[0], y[1] + alpha * x[1], y[2] + alpha * x[2]]
}

/// Axis-aligned bounds of a cell, padded by `padding` in every direction.
pub fn cell_bounding_box(mesh: &Mesh, cell: usize, padding: f64) -> ([f64; 3], [f64; 3]) {
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for x in mesh.cell_coordinates(cell) {
        for d in 0..3 {
            lo[d] = lo[d].min(x[d] - padding);
            hi[d] = hi[d].max(x[d] + padding);
        }
    }
    (lo, hi)
}

/// Reference coordinates of `x` in `cell`.
pub fn pull_back(mesh: &Mesh, cell: usize, x: &[f64; 3]) -> Result<Vec<f64>, MpcError> {
    let verts = mesh.cell_coordinates(cell);
    let tdim = mesh.tdim();
    let gdim = mesh.gdim();
    let jac = DMatrix::from_fn(gdim, tdim, |i, j| verts[j + 1][i] - verts[0][i]);
    let rhs = DVector::from_fn(gdim, |i, _| x[i] - verts[0][i]);
    let (lhs, rhs) = if gdim == tdim {
        (jac, rhs)
    } else {
        (jac.transpose() * &jac, jac.transpose() * rhs)
    };
    let xi = lhs
        .lu()
        .solve(&rhs)
        .ok_or(MpcError::DegenerateCell { cell })?;
    Ok(xi.iter().copied().collect())
}

/// P1 basis values at reference point `xi`.
pub fn basis_values(kind: CellKind, xi: &[f64]) -> Vec<f64> {
    let mut phi = Vec::with_capacity(kind.num_vertices());
    phi.push(1.0 - xi.iter().sum::<f64>());
    phi.extend_from_slice(&xi[..kind.tdim()]);
    phi
}

/// Values of the cell's P1 basis functions at physical point `x`,
/// in local vertex order.
pub fn get_basis_functions(mesh: &Mesh, cell: usize, x: &[f64; 3]) -> Result<Vec<f64>, MpcError> {
    let xi = pull_back(mesh, cell, x)?;
    Ok(basis_values(mesh.kind(), &xi))
}

/// Basis values at `x` if `x` lies in `cell` up to `tol`, else `None`.
pub fn point_in_cell(
    mesh: &Mesh,
    cell: usize,
    x: &[f64; 3],
    tol: f64,
) -> Result<Option<Vec<f64>>, MpcError> {
    let phi = get_basis_functions(mesh, cell, x)?;
    if phi.iter().any(|&p| p < -tol) {
        return Ok(None);
    }
    let verts = mesh.cell_coordinates(cell);
    let h = verts
        .iter()
        .skip(1)
        .map(|v| norm(sub(*v, verts[0])))
        .fold(0.0, f64::max);
    let mapped = verts
        .iter()
        .zip(&phi)
        .fold([0.0; 3], |acc, (v, &p)| axpy(p, *v, acc));
    if norm(sub(mapped, *x)) > tol.max(tol * h) {
        return Ok(None);
    }
    Ok(Some(phi))
}

/// Unit normal of the facet spanned by `points`, oriented away from `opposite`.
///
/// The normal lies in the span of the cell: the component of
/// `points[0] - opposite` orthogonal to the facet's tangent space.
pub(crate) fn outward_normal(points: &[[f64; 3]], opposite: [f64; 3]) -> Option<[f64; 3]> {
    let mut basis: Vec<[f64; 3]> = Vec::with_capacity(2);
    for p in &points[1..] {
        let mut t = sub(*p, points[0]);
        for b in &basis {
            t = axpy(-dot(t, *b), *b, t);
        }
        let len = norm(t);
        if len <= f64::EPSILON {
            return None;
        }
        basis.push(t.map(|c| c / len));
    }
    let mut n = sub(points[0], opposite);
    for b in &basis {
        n = axpy(-dot(n, *b), *b, n);
    }
    let len = norm(n);
    (len > f64::EPSILON).then(|| n.map(|c| c / len))
}

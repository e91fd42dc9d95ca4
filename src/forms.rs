//! Element kernels for P1 spaces and Dirichlet boundary conditions.
//!
//! Element tensors follow the DOF order of
//! [`DofMap::cell_dofs`](crate::space::DofMap::cell_dofs): block-major, so
//! entry `(i, j)` of a cell matrix couples `cell_dofs[i]` with `cell_dofs[j]`,
//! stored row-major.

use std::sync::Arc;

use nalgebra::DMatrix;

use crate::la::GhostedVector;
use crate::mpc_error::MpcError;
use crate::space::FunctionSpace;

/// Bilinear form `a(u, v)` with trial and test functions from one space.
pub trait BilinearForm: Send + Sync {
    fn function_space(&self) -> &Arc<FunctionSpace>;

    /// Write the row-major element matrix of `cell` into `out`.
    fn cell_matrix(&self, cell: usize, out: &mut [f64]) -> Result<(), MpcError>;
}

/// Linear form `L(v)`.
pub trait LinearForm: Send + Sync {
    fn function_space(&self) -> &Arc<FunctionSpace>;

    /// Write the element vector of `cell` into `out`.
    fn cell_vector(&self, cell: usize, out: &mut [f64]) -> Result<(), MpcError>;
}

/// Cell measure and physical gradients of the P1 basis.
struct P1Cell {
    volume: f64,
    grads: Vec<[f64; 3]>,
}

fn p1_cell(space: &FunctionSpace, cell: usize) -> Result<P1Cell, MpcError> {
    let mesh = space.mesh();
    let x = mesh.cell_coordinates(cell);
    let (gdim, tdim) = (mesh.gdim(), mesh.tdim());
    let jac = DMatrix::from_fn(gdim, tdim, |i, j| x[j + 1][i] - x[0][i]);
    let metric = jac.transpose() * &jac;
    let det = metric.determinant();
    let inv = metric
        .try_inverse()
        .filter(|_| det > 0.0)
        .ok_or(MpcError::DegenerateCell { cell })?;
    let g = jac * inv;
    let factorial: f64 = (1..=tdim).map(|k| k as f64).product();
    let mut grads = vec![[0.0; 3]; tdim + 1];
    for k in 0..tdim {
        for d in 0..gdim {
            grads[k + 1][d] = g[(d, k)];
            grads[0][d] -= g[(d, k)];
        }
    }
    Ok(P1Cell {
        volume: det.sqrt() / factorial,
        grads,
    })
}

/// Scatter a scalar `n`×`n` vertex matrix onto the `bs` components.
fn expand_scalar(scalar: &[f64], n: usize, bs: usize, out: &mut [f64]) -> Result<(), MpcError> {
    let size = n * bs;
    if out.len() != size * size {
        return Err(MpcError::DimensionMismatch {
            context: "element matrix",
            expected: size * size,
            found: out.len(),
        });
    }
    out.iter_mut().for_each(|v| *v = 0.0);
    for i in 0..n {
        for j in 0..n {
            for c in 0..bs {
                out[(i * bs + c) * size + j * bs + c] = scalar[i * n + j];
            }
        }
    }
    Ok(())
}

fn p1_mass(volume: f64, n: usize) -> Vec<f64> {
    let d = (n - 1) as f64;
    let scale = volume / ((d + 1.0) * (d + 2.0));
    (0..n * n)
        .map(|k| if k / n == k % n { 2.0 * scale } else { scale })
        .collect()
}

/// `k ∫ ∇u·∇v`, applied componentwise.
pub struct StiffnessForm {
    space: Arc<FunctionSpace>,
    coefficient: f64,
}

impl StiffnessForm {
    pub fn new(space: Arc<FunctionSpace>, coefficient: f64) -> Self {
        Self { space, coefficient }
    }
}

impl BilinearForm for StiffnessForm {
    fn function_space(&self) -> &Arc<FunctionSpace> {
        &self.space
    }

    fn cell_matrix(&self, cell: usize, out: &mut [f64]) -> Result<(), MpcError> {
        let geo = p1_cell(&self.space, cell)?;
        let n = geo.grads.len();
        let mut k = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                let g: f64 = (0..3).map(|d| geo.grads[i][d] * geo.grads[j][d]).sum();
                k[i * n + j] = self.coefficient * geo.volume * g;
            }
        }
        expand_scalar(&k, n, self.space.bs(), out)
    }
}

/// `c ∫ u·v`.
pub struct MassForm {
    space: Arc<FunctionSpace>,
    coefficient: f64,
}

impl MassForm {
    pub fn new(space: Arc<FunctionSpace>, coefficient: f64) -> Self {
        Self { space, coefficient }
    }
}

impl BilinearForm for MassForm {
    fn function_space(&self) -> &Arc<FunctionSpace> {
        &self.space
    }

    fn cell_matrix(&self, cell: usize, out: &mut [f64]) -> Result<(), MpcError> {
        let geo = p1_cell(&self.space, cell)?;
        let n = geo.grads.len();
        let m: Vec<f64> = p1_mass(geo.volume, n)
            .into_iter()
            .map(|v| self.coefficient * v)
            .collect();
        expand_scalar(&m, n, self.space.bs(), out)
    }
}

type Source = dyn Fn(&[f64; 3], usize) -> f64 + Send + Sync;

/// `∫ f·v` with `f` replaced by its P1 interpolant; `f(x, component)`.
pub struct SourceForm {
    space: Arc<FunctionSpace>,
    f: Box<Source>,
}

impl SourceForm {
    pub fn new(
        space: Arc<FunctionSpace>,
        f: impl Fn(&[f64; 3], usize) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            space,
            f: Box::new(f),
        }
    }
}

impl LinearForm for SourceForm {
    fn function_space(&self) -> &Arc<FunctionSpace> {
        &self.space
    }

    fn cell_vector(&self, cell: usize, out: &mut [f64]) -> Result<(), MpcError> {
        let geo = p1_cell(&self.space, cell)?;
        let n = geo.grads.len();
        let bs = self.space.bs();
        if out.len() != n * bs {
            return Err(MpcError::DimensionMismatch {
                context: "element vector",
                expected: n * bs,
                found: out.len(),
            });
        }
        let m = p1_mass(geo.volume, n);
        let x = self.space.mesh().cell_coordinates(cell);
        for i in 0..n {
            for c in 0..bs {
                out[i * bs + c] = (0..n).map(|j| m[i * n + j] * (self.f)(&x[j], c)).sum();
            }
        }
        Ok(())
    }
}

/// Prescribed values on a set of local scalar DOFs.
#[derive(Clone, Debug)]
pub struct DirichletBC {
    dofs: Vec<usize>,
    values: Vec<f64>,
    num_owned: usize,
}

impl DirichletBC {
    /// `g(x, component)` evaluated at each DOF's coordinates.
    pub fn new(
        space: &FunctionSpace,
        dofs: &[usize],
        g: impl Fn(&[f64; 3], usize) -> f64,
    ) -> Result<Self, MpcError> {
        let bs = space.bs();
        let x = space.tabulate_dof_coordinates();
        let mut dofs = dofs.to_vec();
        dofs.sort_unstable();
        dofs.dedup();
        if let Some(&bad) = dofs.iter().find(|&&d| d >= space.num_dofs()) {
            return Err(MpcError::IndexOutOfRange {
                context: "DirichletBC dof",
                index: bad as u64,
                len: space.num_dofs() as u64,
            });
        }
        let values = dofs.iter().map(|&d| g(&x[d / bs], d % bs)).collect();
        Ok(Self {
            dofs,
            values,
            num_owned: space.num_owned_dofs(),
        })
    }

    /// Every component of the given local blocks.
    pub fn from_blocks(
        space: &FunctionSpace,
        blocks: &[usize],
        g: impl Fn(&[f64; 3], usize) -> f64,
    ) -> Result<Self, MpcError> {
        let bs = space.bs();
        let dofs: Vec<usize> = blocks
            .iter()
            .flat_map(|&b| (0..bs).map(move |c| b * bs + c))
            .collect();
        Self::new(space, &dofs, g)
    }

    /// Constrained local DOFs (owned and ghost), ascending.
    pub fn dofs(&self) -> &[usize] {
        &self.dofs
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn contains(&self, dof: usize) -> bool {
        self.dofs.binary_search(&dof).is_ok()
    }

    /// Prescribed value at `dof`, if constrained.
    pub fn value(&self, dof: usize) -> Option<f64> {
        self.dofs.binary_search(&dof).ok().map(|k| self.values[k])
    }

    pub fn owned_dofs(&self) -> impl Iterator<Item = usize> + '_ {
        self.dofs.iter().copied().filter(|&d| d < self.num_owned)
    }

    /// `b[d] = scale * g[d]` on owned constrained DOFs.
    pub fn set(&self, b: &mut GhostedVector, scale: f64) {
        let owned = b.owned_mut();
        for (&d, &v) in self.dofs.iter().zip(&self.values) {
            if let Some(slot) = owned.get_mut(d) {
                *slot = scale * v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::generation::{create_interval, create_rectangle};

    #[test]
    fn interval_stiffness_and_mass() {
        let mesh = Arc::new(create_interval(2, 0.0, 1.0).unwrap());
        let v = Arc::new(FunctionSpace::p1(mesh, 1).unwrap());
        let mut k = [0.0; 4];
        StiffnessForm::new(Arc::clone(&v), 1.0).cell_matrix(0, &mut k).unwrap();
        assert_eq!(k, [2.0, -2.0, -2.0, 2.0]);
        let mut m = [0.0; 4];
        MassForm::new(Arc::clone(&v), 1.0).cell_matrix(1, &mut m).unwrap();
        assert!((m[0] - 1.0 / 6.0).abs() < 1e-14);
        assert!((m[1] - 1.0 / 12.0).abs() < 1e-14);
    }

    #[test]
    fn stiffness_rows_sum_to_zero() {
        let mesh = Arc::new(create_rectangle([0.0, 0.0], [2.0, 1.0], 1, 1).unwrap());
        let v = Arc::new(FunctionSpace::p1(mesh, 2).unwrap());
        let mut k = vec![0.0; 36];
        StiffnessForm::new(v, 3.0).cell_matrix(1, &mut k).unwrap();
        for row in k.chunks(6) {
            assert!(row.iter().sum::<f64>().abs() < 1e-13);
        }
    }

    #[test]
    fn source_integrates_constant() {
        let mesh = Arc::new(create_rectangle([0.0, 0.0], [1.0, 1.0], 1, 1).unwrap());
        let v = Arc::new(FunctionSpace::p1(mesh, 1).unwrap());
        let l = SourceForm::new(v, |_, _| 3.0);
        let mut b = [0.0; 3];
        l.cell_vector(0, &mut b).unwrap();
        assert!((b.iter().sum::<f64>() - 1.5).abs() < 1e-14);
    }

    #[test]
    fn dirichlet_values() {
        let mesh = Arc::new(create_interval(2, 0.0, 1.0).unwrap());
        let v = FunctionSpace::p1(mesh, 1).unwrap();
        let bc = DirichletBC::new(&v, &[2, 0], |x, _| 1.0 + x[0]).unwrap();
        assert_eq!(bc.dofs(), &[0, 2]);
        assert_eq!(bc.value(2), Some(2.0));
        assert!(!bc.contains(1));
        assert!(DirichletBC::new(&v, &[3], |_, _| 0.0).is_err());
    }

    #[test]
    fn dirichlet_on_blocks_covers_every_component() {
        let mesh = Arc::new(create_rectangle([0.0, 0.0], [1.0, 1.0], 1, 1).unwrap());
        let v = FunctionSpace::p1(mesh, 2).unwrap();
        let bc = DirichletBC::from_blocks(&v, &[3], |x, c| x[1] + c as f64).unwrap();
        assert_eq!(bc.dofs(), &[6, 7]);
        assert_eq!(bc.values(), &[1.0, 2.0]);
        assert_eq!(bc.owned_dofs().count(), 2);
    }
}

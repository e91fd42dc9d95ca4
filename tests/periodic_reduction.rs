use std::sync::Arc;

use mesh_mpc::assembly::{assemble_matrix, create_matrix};
use mesh_mpc::comm::NoComm;
use mesh_mpc::config::MpcConfig;
use mesh_mpc::forms::{BilinearForm, MassForm, StiffnessForm};
use mesh_mpc::mesh::MeshTags;
use mesh_mpc::mesh::generation::create_interval;
use mesh_mpc::mpc::{MpcData, MultiPointConstraint, RelationKind};
use mesh_mpc::space::FunctionSpace;

fn interval_space(n: usize) -> Arc<FunctionSpace> {
    let mesh = Arc::new(create_interval(n, 0.0, 1.0).unwrap());
    Arc::new(FunctionSpace::p1(mesh, 1).unwrap())
}

/// Owned rows of the assembled constrained operator, densified.
fn constrained_dense(form: &impl BilinearForm, mpc: &MultiPointConstraint) -> Vec<Vec<f64>> {
    let mut a = create_matrix(&NoComm, form, mpc).unwrap();
    assemble_matrix(&mut a, form, mpc, &[]).unwrap();
    a.finalize(&NoComm).unwrap();
    let d = a.to_dense();
    (0..d.nrows())
        .map(|i| (0..d.ncols()).map(|j| d[(i, j)]).collect())
        .collect()
}

/// Closed ring of three equal elements over nodes {0, 1, 2, 0}.
fn ring(diag: f64, off: f64) -> [[f64; 3]; 3] {
    [[diag, off, off], [off, diag, off], [off, off, diag]]
}

fn assert_reduced(got: &[Vec<f64>], want: [[f64; 3]; 3]) {
    for i in 0..3 {
        for j in 0..3 {
            assert!(
                (got[i][j] - want[i][j]).abs() < 1e-12,
                "entry ({i}, {j}): {} != {}",
                got[i][j],
                want[i][j]
            );
        }
    }
}

fn periodic_end(v: &Arc<FunctionSpace>) -> MultiPointConstraint {
    let mut d = MpcData::new();
    d.push(3, [(0, 1.0, 0)]);
    MultiPointConstraint::new(&NoComm, Arc::clone(v), &d, MpcConfig::default()).unwrap()
}

#[test]
fn stiffness_reduces_to_ring() {
    let v = interval_space(3);
    let mpc = periodic_end(&v);
    let dense = constrained_dense(&StiffnessForm::new(Arc::clone(&v), 1.0), &mpc);
    // element stiffness is 3 * [[1, -1], [-1, 1]] for h = 1/3
    assert_reduced(&dense, ring(6.0, -3.0));
    // the slave row is decoupled with the configured diagonal
    assert_eq!(dense[3], vec![0.0, 0.0, 0.0, 1.0]);
    assert!(dense.iter().take(3).all(|row| row[3] == 0.0));
}

#[test]
fn mass_reduces_to_ring() {
    let v = interval_space(3);
    let mpc = periodic_end(&v);
    let dense = constrained_dense(&MassForm::new(Arc::clone(&v), 1.0), &mpc);
    let h = 1.0 / 3.0;
    assert_reduced(&dense, ring(4.0 * h / 6.0, h / 6.0));
}

#[test]
fn topological_builder_matches_hand_written_relation() {
    let v = interval_space(3);
    let tags = MeshTags::locate_facets(v.mesh(), 7, |x| (x[0] - 1.0).abs() < 1e-12);
    let shift = |x: &[f64; 3]| [x[0] - 1.0, x[1], x[2]];
    let built = MultiPointConstraint::from_relation(
        &NoComm,
        Arc::clone(&v),
        &tags,
        7,
        RelationKind::Periodic {
            relation: &shift,
            bcs: &[],
        },
        MpcConfig::default(),
    )
    .unwrap();
    let by_hand = periodic_end(&v);
    assert_eq!(built.slaves(), by_hand.slaves());
    assert_eq!(built.masters(0), by_hand.masters(0));

    let form = StiffnessForm::new(Arc::clone(&v), 2.0);
    assert_reduced(&constrained_dense(&form, &built), ring(12.0, -6.0));
}

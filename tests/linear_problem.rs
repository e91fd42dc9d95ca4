use std::sync::Arc;

use mesh_mpc::comm::NoComm;
use mesh_mpc::config::MpcConfig;
use mesh_mpc::forms::{DirichletBC, SourceForm, StiffnessForm};
use mesh_mpc::la::DenseLuSolver;
use mesh_mpc::mesh::generation::create_rectangle;
use mesh_mpc::mpc::{MultiPointConstraint, create_periodic_constraint_geometrical};
use mesh_mpc::problem::LinearProblem;
use mesh_mpc::space::FunctionSpace;

/// -Δu = 1 on the unit square, u = 0 at y = 0 and y = 1, periodic in x.
/// The exact solution y(1 - y)/2 is reproduced at the nodes.
#[test]
fn periodic_channel_flow_profile() {
    let mesh = Arc::new(create_rectangle([0.0, 0.0], [1.0, 1.0], 4, 4).unwrap());
    let v = Arc::new(FunctionSpace::p1(mesh, 1).unwrap());
    let walls = v.locate_dofs_geometrical(|x| x[1].abs() < 1e-12 || (x[1] - 1.0).abs() < 1e-12);
    let bc = DirichletBC::new(&v, &walls, |_, _| 0.0).unwrap();

    let cfg = MpcConfig::default();
    let data = create_periodic_constraint_geometrical(
        &NoComm,
        &v,
        |x| (x[0] - 1.0).abs() < 1e-12,
        |x| [x[0] - 1.0, x[1], x[2]],
        std::slice::from_ref(&bc),
        &cfg,
    )
    .unwrap();
    // the two wall corners on x = 1 stay Dirichlet DOFs
    assert_eq!(data.num_slaves(), 3);
    let mpc = Arc::new(MultiPointConstraint::new(&NoComm, Arc::clone(&v), &data, cfg).unwrap());

    let mut problem = LinearProblem::new(
        &NoComm,
        StiffnessForm::new(Arc::clone(&v), 1.0),
        SourceForm::new(Arc::clone(&v), |_, _| 1.0),
        mpc,
        vec![bc],
        DenseLuSolver,
    )
    .unwrap();
    let u = problem.solve(&NoComm).unwrap();
    let x = v.tabulate_dof_coordinates();
    for (d, &ud) in u.values().iter().enumerate() {
        let y = x[d][1];
        assert!(
            (ud - y * (1.0 - y) / 2.0).abs() < 1e-10,
            "dof {d} at {:?}: {ud}",
            x[d]
        );
    }

    let mpc = problem.mpc();
    for i in 0..mpc.num_local_slaves() {
        let s = mpc.slaves()[i];
        let (m, c) = mpc.relation(i).next().unwrap();
        assert!((c - 1.0).abs() < 1e-12);
        assert!((problem.solution().values()[s] - problem.solution().values()[m]).abs() < 1e-14);
    }
}

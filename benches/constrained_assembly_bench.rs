use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use mesh_mpc::assembly::{assemble_matrix, create_matrix, create_sparsity_pattern};
use mesh_mpc::comm::NoComm;
use mesh_mpc::config::MpcConfig;
use mesh_mpc::forms::StiffnessForm;
use mesh_mpc::mesh::generation::create_rectangle;
use mesh_mpc::mpc::{MultiPointConstraint, create_periodic_constraint_geometrical};
use mesh_mpc::space::FunctionSpace;

// Unit square periodic in x, n×n squares.
fn periodic_square(n: usize) -> (Arc<FunctionSpace>, MultiPointConstraint) {
    let mesh = Arc::new(create_rectangle([0.0, 0.0], [1.0, 1.0], n, n).unwrap());
    let v = Arc::new(FunctionSpace::p1(mesh, 1).unwrap());
    let cfg = MpcConfig::default();
    let data = create_periodic_constraint_geometrical(
        &NoComm,
        &v,
        |x| (x[0] - 1.0).abs() < 1e-12,
        |x| [x[0] - 1.0, x[1], x[2]],
        &[],
        &cfg,
    )
    .unwrap();
    let mpc = MultiPointConstraint::new(&NoComm, Arc::clone(&v), &data, cfg).unwrap();
    (v, mpc)
}

fn bench_constrained_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("constrained_assembly");
    for &n in &[16usize, 32, 64] {
        let (v, mpc) = periodic_square(n);
        let form = StiffnessForm::new(Arc::clone(&v), 1.0);

        group.bench_with_input(BenchmarkId::new("pattern", n), &n, |b, _| {
            b.iter(|| create_sparsity_pattern(&NoComm, &form, &mpc).unwrap())
        });

        let mut a = create_matrix(&NoComm, &form, &mpc).unwrap();
        group.bench_with_input(BenchmarkId::new("matrix", n), &n, |b, _| {
            b.iter(|| {
                a.zero_entries();
                assemble_matrix(&mut a, &form, &mpc, &[]).unwrap();
                a.finalize(&NoComm).unwrap();
            })
        });
    }
    group.finish();
}

fn bench_periodic_builder(c: &mut Criterion) {
    let mut group = c.benchmark_group("periodic_builder");
    for &n in &[16usize, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| periodic_square(n))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_constrained_assembly, bench_periodic_builder);
criterion_main!(benches);

//! Benchmarks for the coarse solver hot loop.
//!
//! Run with: `cargo bench --bench benchmark_stepper`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustles::closure::{Closure, ClosureModel, ConvNet, NoClosure};
use rustles::field::VelocityField;
use rustles::grid::Grid;
use rustles::solver::{project, PoissonCg};
use rustles::stepper::{ProjectionOrder, Setup, Stepper, StepperState};

fn initial_field(grid: &Grid, seed: u64) -> VelocityField {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut vel = VelocityField::random(grid, 0.5, &mut rng);
    let poisson = PoissonCg::new(grid);
    project(&mut vel, &poisson, grid).unwrap();
    vel
}

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("step");
    group.sample_size(30);

    for n in [32usize, 64, 128] {
        let grid = Grid::new(n, n, 1., 1.).unwrap();
        let setup = Setup::new(grid.clone(), 1000., ProjectionOrder::DcfEveryStage).unwrap();
        let stepper = Stepper::new(&setup, 1e-3).unwrap();
        let u0 = initial_field(&grid, 1);
        let model = ClosureModel::from(NoClosure);
        let theta = Array1::zeros(0);

        group.bench_with_input(BenchmarkId::new("no_closure", n), &n, |b, _| {
            b.iter(|| {
                let mut state = StepperState {
                    velocity: u0.clone(),
                    time: 0.,
                };
                stepper
                    .step(black_box(&mut state), black_box(&model), black_box(&theta))
                    .unwrap();
            });
        });
    }
    group.finish();
}

fn bench_step_with_convnet(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_convnet");
    group.sample_size(20);

    let grid = Grid::new(64, 64, 1., 1.).unwrap();
    let setup = Setup::new(grid.clone(), 1000., ProjectionOrder::DcfEveryStage).unwrap();
    let stepper = Stepper::new(&setup, 1e-3).unwrap();
    let u0 = initial_field(&grid, 2);
    let net = ConvNet::default_architecture();
    let mut rng = StdRng::seed_from_u64(3);
    let theta = net.init_params(&mut rng);
    let model = ClosureModel::from(net);

    group.bench_function("forward", |b| {
        b.iter(|| {
            let mut state = StepperState {
                velocity: u0.clone(),
                time: 0.,
            };
            stepper
                .step(black_box(&mut state), black_box(&model), black_box(&theta))
                .unwrap();
        });
    });

    group.bench_function("forward_and_backward", |b| {
        b.iter(|| {
            let mut state = StepperState {
                velocity: u0.clone(),
                time: 0.,
            };
            let tape = stepper
                .step_with_tape(black_box(&mut state), &model, &theta)
                .unwrap();
            let mut bar = state.velocity.clone();
            let mut grad = Array1::zeros(theta.len());
            stepper
                .step_backward(&tape, &model, &theta, &mut bar, &mut grad)
                .unwrap();
        });
    });

    group.finish();
}

fn bench_pressure_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("pressure_solve");

    for n in [32usize, 64, 128] {
        let grid = Grid::new(n, n, 1., 1.).unwrap();
        let poisson = PoissonCg::new(&grid);
        let mut rng = StdRng::seed_from_u64(4);
        let vel = VelocityField::random(&grid, 1., &mut rng);

        group.bench_with_input(BenchmarkId::new("project", n), &n, |b, _| {
            b.iter(|| {
                let mut work = vel.clone();
                project(black_box(&mut work), &poisson, &grid).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_step, bench_step_with_convnet, bench_pressure_solve);
criterion_main!(benches);

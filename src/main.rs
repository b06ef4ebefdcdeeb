//! Run the full closure learning pipeline:
//!
//! cargo run --release --bin rustles
//!
//! Generates filtered datasets, trains the convolutional closure
//! a-priori and a-posteriori, tunes the Smagorinsky constant and
//! prints the evaluation table. Output lands in the `data` folder.
fn main() {
    use rustles::closure::{Closure, ClosureModel, ConvNet, NoClosure, Smagorinsky};
    use rustles::datagen::{dataset_path, generate_dataset, DnsConfig};
    use rustles::filter::FilterKind;
    use rustles::grid::Grid;
    use rustles::metrics::{posterior_error, prior_error_timed};
    use rustles::stepper::{ProjectionOrder, Setup};
    use rustles::training::dataset::{Dataset, TrajectoryData};
    use rustles::training::{
        fit_smagorinsky, train_post, train_prior, PostConfig, PriorConfig,
    };
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    // Data parameters
    let fine = Grid::new(128, 128, 1., 1.).unwrap();
    let n_coarse = 32;
    let re = 1000.;
    let train_seeds = [0, 1, 2];
    let valid_seeds = [3];
    let kinds = [FilterKind::FaceAverage, FilterKind::VolumeAverage];
    let outdir = "data";

    for &seed in train_seeds.iter().chain(valid_seeds.iter()) {
        let cfg = DnsConfig {
            grid: fine.clone(),
            re,
            dt: 1e-3,
            n_snapshots: 50,
            snapshot_every: 10,
            burn_in: 500,
            amplitude: 1.,
            seed,
        };
        generate_dataset(outdir, &cfg, &[n_coarse], &kinds).expect("data generation failed");
    }

    let coarse = fine.coarsen(fine.nx / n_coarse).unwrap();
    let load = |seeds: &[u64], kind: FilterKind| Dataset {
        trajectories: seeds
            .iter()
            .map(|&s| {
                let path = dataset_path(outdir, n_coarse, kind, s);
                TrajectoryData::read(&path, &coarse).expect("cannot read dataset")
            })
            .collect(),
    };

    // Checkpoint indices of the evaluation, in snapshot units
    let checkpoints = [10usize, 25, 49];
    let nsubstep = 2;

    for &kind in &kinds {
        let train = load(&train_seeds, kind);
        let valid = load(&valid_seeds, kind);
        println!("===== filter {} =====", kind.tag());

        // A-priori training of the convolutional closure
        let net = ConvNet::default_architecture();
        let mut rng = StdRng::seed_from_u64(100);
        let theta0 = net.init_params(&mut rng);
        let model = ClosureModel::from(net);
        let prior_cfg = PriorConfig {
            n_iterations: Some(2000),
            n_epochs: None,
            batch_size: 16,
            learning_rate: 1e-3,
            weight_decay: 1e-6,
            seed: 101,
            nupdate: 100,
            checkpoint: Some(format!("{}/convnet_prior_{}.h5", outdir, kind.tag())),
        };
        let prior_state = train_prior(&model, theta0, &train, &valid, &coarse, &prior_cfg)
            .expect("a-priori training failed");
        println!(
            "a-priori done: valid error {:5.3e}",
            prior_state.best_error
        );

        for &order in &[ProjectionOrder::DifLast, ProjectionOrder::DcfEveryStage] {
            let setup = Setup::new(coarse.clone(), re, order).unwrap();

            // A-posteriori fine tuning, starting from the a-priori fit
            let post_cfg = PostConfig {
                n_iterations: 500,
                batch_size: 2,
                nunroll: 5,
                nsubstep,
                learning_rate: 1e-4,
                weight_decay: 1e-6,
                seed: 102,
                nupdate: 25,
                checkpoint: Some(format!(
                    "{}/convnet_post_{}_{}.h5",
                    outdir,
                    kind.tag(),
                    order.tag()
                )),
            };
            let post_state = train_post(
                &model,
                prior_state.best_theta.clone(),
                &train,
                &valid,
                &setup,
                &post_cfg,
            )
            .expect("a-posteriori training failed");

            // Smagorinsky constant by grid search
            let candidates: Vec<f64> = (0..26).map(|i| 0.02 * i as f64).collect();
            let (smag_c, smag_err) =
                fit_smagorinsky(&setup, &train, *checkpoints.last().unwrap(), nsubstep, &candidates)
                    .expect("Smagorinsky search failed");
            println!(
                "smagorinsky ({}, {}): c = {:5.3}, train error {:5.3e}",
                kind.tag(),
                order.tag(),
                smag_c,
                smag_err
            );

            // Evaluation table over the validation trajectories
            let entries: Vec<(&str, ClosureModel, ndarray::Array1<f64>)> = vec![
                ("none", ClosureModel::from(NoClosure), ndarray::Array1::zeros(0)),
                (
                    "smagorinsky",
                    ClosureModel::from(Smagorinsky),
                    ndarray::array![smag_c],
                ),
                ("cnn-prior", model.clone(), prior_state.best_theta.clone()),
                ("cnn-post", model.clone(), post_state.best_theta.clone()),
            ];
            println!("model        prior      posterior at {:?}  seconds", checkpoints);
            for (name, m, theta) in &entries {
                let (ep, ep_secs) = prior_error_timed(m, theta, &valid, &coarse);
                let mut posts = Vec::new();
                let mut secs = ep_secs;
                for traj in &valid.trajectories {
                    match posterior_error(&setup, m, theta, traj, &checkpoints, nsubstep) {
                        Ok(report) => {
                            if posts.is_empty() {
                                posts = report.errors.clone();
                            } else {
                                for (a, b) in posts.iter_mut().zip(report.errors.iter()) {
                                    *a += b;
                                }
                            }
                            secs += report.wall_seconds;
                        }
                        Err(e) => {
                            println!("{:12} rollout failed: {}", name, e);
                            posts.clear();
                            break;
                        }
                    }
                }
                for p in &mut posts {
                    *p /= valid.trajectories.len() as f64;
                }
                println!(
                    "{:12} {:5.3e}  {:?}  {:6.2}",
                    name, ep, posts, secs
                );
            }
        }
    }
}

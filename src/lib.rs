//! # `rustles`: Neural closure models for large-eddy simulation
//!
//! # Dependencies
//! - cargo >= v1.49
//! - `hdf5` (sudo apt-get install -y libhdf5-dev)
//!
//! # Details
//!
//! This library implements the full pipeline for learning and
//! evaluating closure models of the incompressible Navier-Stokes
//! equations on a two dimensional periodic staggered grid:
//!
//! - fine grid simulations as ground truth, see [`datagen`]
//! - divergence consistent (face average) and divergence inconsistent
//!   (volume average) spatial filters, see [`filter`]
//! - closure models: no model, Smagorinsky, convolutional network,
//!   see [`closure`]
//! - a-priori (one step supervised) and a-posteriori (unrolled
//!   trajectory) trainers, see [`training`]
//! - relative error evaluators, see [`metrics`]
//!
//! The a-posteriori trainer differentiates through the Runge-Kutta
//! stepper and the pressure projection with hand written discrete
//! adjoints, see [`stepper`] and [`operators`].
//!
//! # Example
//! Generate a dataset and train the convolutional closure
//! ```ignore
//! use rustles::closure::{Closure, ClosureModel, ConvNet};
//! use rustles::datagen::{generate_dataset, DnsConfig};
//! use rustles::filter::FilterKind;
//! use rustles::grid::Grid;
//! use rustles::stepper::{ProjectionOrder, Setup};
//! use rustles::training::dataset::{Dataset, TrajectoryData};
//! use rustles::training::{train_post, PostConfig};
//!
//! fn main() {
//!     let fine = Grid::new(256, 256, 1., 1.).unwrap();
//!     let cfg = DnsConfig {
//!         grid: fine.clone(),
//!         re: 2000.,
//!         dt: 5e-4,
//!         n_snapshots: 100,
//!         snapshot_every: 10,
//!         burn_in: 1000,
//!         amplitude: 1.,
//!         seed: 0,
//!     };
//!     let paths = generate_dataset("data", &cfg, &[64], &[FilterKind::FaceAverage]).unwrap();
//!     let coarse = fine.coarsen(4).unwrap();
//!     let data = Dataset {
//!         trajectories: paths
//!             .iter()
//!             .map(|p| TrajectoryData::read(p, &coarse).unwrap())
//!             .collect(),
//!     };
//!     let net = ConvNet::default_architecture();
//!     let mut rng = rand::SeedableRng::seed_from_u64(1);
//!     let theta0 = net.init_params(&mut rng);
//!     let model = ClosureModel::from(net);
//!     let setup = Setup::new(coarse, 2000., ProjectionOrder::DcfEveryStage).unwrap();
//!     let cfg = PostConfig {
//!         n_iterations: 1000,
//!         batch_size: 4,
//!         nunroll: 5,
//!         nsubstep: 2,
//!         learning_rate: 1e-3,
//!         weight_decay: 0.,
//!         seed: 2,
//!         nupdate: 50,
//!         checkpoint: Some("data/convnet_post.h5".to_owned()),
//!     };
//!     let state = rustles::training::train_post(&model, theta0, &data, &data, &setup, &cfg).unwrap();
//!     println!("best validation error {:5.3e}", state.best_error);
//! }
//! ```
//!
//! ## Documentation
//!
//! Download and run:
//!
//! `cargo doc --open`
#![warn(missing_docs)]
#![allow(clippy::unnecessary_cast)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#[macro_use]
extern crate enum_dispatch;
pub mod closure;
pub mod datagen;
pub mod error;
pub mod field;
pub mod filter;
pub mod grid;
pub mod io;
pub mod metrics;
pub mod operators;
pub mod solver;
pub mod stepper;
pub mod training;

pub use error::{Error, Result};

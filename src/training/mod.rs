//! # Closure model training
//!
//! Two trainers share the same state container and checkpoint format:
//!
//! - [`a_priori`]: supervised one step fit of the closure output
//!   against stored commutator labels,
//! - [`a_posteriori`]: unrolled trajectory fit, with the gradient
//!   propagated through the stepper and the pressure projection.
//!
//! The Smagorinsky constant is a special case: a single scalar tuned by
//! [`fit_smagorinsky`] grid search over the a-posteriori error.
pub mod a_posteriori;
pub mod a_priori;
pub mod adam;
pub mod dataset;

use crate::closure::{ClosureModel, Smagorinsky};
use crate::error::{Error, Result};
use crate::io::{read_from_hdf5, read_scalar_from_hdf5, replace_file, write_scalar_to_hdf5, write_to_hdf5};
use crate::metrics::posterior_error;
use crate::stepper::Setup;
use adam::Adam;
use dataset::Dataset;
use ndarray::{array, Array1};

pub use a_posteriori::{train_post, PostConfig};
pub use a_priori::{train_prior, PriorConfig};

/// Mutable state shared by both trainers
#[derive(Clone, Debug)]
pub struct TrainingState {
    /// Current parameter vector
    pub theta: Array1<f64>,
    /// Optimizer with its moment estimates
    pub opt: Adam,
    /// Completed iterations
    pub iteration: usize,
    /// Validation history, `(iteration, error)`
    pub history: Vec<(usize, f64)>,
    /// Parameters of the best validation error so far
    pub best_theta: Array1<f64>,
    /// Best validation error so far
    pub best_error: f64,
}

impl TrainingState {
    /// Fresh state around an initial parameter vector
    pub fn new(theta: Array1<f64>, learning_rate: f64) -> Self {
        let opt = Adam::new(learning_rate, theta.len());
        Self {
            best_theta: theta.clone(),
            theta,
            opt,
            iteration: 0,
            history: Vec::new(),
            best_error: f64::INFINITY,
        }
    }

    /// Record a validation error and keep the best parameters
    pub fn record_validation(&mut self, error: f64) {
        self.history.push((self.iteration, error));
        if error < self.best_error {
            self.best_error = error;
            self.best_theta = self.theta.clone();
        }
    }

    /// Write a checkpoint, via a temporary file and an atomic rename
    ///
    /// # Errors
    /// File system or hdf5 failures.
    pub fn checkpoint(&self, path: &str) -> Result<()> {
        let tmp = format!("{}.tmp", path);
        let _ = std::fs::remove_file(&tmp);
        write_to_hdf5(&tmp, "theta", &self.theta)?;
        write_to_hdf5(&tmp, "best_theta", &self.best_theta)?;
        let (m, v, t) = self.opt.state();
        write_to_hdf5(&tmp, "adam_m", m)?;
        write_to_hdf5(&tmp, "adam_v", v)?;
        write_scalar_to_hdf5(&tmp, "adam_t", t)?;
        write_scalar_to_hdf5(&tmp, "iteration", self.iteration as i64)?;
        write_scalar_to_hdf5(&tmp, "best_error", self.best_error)?;
        let iters: Array1<i64> = self.history.iter().map(|(i, _)| *i as i64).collect();
        let errs: Array1<f64> = self.history.iter().map(|(_, e)| *e).collect();
        write_to_hdf5(&tmp, "history_iteration", &iters)?;
        write_to_hdf5(&tmp, "history_error", &errs)?;
        replace_file(&tmp, path)
    }

    /// Restore a checkpoint written by [`Self::checkpoint`]
    ///
    /// # Errors
    /// Missing file or variables.
    pub fn restore(path: &str, learning_rate: f64) -> Result<Self> {
        let theta: Array1<f64> = read_from_hdf5(path, "theta")?;
        let best_theta: Array1<f64> = read_from_hdf5(path, "best_theta")?;
        let m: Array1<f64> = read_from_hdf5(path, "adam_m")?;
        let v: Array1<f64> = read_from_hdf5(path, "adam_v")?;
        let t: i32 = read_scalar_from_hdf5(path, "adam_t")?;
        let iteration: i64 = read_scalar_from_hdf5(path, "iteration")?;
        let best_error: f64 = read_scalar_from_hdf5(path, "best_error")?;
        let iters: Array1<i64> = read_from_hdf5(path, "history_iteration")?;
        let errs: Array1<f64> = read_from_hdf5(path, "history_error")?;
        let mut opt = Adam::new(learning_rate, theta.len());
        opt.restore(m, v, t);
        Ok(Self {
            theta,
            opt,
            iteration: iteration as usize,
            history: iters
                .iter()
                .zip(errs.iter())
                .map(|(i, e)| (*i as usize, *e))
                .collect(),
            best_theta,
            best_error,
        })
    }
}

/// One dimensional grid search for the Smagorinsky constant over the
/// a-posteriori error at the last checkpoint
///
/// Candidates whose rollout leaves the finite range are skipped.
/// Returns the best `(constant, error)` pair.
///
/// # Errors
/// Empty candidate list, or every candidate rollout diverged.
pub fn fit_smagorinsky(
    setup: &Setup,
    data: &Dataset,
    checkpoint: usize,
    nsubstep: usize,
    candidates: &[f64],
) -> Result<(f64, f64)> {
    if candidates.is_empty() {
        return Err(Error::Config("no Smagorinsky candidates given".to_owned()));
    }
    let model = ClosureModel::from(Smagorinsky);
    let mut best: Option<(f64, f64)> = None;
    for &c in candidates {
        let theta = array![c];
        let mut acc = 0.;
        let mut ok = true;
        for traj in &data.trajectories {
            match posterior_error(setup, &model, &theta, traj, &[checkpoint], nsubstep) {
                Ok(report) => acc += report.errors[0],
                Err(Error::NonFinite { .. }) | Err(Error::PressureDiverged { .. }) => {
                    ok = false;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        if !ok {
            println!("smagorinsky: candidate {:5.3} diverged, skipped", c);
            continue;
        }
        let error = acc / data.trajectories.len() as f64;
        println!("smagorinsky: candidate {:5.3} error {:5.3e}", c, error);
        if best.map_or(true, |(_, e)| error < e) {
            best = Some((c, error));
        }
    }
    best.ok_or_else(|| Error::Config("every Smagorinsky candidate diverged".to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn checkpoint_round_trips_the_full_state() {
        let mut rng = StdRng::seed_from_u64(51);
        let theta: Array1<f64> = (0..7).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut state = TrainingState::new(theta, 1e-3);
        let grad: Array1<f64> = (0..7).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut theta = state.theta.clone();
        state.opt.step(&mut theta, &grad);
        state.theta = theta;
        state.iteration = 42;
        state.record_validation(0.37);

        let dir = std::env::temp_dir().join("rustles_checkpoint_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.h5");
        let path = path.to_str().unwrap();
        let _ = std::fs::remove_file(path);

        state.checkpoint(path).unwrap();
        let back = TrainingState::restore(path, 1e-3).unwrap();
        assert_eq!(back.theta, state.theta);
        assert_eq!(back.best_theta, state.best_theta);
        assert_eq!(back.iteration, 42);
        assert_eq!(back.history, vec![(42, 0.37)]);
        assert_eq!(back.best_error, 0.37);

        // the optimizer must continue identically after the restore
        let mut ta = state.theta.clone();
        let mut tb = back.theta.clone();
        let mut oa = state.opt.clone();
        let mut ob = back.opt;
        oa.step(&mut ta, &grad);
        ob.step(&mut tb, &grad);
        assert_eq!(ta, tb);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn checkpoint_never_leaves_a_temporary_behind() {
        let state = TrainingState::new(Array1::zeros(3), 1e-3);
        let dir = std::env::temp_dir().join("rustles_checkpoint_tmp_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.h5");
        let path = path.to_str().unwrap();
        let _ = std::fs::remove_file(path);
        state.checkpoint(path).unwrap();
        assert!(std::path::Path::new(path).exists());
        assert!(!std::path::Path::new(&format!("{}.tmp", path)).exists());
        std::fs::remove_file(path).unwrap();
    }
}

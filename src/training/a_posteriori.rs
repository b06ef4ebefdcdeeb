//! A-posteriori trainer: unrolled trajectory fit
//!
//! Starts the coarse solver from a stored snapshot, unrolls a short
//! window with the closure attached and penalizes the relative
//! deviation from the reference snapshots. The gradient flows through
//! every stage of the stepper, the pressure projection included, via
//! the taped reverse sweep of [`crate::stepper`].
use super::dataset::Dataset;
use super::TrainingState;
use crate::closure::{Closure, ClosureModel};
use crate::error::{Error, Result};
use crate::field::VelocityField;
use crate::metrics::posterior_error;
use crate::stepper::{Setup, Stepper, StepperState, StepTape};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// A-posteriori training configuration
#[derive(Clone, Debug)]
pub struct PostConfig {
    /// Optimizer iterations
    pub n_iterations: usize,
    /// Unroll windows per gradient estimate
    pub batch_size: usize,
    /// Reference snapshots per window
    pub nunroll: usize,
    /// Stepper steps per snapshot interval
    pub nsubstep: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// L2 penalty on the parameter vector
    pub weight_decay: f64,
    /// Seed of the window sampling stream
    pub seed: u64,
    /// Validate (and checkpoint) every this many iterations
    pub nupdate: usize,
    /// Checkpoint file, written at every validation when set
    pub checkpoint: Option<String>,
}

impl PostConfig {
    fn validate(&self, model: &ClosureModel, train: &Dataset, valid: &Dataset) -> Result<()> {
        if !model.trainable() {
            return Err(Error::Config(
                "closure model provides no parameter gradient".to_owned(),
            ));
        }
        if self.n_iterations == 0
            || self.batch_size == 0
            || self.nunroll == 0
            || self.nsubstep == 0
            || self.nupdate == 0
        {
            return Err(Error::Config(
                "iteration, batch, unroll and validation budgets must be positive".to_owned(),
            ));
        }
        if self.learning_rate <= 0. || self.weight_decay < 0. {
            return Err(Error::Config(format!(
                "bad optimizer constants: lr {}, weight decay {}",
                self.learning_rate, self.weight_decay
            )));
        }
        for traj in &train.trajectories {
            if traj.n_snapshots() <= self.nunroll {
                return Err(Error::Config(format!(
                    "trajectory of {} snapshots cannot hold an unroll window of {}",
                    traj.n_snapshots(),
                    self.nunroll
                )));
            }
        }
        if train.trajectories.is_empty() {
            return Err(Error::Config("empty training dataset".to_owned()));
        }
        if valid.trajectories.is_empty() {
            return Err(Error::Config("empty validation dataset".to_owned()));
        }
        Ok(())
    }
}

/// Loss and gradient of one unroll window
///
/// Returns `None` when the window leaves the finite range; such windows
/// are skipped and counted by the caller. Other failures propagate.
fn window_gradient(
    stepper: &Stepper,
    model: &ClosureModel,
    theta: &Array1<f64>,
    reference: &[VelocityField],
    t0: f64,
    nsubstep: usize,
    grad: &mut Array1<f64>,
) -> Result<Option<f64>> {
    let nunroll = reference.len() - 1;
    let mut state = StepperState {
        velocity: reference[0].clone(),
        time: t0,
    };
    let mut tapes: Vec<StepTape> = Vec::with_capacity(nunroll * nsubstep);
    let mut predicted: Vec<VelocityField> = Vec::with_capacity(nunroll);
    for _ in 0..nunroll {
        for _ in 0..nsubstep {
            match stepper.step_with_tape(&mut state, model, theta) {
                Ok(tape) => tapes.push(tape),
                Err(Error::NonFinite { .. }) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        predicted.push(state.velocity.clone());
    }

    let mut loss = 0.;
    let mut window_grad: Array1<f64> = Array1::zeros(theta.len());
    let mut bar = VelocityField {
        u: ndarray::Array2::zeros(reference[0].u.raw_dim()),
        v: ndarray::Array2::zeros(reference[0].v.raw_dim()),
    };
    for j in (1..=nunroll).rev() {
        let refj = &reference[j];
        let diff = predicted[j - 1].sub(refj);
        let den = refj.norm_sqr();
        loss += diff.norm_sqr() / den;
        bar.axpy(2. / den, &diff);
        for tape in tapes[(j - 1) * nsubstep..j * nsubstep].iter().rev() {
            stepper.step_backward(tape, model, theta, &mut bar, &mut window_grad)?;
        }
    }
    if !loss.is_finite() {
        return Ok(None);
    }
    grad.scaled_add(1., &window_grad);
    Ok(Some(loss))
}

/// Run the a-posteriori trainer from `theta0`
///
/// Windows are drawn from a generator seeded with `cfg.seed` only.
/// Windows that diverge during the unroll are skipped and reported;
/// an iteration in which every window diverges is fatal.
///
/// # Errors
/// Invalid configuration, a model without a parameter gradient, a fully
/// diverged batch, or solver failures.
pub fn train_post(
    model: &ClosureModel,
    theta0: Array1<f64>,
    train: &Dataset,
    valid: &Dataset,
    setup: &Setup,
    cfg: &PostConfig,
) -> Result<TrainingState> {
    cfg.validate(model, train, valid)?;
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut state = TrainingState::new(theta0, cfg.learning_rate);

    for iter in 1..=cfg.n_iterations {
        let windows = train.sample_windows(cfg.batch_size, cfg.nunroll, &mut rng);
        let mut grad: Array1<f64> = Array1::zeros(state.theta.len());
        let mut loss = 0.;
        let mut n_ok = 0usize;
        for (t, start) in windows {
            let traj = &train.trajectories[t];
            let stepper = Stepper::new(setup, traj.dt() / cfg.nsubstep as f64)?;
            let reference = &traj.velocity[start..=start + cfg.nunroll];
            match window_gradient(
                &stepper,
                model,
                &state.theta,
                reference,
                traj.time[start],
                cfg.nsubstep,
                &mut grad,
            )? {
                Some(l) => {
                    loss += l;
                    n_ok += 1;
                }
                None => {}
            }
        }
        if n_ok == 0 {
            return Err(Error::NonFinite {
                context: "a-posteriori unroll (every window diverged)".to_owned(),
                time: iter as f64,
            });
        }
        let n_skipped = cfg.batch_size - n_ok;
        grad.mapv_inplace(|g| g / n_ok as f64);
        loss /= n_ok as f64;
        if cfg.weight_decay > 0. {
            loss += cfg.weight_decay * state.theta.dot(&state.theta);
            grad.scaled_add(2. * cfg.weight_decay, &state.theta);
        }

        let mut theta = state.theta.clone();
        state.opt.step(&mut theta, &grad);
        state.theta = theta;
        state.iteration = iter;

        if iter % cfg.nupdate == 0 {
            let v = validation_error(model, &state.theta, valid, setup, cfg);
            state.record_validation(v);
            println!(
                "posteriori: iter {:6} loss {:5.3e} valid {:5.3e} skipped {}",
                iter, loss, v, n_skipped
            );
            if let Some(path) = &cfg.checkpoint {
                state.checkpoint(path)?;
            }
        }
    }
    Ok(state)
}

/// Mean a-posteriori error over the validation trajectories; a
/// diverging validation rollout scores infinity instead of aborting
/// the training run
fn validation_error(
    model: &ClosureModel,
    theta: &Array1<f64>,
    valid: &Dataset,
    setup: &Setup,
    cfg: &PostConfig,
) -> f64 {
    let mut acc = 0.;
    for traj in &valid.trajectories {
        match posterior_error(setup, model, theta, traj, &[cfg.nunroll], cfg.nsubstep) {
            Ok(report) => acc += report.errors[0],
            Err(_) => return f64::INFINITY,
        }
    }
    acc / valid.trajectories.len() as f64
}

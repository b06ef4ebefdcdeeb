//! # A-priori and a-posteriori closure quality measures
//!
//! The a-priori error compares the closure output against the stored
//! commutator labels, snapshot by snapshot, without ever running the
//! coarse solver. The a-posteriori error rolls the coarse solver with
//! the closure attached and reports, at each requested checkpoint `i`,
//! the running time average
//! $$
//! e_i = \frac{1}{i} \sum_{j=1}^{i}
//!       \frac{ \| u_j - u_j^{ref} \| }{ \| u_j^{ref} \| }
//! $$
//! of the instantaneous relative errors at the snapshot instants.
use crate::closure::{Closure, ClosureModel};
use crate::error::{Error, Result};
use crate::field::VelocityField;
use crate::grid::Grid;
use crate::stepper::{Setup, Stepper, StepperState};
use crate::training::dataset::{Dataset, TrajectoryData};
use ndarray::Array1;
use std::time::Instant;

/// Relative magnitude of the closure prediction error over a dataset,
/// `sqrt(sum |m - c|^2) / sqrt(sum |c|^2)`
pub fn prior_error(
    model: &ClosureModel,
    theta: &Array1<f64>,
    data: &Dataset,
    grid: &Grid,
) -> f64 {
    let mut num = 0.;
    let mut den = 0.;
    for traj in &data.trajectories {
        for (vel, label) in traj.velocity.iter().zip(traj.commutator.iter()) {
            let pred = model.apply(vel, theta, grid);
            num += pred.sub(label).norm_sqr();
            den += label.norm_sqr();
        }
    }
    (num / den).sqrt()
}

/// [`prior_error`] together with the wall clock seconds spent on the
/// closure evaluations
pub fn prior_error_timed(
    model: &ClosureModel,
    theta: &Array1<f64>,
    data: &Dataset,
    grid: &Grid,
) -> (f64, f64) {
    let clock = Instant::now();
    let error = prior_error(model, theta, data, grid);
    (error, clock.elapsed().as_secs_f64())
}

/// Running time average of instantaneous relative errors, evaluated at
/// the given checkpoint indices (`1` = first snapshot after the start)
///
/// # Errors
/// Mismatched trajectory lengths, a zero norm reference snapshot, or
/// checkpoints that are not strictly increasing or fall outside
/// `1..rollout.len()`.
pub fn cumulative_relative_error(
    rollout: &[VelocityField],
    reference: &[VelocityField],
    checkpoints: &[usize],
) -> Result<Vec<f64>> {
    if rollout.len() != reference.len() {
        return Err(Error::Config(format!(
            "rollout has {} snapshots, reference {}",
            rollout.len(),
            reference.len()
        )));
    }
    validate_checkpoints(checkpoints, reference.len())?;

    let mut errors = Vec::with_capacity(checkpoints.len());
    let mut acc = 0.;
    let mut next = 0;
    for i in 1..=*checkpoints.last().unwrap() {
        let den = reference[i].norm_l2();
        if den == 0. {
            return Err(Error::Config(format!(
                "reference snapshot {} has zero norm",
                i
            )));
        }
        acc += rollout[i].sub(&reference[i]).norm_l2() / den;
        if checkpoints[next] == i {
            errors.push(acc / i as f64);
            next += 1;
        }
    }
    Ok(errors)
}

/// Rollout timings and checkpoint errors of one a-posteriori evaluation
#[derive(Clone, Debug)]
pub struct PosteriorReport {
    /// Checkpoint indices in snapshot units
    pub checkpoints: Vec<usize>,
    /// Cumulative time averaged relative error at each checkpoint
    pub errors: Vec<f64>,
    /// Wall clock seconds spent in the rollout
    pub wall_seconds: f64,
}

/// Roll the coarse solver with the closure attached along a reference
/// trajectory and measure the checkpoint errors
///
/// Each snapshot interval is integrated with `nsubstep` stepper steps.
/// Checkpoints are validated before the rollout starts.
///
/// # Errors
/// Invalid checkpoints or `nsubstep`, or any stepper failure.
pub fn posterior_error(
    setup: &Setup,
    model: &ClosureModel,
    theta: &Array1<f64>,
    traj: &TrajectoryData,
    checkpoints: &[usize],
    nsubstep: usize,
) -> Result<PosteriorReport> {
    validate_checkpoints(checkpoints, traj.n_snapshots())?;
    if nsubstep == 0 {
        return Err(Error::Config("nsubstep must be at least 1".to_owned()));
    }
    let dt = traj.dt() / nsubstep as f64;
    let stepper = Stepper::new(setup, dt)?;
    let last = *checkpoints.last().unwrap();

    let clock = Instant::now();
    let mut state = StepperState {
        velocity: traj.velocity[0].clone(),
        time: traj.time[0],
    };
    let mut rollout = vec![state.velocity.clone()];
    for _ in 0..last {
        for _ in 0..nsubstep {
            stepper.step(&mut state, model, theta)?;
        }
        rollout.push(state.velocity.clone());
    }
    let wall_seconds = clock.elapsed().as_secs_f64();

    let errors =
        cumulative_relative_error(&rollout, &traj.velocity[..=last], checkpoints)?;
    Ok(PosteriorReport {
        checkpoints: checkpoints.to_vec(),
        errors,
        wall_seconds,
    })
}

fn validate_checkpoints(checkpoints: &[usize], n_snapshots: usize) -> Result<()> {
    if checkpoints.is_empty() {
        return Err(Error::Config("no checkpoints requested".to_owned()));
    }
    let mut prev = 0;
    for &c in checkpoints {
        if c <= prev {
            return Err(Error::Config(format!(
                "checkpoints must be strictly increasing and positive, got {:?}",
                checkpoints
            )));
        }
        if c >= n_snapshots {
            return Err(Error::Config(format!(
                "checkpoint {} outside trajectory of {} snapshots",
                c, n_snapshots
            )));
        }
        prev = c;
    }
    Ok(())
}

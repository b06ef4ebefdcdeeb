//! # Explicit Runge-Kutta time stepper with pressure projection
//!
//! One step advances the velocity by the convective/diffusive momentum
//! operator plus the attached closure correction, stage by stage, with
//! the incompressibility projection applied according to the
//! [`ProjectionOrder`] policy:
//!
//! - [`ProjectionOrder::DcfEveryStage`]: every stage velocity is
//!   projected (divergence consistent formulation),
//! - [`ProjectionOrder::DifLast`]: only the final stage combination is
//!   projected (divergence inconsistent formulation).
//!
//! The policy is part of the immutable [`Setup`] and therefore uniform
//! within a rollout.
//!
//! [`Stepper::step_with_tape`] records the stage velocities and closure
//! caches of one step; [`Stepper::step_backward`] replays them in
//! reverse, turning the step into its exact discrete adjoint. The
//! projection is self adjoint (see [`crate::solver`]), so the reverse
//! sweep calls the forward projection on the cotangent.
use crate::closure::{Closure, ClosureCache, ClosureModel};
use crate::error::{Error, Result};
use crate::field::VelocityField;
use crate::grid::Grid;
use crate::operators::{momentum, momentum_vjp};
use crate::solver::{project, PoissonCg};
use ndarray::Array1;

/// When the projection is applied relative to stage combination
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectionOrder {
    /// Project only the final stage combination
    DifLast,
    /// Project every stage velocity
    DcfEveryStage,
}

impl ProjectionOrder {
    /// Short tag used in file names and log lines
    pub fn tag(&self) -> &'static str {
        match self {
            Self::DifLast => "dif",
            Self::DcfEveryStage => "dcf",
        }
    }
}

/// Butcher tableau of an explicit Runge-Kutta scheme
#[derive(Clone, Debug)]
pub struct Tableau {
    /// Stage coefficients, `a[i]` builds stage `i + 1` from rhs `0..=i`
    pub a: Vec<Vec<f64>>,
    /// Output weights
    pub b: Vec<f64>,
}

impl Tableau {
    /// Classical fourth order scheme
    pub fn rk44() -> Self {
        Self {
            a: vec![vec![0.5], vec![0., 0.5], vec![0., 0., 1.]],
            b: vec![1. / 6., 1. / 3., 1. / 3., 1. / 6.],
        }
    }

    /// Number of stages
    pub fn n_stages(&self) -> usize {
        self.b.len()
    }
}

/// Immutable configuration bundle shared by every stepper invocation
#[derive(Clone, Debug)]
pub struct Setup {
    /// Grid geometry
    pub grid: Grid,
    /// Reynolds number
    pub re: f64,
    /// Projection order policy
    pub order: ProjectionOrder,
}

impl Setup {
    /// Validate and build a setup
    ///
    /// # Errors
    /// Non-positive Reynolds number.
    pub fn new(grid: Grid, re: f64, order: ProjectionOrder) -> Result<Self> {
        if re <= 0. {
            return Err(Error::Config(format!(
                "Reynolds number must be positive, got {}",
                re
            )));
        }
        Ok(Self { grid, re, order })
    }

    /// Kinematic viscosity
    pub fn visc(&self) -> f64 {
        1. / self.re
    }
}

/// Mutable state owned by a single rollout
#[derive(Clone, Debug)]
pub struct StepperState {
    /// Current velocity field
    pub velocity: VelocityField,
    /// Current time
    pub time: f64,
}

/// Intermediates of one taped step, consumed by the reverse sweep
pub struct StepTape {
    stages: Vec<VelocityField>,
    caches: Vec<ClosureCache>,
}

/// Runge-Kutta stepper bound to one setup
pub struct Stepper<'a> {
    /// Shared immutable configuration
    pub setup: &'a Setup,
    /// Step size
    pub dt: f64,
    /// Runge-Kutta coefficients
    pub tableau: Tableau,
    poisson: PoissonCg,
}

impl<'a> Stepper<'a> {
    /// New stepper with the classical fourth order tableau
    ///
    /// # Errors
    /// Non-positive step size.
    pub fn new(setup: &'a Setup, dt: f64) -> Result<Self> {
        if dt <= 0. {
            return Err(Error::Config(format!(
                "step size must be positive, got {}",
                dt
            )));
        }
        Ok(Self {
            setup,
            dt,
            tableau: Tableau::rk44(),
            poisson: PoissonCg::new(&setup.grid),
        })
    }

    fn grid(&self) -> &Grid {
        &self.setup.grid
    }

    /// Advance the state by one step
    ///
    /// # Errors
    /// Non-finite velocity before or after the step, pressure solve
    /// divergence.
    pub fn step(
        &self,
        state: &mut StepperState,
        model: &ClosureModel,
        theta: &Array1<f64>,
    ) -> Result<()> {
        self.step_impl(state, model, theta, None)
    }

    /// Advance the state by one step, recording the tape for the
    /// reverse sweep
    ///
    /// # Errors
    /// Same conditions as [`Self::step`].
    pub fn step_with_tape(
        &self,
        state: &mut StepperState,
        model: &ClosureModel,
        theta: &Array1<f64>,
    ) -> Result<StepTape> {
        let mut tape = StepTape {
            stages: Vec::with_capacity(self.tableau.n_stages()),
            caches: Vec::with_capacity(self.tableau.n_stages()),
        };
        self.step_impl(state, model, theta, Some(&mut tape))?;
        Ok(tape)
    }

    fn step_impl(
        &self,
        state: &mut StepperState,
        model: &ClosureModel,
        theta: &Array1<f64>,
        mut tape: Option<&mut StepTape>,
    ) -> Result<()> {
        if !state.velocity.is_finite() {
            return Err(Error::NonFinite {
                context: "stepper input".to_owned(),
                time: state.time,
            });
        }
        let grid = self.grid();
        let visc = self.setup.visc();
        let s = self.tableau.n_stages();

        let u0 = state.velocity.clone();
        let mut u_stage = u0.clone();
        let mut rhs: Vec<VelocityField> = Vec::with_capacity(s);

        for i in 0..s {
            // momentum rhs plus closure correction at the stage velocity
            let mut f = momentum(&u_stage, visc, grid);
            if let Some(t) = tape.as_deref_mut() {
                let (correction, cache) = model.apply_with_cache(&u_stage, theta, grid);
                f.axpy(1., &correction);
                t.stages.push(u_stage.clone());
                t.caches.push(cache);
            } else {
                f.axpy(1., &model.apply(&u_stage, theta, grid));
            }
            rhs.push(f);

            if i + 1 < s {
                let mut next = u0.clone();
                for (j, fj) in rhs.iter().enumerate() {
                    let a = self.tableau.a[i][j];
                    if a != 0. {
                        next.axpy(self.dt * a, fj);
                    }
                }
                if self.setup.order == ProjectionOrder::DcfEveryStage {
                    project(&mut next, &self.poisson, grid)?;
                }
                if !next.is_finite() {
                    return Err(Error::NonFinite {
                        context: format!("stepper stage {}", i + 1),
                        time: state.time,
                    });
                }
                u_stage = next;
            }
        }

        let mut out = u0;
        for (j, fj) in rhs.iter().enumerate() {
            out.axpy(self.dt * self.tableau.b[j], fj);
        }
        // final combination is projected in both formulations
        project(&mut out, &self.poisson, grid)?;

        if !out.is_finite() {
            return Err(Error::NonFinite {
                context: "stepper output".to_owned(),
                time: state.time + self.dt,
            });
        }
        state.velocity = out;
        state.time += self.dt;
        Ok(())
    }

    /// Reverse sweep of one taped step: transform the cotangent of the
    /// step output (`bar`, in place) into the cotangent of the step
    /// input and accumulate the parameter gradient.
    ///
    /// # Errors
    /// Pressure solve divergence in an adjoint projection.
    pub fn step_backward(
        &self,
        tape: &StepTape,
        model: &ClosureModel,
        theta: &Array1<f64>,
        bar: &mut VelocityField,
        grad_theta: &mut Array1<f64>,
    ) -> Result<()> {
        let grid = self.grid();
        let visc = self.setup.visc();
        let s = self.tableau.n_stages();

        // adjoint of the final projection
        project(bar, &self.poisson, grid)?;

        let mut ubar0 = bar.clone();
        let mut rhs_bar: Vec<VelocityField> = (0..s)
            .map(|j| {
                let mut f = bar.clone();
                f.scale(self.dt * self.tableau.b[j]);
                f
            })
            .collect();

        for i in (0..s).rev() {
            // cotangent of the stage velocity through rhs_i
            let mut ubar_i = momentum_vjp(&tape.stages[i], &rhs_bar[i], visc, grid);
            let from_model = model.vjp(theta, grid, &tape.caches[i], &rhs_bar[i], grad_theta);
            ubar_i.axpy(1., &from_model);

            if i > 0 {
                if self.setup.order == ProjectionOrder::DcfEveryStage {
                    project(&mut ubar_i, &self.poisson, grid)?;
                }
                ubar0.axpy(1., &ubar_i);
                for (j, fbar) in rhs_bar.iter_mut().take(i).enumerate() {
                    let a = self.tableau.a[i - 1][j];
                    if a != 0. {
                        fbar.axpy(self.dt * a, &ubar_i);
                    }
                }
            } else {
                ubar0.axpy(1., &ubar_i);
            }
        }
        *bar = ubar0;
        Ok(())
    }

    /// Roll out `nsteps` steps from a fresh state; returns the full
    /// trajectory including the initial field.
    ///
    /// # Errors
    /// Any step failure, annotated with `context`.
    pub fn rollout(
        &self,
        initial: &VelocityField,
        t0: f64,
        nsteps: usize,
        model: &ClosureModel,
        theta: &Array1<f64>,
        context: &str,
    ) -> Result<Vec<VelocityField>> {
        let mut state = StepperState {
            velocity: initial.clone(),
            time: t0,
        };
        let mut trajectory = Vec::with_capacity(nsteps + 1);
        trajectory.push(state.velocity.clone());
        for _ in 0..nsteps {
            self.step(&mut state, model, theta).map_err(|e| match e {
                Error::NonFinite { time, .. } => Error::NonFinite {
                    context: context.to_owned(),
                    time,
                },
                other => other,
            })?;
            trajectory.push(state.velocity.clone());
        }
        Ok(trajectory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure::{Activation, ConvNet, ConvSpec, NoClosure};
    use crate::operators::divergence;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_setup(order: ProjectionOrder) -> Setup {
        let grid = Grid::new(8, 8, 1., 1.).unwrap();
        Setup::new(grid, 100., order).unwrap()
    }

    fn divergence_free_field(grid: &Grid, seed: u64) -> VelocityField {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut vel = VelocityField::random(grid, 0.5, &mut rng);
        let solver = PoissonCg::new(grid);
        project(&mut vel, &solver, grid).unwrap();
        vel
    }

    #[test]
    fn no_closure_rollout_matches_a_closure_free_stepper() {
        let setup = small_setup(ProjectionOrder::DcfEveryStage);
        let stepper = Stepper::new(&setup, 0.01).unwrap();
        let u0 = divergence_free_field(&setup.grid, 21);

        let model = ClosureModel::from(NoClosure);
        let theta = Array1::zeros(0);
        let with_model = stepper
            .rollout(&u0, 0., 5, &model, &theta, "test")
            .unwrap();

        // hand written step without any closure term
        let grid = &setup.grid;
        let visc = setup.visc();
        let poisson = PoissonCg::new(grid);
        let tableau = Tableau::rk44();
        let mut u = u0.clone();
        let mut plain = vec![u.clone()];
        for _ in 0..5 {
            let base = u.clone();
            let mut stage = base.clone();
            let mut rhs = Vec::new();
            for i in 0..tableau.n_stages() {
                rhs.push(momentum(&stage, visc, grid));
                if i + 1 < tableau.n_stages() {
                    let mut next = base.clone();
                    for (j, fj) in rhs.iter().enumerate() {
                        if tableau.a[i][j] != 0. {
                            next.axpy(0.01 * tableau.a[i][j], fj);
                        }
                    }
                    project(&mut next, &poisson, grid).unwrap();
                    stage = next;
                }
            }
            let mut out = base;
            for (j, fj) in rhs.iter().enumerate() {
                out.axpy(0.01 * tableau.b[j], fj);
            }
            project(&mut out, &poisson, grid).unwrap();
            u = out;
            plain.push(u.clone());
        }

        for (a, b) in with_model.iter().zip(plain.iter()) {
            assert_eq!(a.u, b.u);
            assert_eq!(a.v, b.v);
        }
    }

    #[test]
    fn steps_preserve_divergence_freedom() {
        for order in [ProjectionOrder::DifLast, ProjectionOrder::DcfEveryStage] {
            let setup = small_setup(order);
            let stepper = Stepper::new(&setup, 0.01).unwrap();
            let u0 = divergence_free_field(&setup.grid, 22);
            let model = ClosureModel::from(NoClosure);
            let theta = Array1::zeros(0);
            let traj = stepper
                .rollout(&u0, 0., 4, &model, &theta, "test")
                .unwrap();
            for vel in &traj {
                let div = divergence(vel, &setup.grid);
                let norm = div.iter().map(|x| x * x).sum::<f64>().sqrt();
                assert!(norm < 1e-9, "divergence {} under {:?}", norm, order);
            }
        }
    }

    #[test]
    fn nan_input_is_rejected_before_stepping() {
        let setup = small_setup(ProjectionOrder::DcfEveryStage);
        let stepper = Stepper::new(&setup, 0.01).unwrap();
        let mut state = StepperState {
            velocity: VelocityField::zeros(&setup.grid),
            time: 0.,
        };
        state.velocity.u[[1, 1]] = f64::NAN;
        let model = ClosureModel::from(NoClosure);
        let theta = Array1::zeros(0);
        let err = stepper.step(&mut state, &model, &theta);
        assert!(matches!(err, Err(Error::NonFinite { .. })));
        // state must be untouched by the failed step
        assert_eq!(state.time, 0.);
    }

    #[test]
    fn unrolled_gradient_matches_finite_differences() {
        for order in [ProjectionOrder::DifLast, ProjectionOrder::DcfEveryStage] {
            let setup = small_setup(order);
            let stepper = Stepper::new(&setup, 0.005).unwrap();
            let u0 = divergence_free_field(&setup.grid, 23);

            let net = ConvNet::new(vec![
                ConvSpec {
                    c_in: 2,
                    c_out: 3,
                    radius: 1,
                    activation: Activation::Tanh,
                },
                ConvSpec {
                    c_in: 3,
                    c_out: 2,
                    radius: 1,
                    activation: Activation::Identity,
                },
            ])
            .unwrap();
            let mut rng = StdRng::seed_from_u64(24);
            let theta = {
                use crate::closure::Closure;
                net.init_params(&mut rng)
            };
            let model = ClosureModel::from(net);
            let mut rng = StdRng::seed_from_u64(25);
            let cot = VelocityField::random(&setup.grid, 1., &mut rng);

            // loss = <u after 2 steps, cot>
            let run = |t: &Array1<f64>| -> f64 {
                let mut state = StepperState {
                    velocity: u0.clone(),
                    time: 0.,
                };
                stepper.step(&mut state, &model, t).unwrap();
                stepper.step(&mut state, &model, t).unwrap();
                state.velocity.dot(&cot)
            };

            // adjoint gradient through both steps
            let mut state = StepperState {
                velocity: u0.clone(),
                time: 0.,
            };
            let tape1 = stepper.step_with_tape(&mut state, &model, &theta).unwrap();
            let tape2 = stepper.step_with_tape(&mut state, &model, &theta).unwrap();
            let mut grad = Array1::zeros(theta.len());
            let mut bar = cot.clone();
            stepper
                .step_backward(&tape2, &model, &theta, &mut bar, &mut grad)
                .unwrap();
            stepper
                .step_backward(&tape1, &model, &theta, &mut bar, &mut grad)
                .unwrap();

            let eps = 1e-6;
            for &idx in &[0usize, 11, 40, theta.len() - 1] {
                let mut tp = theta.clone();
                tp[idx] += eps;
                let mut tm = theta.clone();
                tm[idx] -= eps;
                let fd = (run(&tp) - run(&tm)) / (2. * eps);
                assert!(
                    (fd - grad[idx]).abs() < 1e-5 * (1. + fd.abs()),
                    "{:?} param {}: fd {} vs adjoint {}",
                    order,
                    idx,
                    fd,
                    grad[idx]
                );
            }
        }
    }

    #[test]
    fn stepping_is_deterministic() {
        let setup = small_setup(ProjectionOrder::DcfEveryStage);
        let stepper = Stepper::new(&setup, 0.01).unwrap();
        let u0 = divergence_free_field(&setup.grid, 26);
        let model = ClosureModel::from(NoClosure);
        let theta = Array1::zeros(0);
        let t1 = stepper.rollout(&u0, 0., 3, &model, &theta, "a").unwrap();
        let t2 = stepper.rollout(&u0, 0., 3, &model, &theta, "b").unwrap();
        for (a, b) in t1.iter().zip(t2.iter()) {
            assert_eq!(a.u, b.u);
            assert_eq!(a.v, b.v);
        }
    }
}

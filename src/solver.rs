//! # Pressure Poisson solver and projection
//!
//! The pressure Poisson problem on the periodic staggered grid is solved
//! with a matrix free conjugate gradient iteration on the (negated) five
//! point Laplacian. The operator is symmetric and the iteration is run to
//! a fixed tolerance, so the solve behaves as a pure linear function with
//! itself as adjoint; the backward sweep of the stepper reuses
//! [`project`] unchanged.
//!
//! The Laplacian has the constant field in its null space. Compatibility
//! is enforced by removing the mean of the right hand side, uniqueness by
//! starting from zero (conjugate gradient then stays on the mean free
//! subspace).
use crate::error::{Error, Result};
use crate::field::{ScalarField, VelocityField};
use crate::grid::Grid;
use crate::operators::{divergence, gradient, laplacian};
use ndarray::Array2;

/// Solve a linear system `M x = b` on cell centered data
pub trait Solve {
    /// Solves `M x = b`, returns x
    ///
    /// # Errors
    /// Iteration did not reach the requested tolerance.
    fn solve(&self, rhs: &ScalarField) -> Result<ScalarField>;
}

/// Conjugate gradient Poisson solver: `lap(q) = rhs`
#[derive(Clone, Debug)]
pub struct PoissonCg {
    grid: Grid,
    /// Relative residual tolerance
    pub tol: f64,
    /// Iteration budget
    pub max_iter: usize,
}

impl PoissonCg {
    /// Solver for a given grid with a tight default tolerance
    pub fn new(grid: &Grid) -> Self {
        Self {
            grid: grid.clone(),
            tol: 1e-12,
            max_iter: 4 * grid.nx * grid.ny,
        }
    }

    /// Positive definite operator `-lap` restricted to mean free fields
    fn apply(&self, p: &ScalarField) -> ScalarField {
        -laplacian(p, &self.grid)
    }
}

impl Solve for PoissonCg {
    fn solve(&self, rhs: &ScalarField) -> Result<ScalarField> {
        let n = rhs.len() as f64;
        let mean = rhs.sum() / n;
        // b = -(rhs - mean): compatibility with the periodic null space
        let b = rhs.mapv(|x| -(x - mean));
        let b_norm = b.iter().map(|x| x * x).sum::<f64>().sqrt();
        if b_norm == 0. {
            return Ok(Array2::zeros(rhs.raw_dim()));
        }

        let mut x: ScalarField = Array2::zeros(rhs.raw_dim());
        let mut r = b;
        let mut p = r.clone();
        let mut rs_old: f64 = r.iter().map(|v| v * v).sum();

        for _ in 0..self.max_iter {
            let ap = self.apply(&p);
            let p_ap: f64 = p.iter().zip(ap.iter()).map(|(a, b)| a * b).sum();
            let alpha = rs_old / p_ap;
            x.scaled_add(alpha, &p);
            r.scaled_add(-alpha, &ap);
            let rs_new: f64 = r.iter().map(|v| v * v).sum();
            if rs_new.sqrt() <= self.tol * b_norm {
                return Ok(x);
            }
            p = &r + &(p * (rs_new / rs_old));
            rs_old = rs_new;
        }
        Err(Error::PressureDiverged {
            residual: rs_old.sqrt() / b_norm,
            iterations: self.max_iter,
        })
    }
}

/// Project a velocity field onto the discretely divergence free subspace
/// $$
/// u \leftarrow u - \nabla (\nabla^{-2} \nabla \cdot u)
/// $$
/// Returns the pseudo pressure for diagnostics. The projection is self
/// adjoint, so it doubles as its own transpose in reverse sweeps.
///
/// # Errors
/// Pressure solve did not converge.
pub fn project(vel: &mut VelocityField, solver: &PoissonCg, grid: &Grid) -> Result<ScalarField> {
    let div = divergence(vel, grid);
    let q = solver.solve(&div)?;
    let grad_q = gradient(&q, grid);
    vel.axpy(-1., &grad_q);
    Ok(q)
}

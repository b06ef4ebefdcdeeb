//! # Static Smagorinsky closure
//!
//! Classical eddy viscosity model with a single non-negative constant.
//! The local strain rate magnitude sets the eddy viscosity
//! $$
//! \nu_t = (\theta \Delta)^2 |S|, \qquad |S| = \sqrt{2 S_{ij} S_{ij}}
//! $$
//! and the correction is the extra diffusive flux `div(2 nu_t S)`.
//! Normal strain components live at cell centers, the shear component at
//! cell corners, matching the staggered flux positions.
use super::{Closure, ClosureCache};
use crate::field::VelocityField;
use crate::grid::Grid;
use crate::operators::{avg_mx, avg_my, avg_px, avg_py, diff_mx, diff_my, diff_px, diff_py};
use ndarray::{array, Array1};
use rand::rngs::StdRng;

/// Eddy viscosity closure, `theta = [smagorinsky constant]`
#[derive(Clone, Debug, Default)]
pub struct Smagorinsky;

impl Closure for Smagorinsky {
    fn n_params(&self) -> usize {
        1
    }

    /// The constant is tuned by grid search, never by gradient descent
    fn trainable(&self) -> bool {
        false
    }

    /// Returns the literature value 0.17 as the search start
    fn init_params(&self, _rng: &mut StdRng) -> Array1<f64> {
        array![0.17]
    }

    fn apply(&self, vel: &VelocityField, theta: &Array1<f64>, grid: &Grid) -> VelocityField {
        let (dx, dy) = (grid.dx(), grid.dy());
        let coeff = (theta[0] * grid.delta()).powi(2);

        // strain components: s11/s22 at centers, s12 at corners
        let s11 = diff_mx(&vel.u, dx);
        let s22 = diff_my(&vel.v, dy);
        let s12 = 0.5 * (diff_py(&vel.u, dy) + diff_px(&vel.v, dx));

        // |S| at centers, eddy viscosity at centers and corners
        let s12_center = avg_mx(&avg_my(&s12));
        let magnitude = (2. * (&s11 * &s11 + &s22 * &s22) + 4. * &s12_center * &s12_center)
            .mapv(f64::sqrt);
        let nu_center = coeff * magnitude;
        let nu_corner = avg_px(&avg_py(&nu_center));

        VelocityField {
            u: diff_px(&(2. * &nu_center * &s11), dx) + diff_my(&(2. * &nu_corner * &s12), dy),
            v: diff_mx(&(2. * &nu_corner * &s12), dx) + diff_py(&(2. * &nu_center * &s22), dy),
        }
    }

    fn apply_with_cache(
        &self,
        vel: &VelocityField,
        theta: &Array1<f64>,
        grid: &Grid,
    ) -> (VelocityField, ClosureCache) {
        (self.apply(vel, theta, grid), ClosureCache::None)
    }

    /// # Panics
    /// Always. The Smagorinsky constant is tuned by one dimensional grid
    /// search over the a-posteriori error, never by gradient descent.
    fn vjp(
        &self,
        _theta: &Array1<f64>,
        _grid: &Grid,
        _cache: &ClosureCache,
        _cotangent: &VelocityField,
        _grad_theta: &mut Array1<f64>,
    ) -> VelocityField {
        panic!("Smagorinsky closure has no parameter gradient; tune it by grid search");
    }
}

//! # Velocity and scalar fields on the staggered grid
//!
//! [`VelocityField`] bundles both face-normal components; it is the
//! transient state advanced by the stepper and the payload of the
//! trajectory datasets. Linear algebra helpers operate on both
//! components at once, which keeps the trainers free of per-component
//! bookkeeping.
use crate::grid::Grid;
use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;

/// Scalar quantity at cell centers (pressure, divergence diagnostics)
pub type ScalarField = Array2<f64>;

/// Two-component velocity field on cell faces
#[derive(Clone, Debug)]
pub struct VelocityField {
    /// x-component on east faces
    pub u: Array2<f64>,
    /// y-component on north faces
    pub v: Array2<f64>,
}

impl VelocityField {
    /// Zero velocity field for a given grid
    pub fn zeros(grid: &Grid) -> Self {
        Self {
            u: Array2::zeros((grid.nx, grid.ny)),
            v: Array2::zeros((grid.nx, grid.ny)),
        }
    }

    /// Uniform random field in `[-amp, amp]`, drawn from a caller owned
    /// generator. Not divergence free; callers project afterwards.
    pub fn random(grid: &Grid, amp: f64, rng: &mut StdRng) -> Self {
        let dist = Uniform::new(-amp, amp);
        Self {
            u: Array2::random_using((grid.nx, grid.ny), dist, rng),
            v: Array2::random_using((grid.nx, grid.ny), dist, rng),
        }
    }

    /// Number of cells per component
    pub fn len(&self) -> usize {
        self.u.len()
    }

    /// True if the field has no cells
    pub fn is_empty(&self) -> bool {
        self.u.is_empty()
    }

    /// True if every value of both components is finite
    pub fn is_finite(&self) -> bool {
        self.u.iter().all(|x| x.is_finite()) && self.v.iter().all(|x| x.is_finite())
    }

    /// `self += scale * other`
    pub fn axpy(&mut self, scale: f64, other: &Self) {
        self.u.scaled_add(scale, &other.u);
        self.v.scaled_add(scale, &other.v);
    }

    /// `self *= scale`
    pub fn scale(&mut self, scale: f64) {
        self.u.mapv_inplace(|x| x * scale);
        self.v.mapv_inplace(|x| x * scale);
    }

    /// Inner product over both components
    pub fn dot(&self, other: &Self) -> f64 {
        let du: f64 = self.u.iter().zip(other.u.iter()).map(|(a, b)| a * b).sum();
        let dv: f64 = self.v.iter().zip(other.v.iter()).map(|(a, b)| a * b).sum();
        du + dv
    }

    /// Squared l2 norm over both components
    pub fn norm_sqr(&self) -> f64 {
        self.dot(self)
    }

    /// l2 norm over both components
    pub fn norm_l2(&self) -> f64 {
        self.norm_sqr().sqrt()
    }

    /// Difference `self - other` as a new field
    pub fn sub(&self, other: &Self) -> Self {
        Self {
            u: &self.u - &other.u,
            v: &self.v - &other.v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn axpy_and_norms() {
        let grid = Grid::new(4, 4, 1., 1.).unwrap();
        let mut a = VelocityField::zeros(&grid);
        let mut b = VelocityField::zeros(&grid);
        a.u.fill(1.);
        b.v.fill(2.);
        a.axpy(0.5, &b);
        assert!((a.v[[0, 0]] - 1.).abs() < 1e-15);
        assert!((a.norm_sqr() - 32.).abs() < 1e-12);
    }

    #[test]
    fn random_is_reproducible_per_stream() {
        let grid = Grid::new(8, 8, 1., 1.).unwrap();
        let mut rng1 = StdRng::seed_from_u64(42);
        let mut rng2 = StdRng::seed_from_u64(42);
        let f1 = VelocityField::random(&grid, 1., &mut rng1);
        let f2 = VelocityField::random(&grid, 1., &mut rng2);
        assert_eq!(f1.u, f2.u);
        assert_eq!(f1.v, f2.v);
    }

    #[test]
    fn nan_is_detected() {
        let grid = Grid::new(4, 4, 1., 1.).unwrap();
        let mut f = VelocityField::zeros(&grid);
        assert!(f.is_finite());
        f.v[[2, 3]] = f64::NAN;
        assert!(!f.is_finite());
    }
}

//! # Closure model abstraction
//!
//! A closure model maps a (filtered) velocity field to a correction of
//! the momentum right hand side. The stepper is written against the
//! [`Closure`] trait and never special-cases an absent model: the
//! baseline is simply [`NoClosure`], whose correction is the zero field.
pub mod conv_net;
pub mod smagorinsky;

use crate::field::VelocityField;
use crate::grid::Grid;
pub use conv_net::{Activation, ConvCache, ConvNet, ConvSpec};
use ndarray::Array1;
use rand::rngs::StdRng;
pub use smagorinsky::Smagorinsky;

/// Intermediates recorded by `apply_with_cache`, consumed by `vjp`
#[derive(Clone, Debug)]
pub enum ClosureCache {
    /// Nothing to record (zero or locally recomputable corrections)
    None,
    /// Layer activations of the convolutional model
    Conv(ConvCache),
}

/// Parametrized correction term for the coarse momentum equation
#[enum_dispatch]
pub trait Closure {
    /// Length of the parameter vector
    fn n_params(&self) -> usize;

    /// Whether `vjp` provides a usable parameter gradient; the trainers
    /// reject models that do not before touching the optimizer
    fn trainable(&self) -> bool;

    /// Draw an initial parameter vector from a caller owned generator
    fn init_params(&self, rng: &mut StdRng) -> Array1<f64>;

    /// Evaluate the correction field; pure in `(vel, theta)`
    fn apply(&self, vel: &VelocityField, theta: &Array1<f64>, grid: &Grid) -> VelocityField;

    /// Evaluate and record the intermediates needed for the reverse sweep
    fn apply_with_cache(
        &self,
        vel: &VelocityField,
        theta: &Array1<f64>,
        grid: &Grid,
    ) -> (VelocityField, ClosureCache);

    /// Reverse sweep: propagate the output cotangent to the input field
    /// and accumulate the parameter gradient into `grad_theta`
    fn vjp(
        &self,
        theta: &Array1<f64>,
        grid: &Grid,
        cache: &ClosureCache,
        cotangent: &VelocityField,
        grad_theta: &mut Array1<f64>,
    ) -> VelocityField;
}

/// Baseline model: the correction is identically zero
#[derive(Clone, Debug, Default)]
pub struct NoClosure;

impl Closure for NoClosure {
    fn n_params(&self) -> usize {
        0
    }

    fn trainable(&self) -> bool {
        true
    }

    fn init_params(&self, _rng: &mut StdRng) -> Array1<f64> {
        Array1::zeros(0)
    }

    fn apply(&self, vel: &VelocityField, _theta: &Array1<f64>, _grid: &Grid) -> VelocityField {
        VelocityField {
            u: ndarray::Array2::zeros(vel.u.raw_dim()),
            v: ndarray::Array2::zeros(vel.v.raw_dim()),
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

    fn vjp(
        &self,
        _theta: &Array1<f64>,
        _grid: &Grid,
        _cache: &ClosureCache,
        cotangent: &VelocityField,
        _grad_theta: &mut Array1<f64>,
    ) -> VelocityField {
        VelocityField {
            u: ndarray::Array2::zeros(cotangent.u.raw_dim()),
            v: ndarray::Array2::zeros(cotangent.v.raw_dim()),
        }
    }
}

/// Tagged collection of closure models
#[enum_dispatch(Closure)]
#[derive(Clone, Debug)]
pub enum ClosureModel {
    /// Zero correction baseline
    NoClosure,
    /// Static eddy viscosity model, one scalar parameter
    Smagorinsky,
    /// Trainable convolutional model
    ConvNet,
}

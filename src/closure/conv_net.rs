//! # Convolutional closure model
//!
//! Fixed-depth stack of periodic 2-D convolutions over the two staggered
//! velocity components (two input channels, two output channels, linear
//! final activation). Parameters live in one flat vector so the trainers
//! and the checkpoint format stay agnostic of the architecture; the
//! per-layer weight blocks are addressed by precomputed offsets.
//!
//! Forward and reverse passes are written out by hand. The reverse pass
//! returns both the parameter gradient (accumulated into the caller's
//! buffer) and the input cotangent, which the a-posteriori trainer chains
//! through the unrolled stepper.
use super::{Closure, ClosureCache};
use crate::field::VelocityField;
use crate::grid::Grid;
use ndarray::{Array1, Array3};
use ndarray_rand::rand_distr::Uniform;
use rand::rngs::StdRng;
use rand::Rng;

/// Layer activation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    /// Hyperbolic tangent (hidden layers)
    Tanh,
    /// Linear (final layer)
    Identity,
}

/// One convolution layer: shapes and activation
#[derive(Clone, Debug)]
pub struct ConvSpec {
    /// Input channels
    pub c_in: usize,
    /// Output channels
    pub c_out: usize,
    /// Kernel radius, kernel size is `2 * radius + 1`
    pub radius: usize,
    /// Activation applied after the convolution
    pub activation: Activation,
}

impl ConvSpec {
    fn kernel(&self) -> usize {
        2 * self.radius + 1
    }

    fn n_params(&self) -> usize {
        self.c_out * self.c_in * self.kernel() * self.kernel() + self.c_out
    }
}

/// Activations recorded during the forward pass
#[derive(Clone, Debug)]
pub struct ConvCache {
    /// `activations[0]` is the stacked input, `activations[l + 1]` the
    /// post-activation output of layer `l`
    pub activations: Vec<Array3<f64>>,
}

/// Convolutional closure with a flat parameter vector
#[derive(Clone, Debug)]
pub struct ConvNet {
    /// Layer specifications, first `c_in` and last `c_out` must be 2
    pub layers: Vec<ConvSpec>,
    /// Flat offset of each layer's parameter block
    offsets: Vec<usize>,
    n_params: usize,
}

impl ConvNet {
    /// Build a network from layer specifications
    ///
    /// # Errors
    /// Empty stack, broken channel chain, or in/out channels that do not
    /// match the two velocity components.
    pub fn new(layers: Vec<ConvSpec>) -> crate::error::Result<Self> {
        use crate::error::Error;
        if layers.is_empty() {
            return Err(Error::Config("convolutional stack is empty".to_owned()));
        }
        if layers[0].c_in != 2 || layers[layers.len() - 1].c_out != 2 {
            return Err(Error::Config(
                "closure must map 2 velocity channels to 2 correction channels".to_owned(),
            ));
        }
        for pair in layers.windows(2) {
            if pair[0].c_out != pair[1].c_in {
                return Err(Error::Config(format!(
                    "channel chain broken: {} out vs {} in",
                    pair[0].c_out, pair[1].c_in
                )));
            }
        }
        let mut offsets = Vec::with_capacity(layers.len());
        let mut n_params = 0;
        for spec in &layers {
            offsets.push(n_params);
            n_params += spec.n_params();
        }
        Ok(Self {
            layers,
            offsets,
            n_params,
        })
    }

    /// Reference configuration: five layers, 2-24-24-24-24-2 channels,
    /// radius-1 kernels, tanh hidden activations, linear output
    pub fn default_architecture() -> Self {
        let mut layers = vec![ConvSpec {
            c_in: 2,
            c_out: 24,
            radius: 1,
            activation: Activation::Tanh,
        }];
        for _ in 0..3 {
            layers.push(ConvSpec {
                c_in: 24,
                c_out: 24,
                radius: 1,
                activation: Activation::Tanh,
            });
        }
        layers.push(ConvSpec {
            c_in: 24,
            c_out: 2,
            radius: 1,
            activation: Activation::Identity,
        });
        // the reference configuration is statically valid
        Self::new(layers).unwrap()
    }

    /// Flat index of weight `[o, ci, p, q]` of layer `l`
    fn w_idx(&self, l: usize, o: usize, ci: usize, p: usize, q: usize) -> usize {
        let spec = &self.layers[l];
        let k = spec.kernel();
        self.offsets[l] + ((o * spec.c_in + ci) * k + p) * k + q
    }

    /// Flat index of bias `o` of layer `l`
    fn b_idx(&self, l: usize, o: usize) -> usize {
        let spec = &self.layers[l];
        let k = spec.kernel();
        self.offsets[l] + spec.c_out * spec.c_in * k * k + o
    }

    fn conv_forward(&self, l: usize, x: &Array3<f64>, theta: &Array1<f64>) -> Array3<f64> {
        let spec = &self.layers[l];
        let (_, nx, ny) = x.dim();
        let (k, r) = (spec.kernel(), spec.radius);
        assert!(
            k <= nx && k <= ny,
            "kernel {} does not fit the {} x {} grid",
            k,
            nx,
            ny
        );
        let mut out = Array3::zeros((spec.c_out, nx, ny));
        for o in 0..spec.c_out {
            let bias = theta[self.b_idx(l, o)];
            for i in 0..nx {
                for j in 0..ny {
                    let mut acc = bias;
                    for ci in 0..spec.c_in {
                        for p in 0..k {
                            let ii = (i + p + nx - r) % nx;
                            for q in 0..k {
                                let jj = (j + q + ny - r) % ny;
                                acc += theta[self.w_idx(l, o, ci, p, q)] * x[[ci, ii, jj]];
                            }
                        }
                    }
                    out[[o, i, j]] = acc;
                }
            }
        }
        match spec.activation {
            Activation::Tanh => out.mapv_inplace(f64::tanh),
            Activation::Identity => {}
        }
        out
    }

    /// Reverse one layer: cotangent of the post-activation output in,
    /// cotangent of the layer input out; parameter gradient accumulated.
    fn conv_backward(
        &self,
        l: usize,
        x: &Array3<f64>,
        y: &Array3<f64>,
        gout: &Array3<f64>,
        theta: &Array1<f64>,
        grad_theta: &mut Array1<f64>,
    ) -> Array3<f64> {
        let spec = &self.layers[l];
        let (c_in, nx, ny) = x.dim();
        let (k, r) = (spec.kernel(), spec.radius);

        // activation backward
        let gz = match spec.activation {
            Activation::Tanh => {
                let mut g = gout.clone();
                g.zip_mut_with(y, |gv, yv| *gv *= 1. - yv * yv);
                g
            }
            Activation::Identity => gout.clone(),
        };

        let mut gx = Array3::zeros((c_in, nx, ny));
        for o in 0..spec.c_out {
            let mut gb = 0.;
            for i in 0..nx {
                for j in 0..ny {
                    let g = gz[[o, i, j]];
                    gb += g;
                    for ci in 0..c_in {
                        for p in 0..k {
                            let ii = (i + p + nx - r) % nx;
                            for q in 0..k {
                                let jj = (j + q + ny - r) % ny;
                                grad_theta[self.w_idx(l, o, ci, p, q)] += g * x[[ci, ii, jj]];
                                gx[[ci, ii, jj]] += theta[self.w_idx(l, o, ci, p, q)] * g;
                            }
                        }
                    }
                }
            }
            grad_theta[self.b_idx(l, o)] += gb;
        }
        gx
    }

    fn stack(vel: &VelocityField) -> Array3<f64> {
        let (nx, ny) = vel.u.dim();
        let mut x = Array3::zeros((2, nx, ny));
        x.index_axis_mut(ndarray::Axis(0), 0).assign(&vel.u);
        x.index_axis_mut(ndarray::Axis(0), 1).assign(&vel.v);
        x
    }

    fn unstack(x: &Array3<f64>) -> VelocityField {
        VelocityField {
            u: x.index_axis(ndarray::Axis(0), 0).to_owned(),
            v: x.index_axis(ndarray::Axis(0), 1).to_owned(),
        }
    }
}

impl Closure for ConvNet {
    fn n_params(&self) -> usize {
        self.n_params
    }

    fn trainable(&self) -> bool {
        true
    }

    /// Xavier-uniform weights, zero biases
    fn init_params(&self, rng: &mut StdRng) -> Array1<f64> {
        let mut theta = Array1::zeros(self.n_params);
        for (l, spec) in self.layers.iter().enumerate() {
            let k = spec.kernel();
            let fan_in = (spec.c_in * k * k) as f64;
            let fan_out = (spec.c_out * k * k) as f64;
            let limit = (6. / (fan_in + fan_out)).sqrt();
            let dist = Uniform::new(-limit, limit);
            for o in 0..spec.c_out {
                for ci in 0..spec.c_in {
                    for p in 0..k {
                        for q in 0..k {
                            theta[self.w_idx(l, o, ci, p, q)] = rng.sample(dist);
                        }
                    }
                }
            }
        }
        theta
    }

    fn apply(&self, vel: &VelocityField, theta: &Array1<f64>, grid: &Grid) -> VelocityField {
        let (out, _) = self.apply_with_cache(vel, theta, grid);
        out
    }

    fn apply_with_cache(
        &self,
        vel: &VelocityField,
        theta: &Array1<f64>,
        _grid: &Grid,
    ) -> (VelocityField, ClosureCache) {
        assert_eq!(
            theta.len(),
            self.n_params,
            "parameter vector length {} does not match architecture ({})",
            theta.len(),
            self.n_params
        );
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(Self::stack(vel));
        for l in 0..self.layers.len() {
            let next = self.conv_forward(l, &activations[l], theta);
            activations.push(next);
        }
        let out = Self::unstack(&activations[self.layers.len()]);
        (out, ClosureCache::Conv(ConvCache { activations }))
    }

    fn vjp(
        &self,
        theta: &Array1<f64>,
        _grid: &Grid,
        cache: &ClosureCache,
        cotangent: &VelocityField,
        grad_theta: &mut Array1<f64>,
    ) -> VelocityField {
        let cache = match cache {
            ClosureCache::Conv(c) => c,
            ClosureCache::None => panic!("convolutional vjp called without a forward cache"),
        };
        let mut g = Self::stack(cotangent);
        for l in (0..self.layers.len()).rev() {
            g = self.conv_backward(
                l,
                &cache.activations[l],
                &cache.activations[l + 1],
                &g,
                theta,
                grad_theta,
            );
        }
        Self::unstack(&g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn tiny_net() -> ConvNet {
        ConvNet::new(vec![
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
        .unwrap()
    }

    #[test]
    fn default_architecture_parameter_count() {
        let net = ConvNet::default_architecture();
        // 2->24, 3 x 24->24, 24->2 with 3x3 kernels
        let expected = (24 * 2 * 9 + 24) + 3 * (24 * 24 * 9 + 24) + (2 * 24 * 9 + 2);
        assert_eq!(net.n_params(), expected);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(net.init_params(&mut rng).len(), expected);
    }

    #[test]
    fn broken_channel_chain_is_rejected() {
        let result = ConvNet::new(vec![
            ConvSpec {
                c_in: 2,
                c_out: 4,
                radius: 1,
                activation: Activation::Tanh,
            },
            ConvSpec {
                c_in: 3,
                c_out: 2,
                radius: 1,
                activation: Activation::Identity,
            },
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn delta_kernel_is_the_identity() {
        let net = ConvNet::new(vec![ConvSpec {
            c_in: 2,
            c_out: 2,
            radius: 1,
            activation: Activation::Identity,
        }])
        .unwrap();
        let mut theta = Array1::zeros(net.n_params());
        for o in 0..2 {
            theta[net.w_idx(0, o, o, 1, 1)] = 1.;
        }
        let grid = Grid::new(6, 6, 1., 1.).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let vel = VelocityField::random(&grid, 1., &mut rng);
        let out = net.apply(&vel, &theta, &grid);
        assert!(out.sub(&vel).norm_l2() < 1e-14);
    }

    #[test]
    fn parameter_gradient_matches_finite_differences() {
        let grid = Grid::new(5, 5, 1., 1.).unwrap();
        let net = tiny_net();
        let mut rng = StdRng::seed_from_u64(4);
        let theta = net.init_params(&mut rng);
        let vel = VelocityField::random(&grid, 1., &mut rng);
        let cot = VelocityField::random(&grid, 1., &mut rng);

        let (_, cache) = net.apply_with_cache(&vel, &theta, &grid);
        let mut grad = Array1::zeros(net.n_params());
        net.vjp(&theta, &grid, &cache, &cot, &mut grad);

        let loss = |t: &Array1<f64>| net.apply(&vel, t, &grid).dot(&cot);
        let eps = 1e-6;
        for &idx in &[0usize, 7, 20, net.n_params() - 1] {
            let mut tp = theta.clone();
            tp[idx] += eps;
            let mut tm = theta.clone();
            tm[idx] -= eps;
            let fd = (loss(&tp) - loss(&tm)) / (2. * eps);
            assert!(
                (fd - grad[idx]).abs() < 1e-6 * (1. + fd.abs()),
                "param {}: fd {} vs adjoint {}",
                idx,
                fd,
                grad[idx]
            );
        }
    }

    #[test]
    fn input_cotangent_matches_finite_differences() {
        let grid = Grid::new(5, 5, 1., 1.).unwrap();
        let net = tiny_net();
        let mut rng = StdRng::seed_from_u64(5);
        let theta = net.init_params(&mut rng);
        let vel = VelocityField::random(&grid, 1., &mut rng);
        let cot = VelocityField::random(&grid, 1., &mut rng);
        let dir = VelocityField::random(&grid, 1., &mut rng);

        let (_, cache) = net.apply_with_cache(&vel, &theta, &grid);
        let mut grad = Array1::zeros(net.n_params());
        let gx = net.vjp(&theta, &grid, &cache, &cot, &mut grad);

        let eps = 1e-6;
        let mut plus = vel.clone();
        plus.axpy(eps, &dir);
        let mut minus = vel.clone();
        minus.axpy(-eps, &dir);
        let fd = (net.apply(&plus, &theta, &grid).dot(&cot)
            - net.apply(&minus, &theta, &grid).dot(&cot))
            / (2. * eps);
        let ad = gx.dot(&dir);
        assert!(
            (fd - ad).abs() < 1e-6 * (1. + fd.abs()),
            "fd {} vs adjoint {}",
            fd,
            ad
        );
    }
}

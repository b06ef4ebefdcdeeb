//! Adam optimizer on a flat parameter vector
use ndarray::Array1;

/// First order optimizer with per coordinate moment estimates
#[derive(Clone, Debug)]
pub struct Adam {
    /// Learning rate
    pub lr: f64,
    /// Exponential decay of the first moment
    pub beta1: f64,
    /// Exponential decay of the second moment
    pub beta2: f64,
    /// Denominator guard
    pub eps: f64,
    m: Array1<f64>,
    v: Array1<f64>,
    t: i32,
}

impl Adam {
    /// New optimizer with the usual moment defaults
    pub fn new(lr: f64, n_params: usize) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            m: Array1::zeros(n_params),
            v: Array1::zeros(n_params),
            t: 0,
        }
    }

    /// Update `theta` in place with one gradient
    pub fn step(&mut self, theta: &mut Array1<f64>, grad: &Array1<f64>) {
        self.t += 1;
        let bc1 = 1. - self.beta1.powi(self.t);
        let bc2 = 1. - self.beta2.powi(self.t);
        for i in 0..theta.len() {
            self.m[i] = self.beta1 * self.m[i] + (1. - self.beta1) * grad[i];
            self.v[i] = self.beta2 * self.v[i] + (1. - self.beta2) * grad[i] * grad[i];
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            theta[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
    }

    /// Internal state for checkpointing: first moment, second moment,
    /// step counter
    pub fn state(&self) -> (&Array1<f64>, &Array1<f64>, i32) {
        (&self.m, &self.v, self.t)
    }

    /// Restore the internal state from a checkpoint
    pub fn restore(&mut self, m: Array1<f64>, v: Array1<f64>, t: i32) {
        self.m = m;
        self.v = v;
        self.t = t;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn minimizes_a_quadratic() {
        // f(x) = sum (x - target)^2
        let target = array![1., -2., 0.5];
        let mut theta = Array1::zeros(3);
        let mut opt = Adam::new(0.1, 3);
        for _ in 0..500 {
            let grad = 2. * (&theta - &target);
            opt.step(&mut theta, &grad);
        }
        for (a, b) in theta.iter().zip(target.iter()) {
            assert!((a - b).abs() < 1e-3, "{} vs {}", a, b);
        }
    }

    #[test]
    fn state_round_trips() {
        let mut a = Adam::new(0.01, 2);
        let mut theta = array![1., 1.];
        a.step(&mut theta, &array![0.3, -0.2]);
        let (m, v, t) = a.state();
        let mut b = Adam::new(0.01, 2);
        b.restore(m.clone(), v.clone(), t);
        let mut ta = theta.clone();
        let mut tb = theta.clone();
        a.step(&mut ta, &array![0.1, 0.1]);
        b.step(&mut tb, &array![0.1, 0.1]);
        assert_eq!(ta, tb);
    }
}

//! # Discrete operators on the periodic staggered grid
//!
//! Everything is assembled from eight shift primitives (forward/backward
//! average and difference per direction). Each primitive has an explicit
//! transpose among the same eight:
//!
//! - `avg_px`ᵀ `= avg_mx` (and vice versa, same in y)
//! - `diff_px`ᵀ `= -diff_mx` (and vice versa, same in y)
//!
//! which makes the hand written reverse sweeps in [`momentum_vjp`] and
//! in the stepper mechanical. The transposition identities are verified
//! by the tests below.
use crate::field::VelocityField;
use crate::grid::Grid;
use ndarray::Array2;

/// Copy of `a` with wrapped index shift: `out[i, j] = a[i + di, j + dj]`
fn shifted(a: &Array2<f64>, di: isize, dj: isize) -> Array2<f64> {
    let (nx, ny) = a.dim();
    Array2::from_shape_fn((nx, ny), |(i, j)| {
        let ii = (i as isize + di).rem_euclid(nx as isize) as usize;
        let jj = (j as isize + dj).rem_euclid(ny as isize) as usize;
        a[[ii, jj]]
    })
}

/// Average towards positive x: `(a[i] + a[i+1]) / 2`
pub fn avg_px(a: &Array2<f64>) -> Array2<f64> {
    0.5 * (a + &shifted(a, 1, 0))
}

/// Average towards negative x: `(a[i-1] + a[i]) / 2`
pub fn avg_mx(a: &Array2<f64>) -> Array2<f64> {
    0.5 * (&shifted(a, -1, 0) + a)
}

/// Average towards positive y
pub fn avg_py(a: &Array2<f64>) -> Array2<f64> {
    0.5 * (a + &shifted(a, 0, 1))
}

/// Average towards negative y
pub fn avg_my(a: &Array2<f64>) -> Array2<f64> {
    0.5 * (&shifted(a, 0, -1) + a)
}

/// Forward difference in x: `(a[i+1] - a[i]) / h`
pub fn diff_px(a: &Array2<f64>, h: f64) -> Array2<f64> {
    (&shifted(a, 1, 0) - a) / h
}

/// Backward difference in x: `(a[i] - a[i-1]) / h`
pub fn diff_mx(a: &Array2<f64>, h: f64) -> Array2<f64> {
    (a - &shifted(a, -1, 0)) / h
}

/// Forward difference in y
pub fn diff_py(a: &Array2<f64>, h: f64) -> Array2<f64> {
    (&shifted(a, 0, 1) - a) / h
}

/// Backward difference in y
pub fn diff_my(a: &Array2<f64>, h: f64) -> Array2<f64> {
    (a - &shifted(a, 0, -1)) / h
}

/// Discrete divergence at cell centers
/// $$
/// div[i,j] = (u[i,j] - u[i-1,j]) / dx + (v[i,j] - v[i,j-1]) / dy
/// $$
pub fn divergence(vel: &VelocityField, grid: &Grid) -> Array2<f64> {
    diff_mx(&vel.u, grid.dx()) + diff_my(&vel.v, grid.dy())
}

/// Discrete pressure gradient, cell centers to faces
pub fn gradient(p: &Array2<f64>, grid: &Grid) -> VelocityField {
    VelocityField {
        u: diff_px(p, grid.dx()),
        v: diff_py(p, grid.dy()),
    }
}

/// Five point Laplacian (per component grid position)
pub fn laplacian(a: &Array2<f64>, grid: &Grid) -> Array2<f64> {
    diff_px(&diff_mx(a, grid.dx()), grid.dx()) + diff_py(&diff_my(a, grid.dy()), grid.dy())
}

/// Convective and diffusive momentum right hand side
/// $$
/// F(u) = -\nabla \cdot (u u) + \nu \nabla^2 u
/// $$
/// Convection is in divergence form; quadratic fluxes are built at cell
/// centers, mixed fluxes at cell corners.
pub fn momentum(vel: &VelocityField, visc: f64, grid: &Grid) -> VelocityField {
    let (dx, dy) = (grid.dx(), grid.dy());
    // u interpolated to centers, u/v interpolated to corners
    let uc = avg_mx(&vel.u);
    let vc = avg_my(&vel.v);
    let ku = avg_py(&vel.u);
    let kv = avg_px(&vel.v);
    let kuv = &ku * &kv;

    let conv_u = diff_px(&(&uc * &uc), dx) + diff_my(&kuv, dy);
    let conv_v = diff_mx(&kuv, dx) + diff_py(&(&vc * &vc), dy);

    VelocityField {
        u: visc * laplacian(&vel.u, grid) - conv_u,
        v: visc * laplacian(&vel.v, grid) - conv_v,
    }
}

/// Vector-Jacobian product of [`momentum`]: given the cotangent `bar` of
/// the right hand side, return the cotangent of the velocity input.
///
/// Obtained by transposing every assignment of the forward routine, in
/// reverse order. The Laplacian is self adjoint; the convection fluxes
/// follow the product rule.
pub fn momentum_vjp(
    vel: &VelocityField,
    bar: &VelocityField,
    visc: f64,
    grid: &Grid,
) -> VelocityField {
    let (dx, dy) = (grid.dx(), grid.dy());
    // forward intermediates needed by the product rule
    let uc = avg_mx(&vel.u);
    let vc = avg_my(&vel.v);
    let ku = avg_py(&vel.u);
    let kv = avg_px(&vel.v);

    // diffusion
    let mut ubar = visc * laplacian(&bar.u, grid);
    let mut vbar = visc * laplacian(&bar.v, grid);

    // convection enters the rhs with a minus sign
    let cbar_u = -&bar.u;
    let cbar_v = -&bar.v;

    // conv_u = diff_px(uc^2) + diff_my(ku * kv)
    let s1bar = -diff_mx(&cbar_u, dx);
    ubar += &avg_px(&(2. * &uc * &s1bar));
    let kuv_bar_u = -diff_py(&cbar_u, dy);

    // conv_v = diff_mx(ku * kv) + diff_py(vc^2)
    let kuv_bar_v = -diff_px(&cbar_v, dx);
    let s4bar = -diff_my(&cbar_v, dy);
    vbar += &avg_py(&(2. * &vc * &s4bar));

    // shared corner flux
    let kuv_bar = kuv_bar_u + kuv_bar_v;
    ubar += &avg_my(&(&kuv_bar * &kv));
    vbar += &avg_mx(&(&kuv_bar * &ku));

    VelocityField { u: ubar, v: vbar }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::VelocityField;
    use ndarray::Array2;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn random_array(n: usize, rng: &mut StdRng) -> Array2<f64> {
        Array2::random_using((n, n), Uniform::new(-1., 1.), rng)
    }

    fn dot(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn primitives_transpose_to_each_other() {
        let mut rng = StdRng::seed_from_u64(7);
        let x = random_array(8, &mut rng);
        let y = random_array(8, &mut rng);
        let h = 0.37;
        let tol = 1e-12;
        assert!((dot(&avg_px(&x), &y) - dot(&x, &avg_mx(&y))).abs() < tol);
        assert!((dot(&avg_py(&x), &y) - dot(&x, &avg_my(&y))).abs() < tol);
        assert!((dot(&diff_px(&x, h), &y) + dot(&x, &diff_mx(&y, h))).abs() < tol);
        assert!((dot(&diff_py(&x, h), &y) + dot(&x, &diff_my(&y, h))).abs() < tol);
    }

    #[test]
    fn laplacian_is_divergence_of_gradient() {
        let mut rng = StdRng::seed_from_u64(8);
        let grid = Grid::new(8, 8, 1., 1.).unwrap();
        let p = random_array(8, &mut rng);
        let grad = gradient(&p, &grid);
        let div_grad = divergence(&grad, &grid);
        let lap = laplacian(&p, &grid);
        for (a, b) in div_grad.iter().zip(lap.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn momentum_vjp_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(9);
        let grid = Grid::new(8, 8, 1., 1.).unwrap();
        let visc = 0.01;
        let vel = VelocityField {
            u: random_array(8, &mut rng),
            v: random_array(8, &mut rng),
        };
        let dir = VelocityField {
            u: random_array(8, &mut rng),
            v: random_array(8, &mut rng),
        };
        let cot = VelocityField {
            u: random_array(8, &mut rng),
            v: random_array(8, &mut rng),
        };

        // directional derivative of <F(vel), cot> along dir
        let eps = 1e-6;
        let mut plus = vel.clone();
        plus.axpy(eps, &dir);
        let mut minus = vel.clone();
        minus.axpy(-eps, &dir);
        let f_plus = momentum(&plus, visc, &grid);
        let f_minus = momentum(&minus, visc, &grid);
        let fd = (f_plus.dot(&cot) - f_minus.dot(&cot)) / (2. * eps);

        let vjp = momentum_vjp(&vel, &cot, visc, &grid);
        let ad = vjp.dot(&dir);
        assert!(
            (fd - ad).abs() < 1e-6 * (1. + fd.abs()),
            "finite difference {} vs adjoint {}",
            fd,
            ad
        );
    }
}

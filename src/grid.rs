//! # Staggered grid geometry
//! Uniform two-dimensional marker-and-cell layout with periodic
//! boundaries. Velocity components live on cell faces, scalars at
//! cell centers:
//!
//! - `u[i, j]`: east face of cell `(i, j)`, position `((i+1) dx, (j+1/2) dy)`
//! - `v[i, j]`: north face of cell `(i, j)`, position `((i+1/2) dx, (j+1) dy)`
//! - `p[i, j]`: cell center, position `((i+1/2) dx, (j+1/2) dy)`
//!
//! Periodic closure is expressed through wrapped stencil indices in
//! [`crate::operators`], so fields carry no ghost layers.
use crate::error::{Error, Result};

/// Immutable grid geometry, shared read-only by all field operations
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    /// Number of cells in x
    pub nx: usize,
    /// Number of cells in y
    pub ny: usize,
    /// Domain length in x
    pub lx: f64,
    /// Domain length in y
    pub ly: f64,
}

impl Grid {
    /// Create a periodic grid with `nx x ny` cells on `[0, lx) x [0, ly)`
    ///
    /// # Errors
    /// Zero cell counts or non-positive domain lengths.
    pub fn new(nx: usize, ny: usize, lx: f64, ly: f64) -> Result<Self> {
        if nx < 2 || ny < 2 {
            return Err(Error::Config(format!(
                "grid must have at least 2 cells per direction, got {} x {}",
                nx, ny
            )));
        }
        if lx <= 0. || ly <= 0. {
            return Err(Error::Config(format!(
                "domain lengths must be positive, got {} x {}",
                lx, ly
            )));
        }
        Ok(Self { nx, ny, lx, ly })
    }

    /// Cell width
    pub fn dx(&self) -> f64 {
        self.lx / self.nx as f64
    }

    /// Cell height
    pub fn dy(&self) -> f64 {
        self.ly / self.ny as f64
    }

    /// Geometric mean filter width, used by the Smagorinsky model
    pub fn delta(&self) -> f64 {
        (self.dx() * self.dy()).sqrt()
    }

    /// Coarse grid obtained by merging `compression x compression` cells
    ///
    /// # Errors
    /// Cell counts not divisible by `compression`.
    pub fn coarsen(&self, compression: usize) -> Result<Self> {
        if compression < 2 {
            return Err(Error::Config(format!(
                "compression must be at least 2, got {}",
                compression
            )));
        }
        if self.nx % compression != 0 || self.ny % compression != 0 {
            return Err(Error::Config(format!(
                "grid {} x {} is not divisible by compression {}",
                self.nx, self.ny, compression
            )));
        }
        Grid::new(self.nx / compression, self.ny / compression, self.lx, self.ly)
    }
}

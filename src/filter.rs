//! # Spatial filters: fine grid to coarse grid
//!
//! Two coarse graining operators with different discrete properties:
//!
//! - [`FilterKind::FaceAverage`]: averages the face normal component over
//!   the `compression` fine faces that compose one coarse face. The
//!   coarse divergence of the filtered field equals the block average of
//!   the fine divergence, i.e. filtering commutes with the discrete
//!   divergence operator.
//! - [`FilterKind::VolumeAverage`]: trapezoid weighted average over the
//!   staggered coarse volume around the coarse face. Does not commute
//!   with the divergence; the filtered field generally carries a residual
//!   that the coarse projection has to remove.
//!
//! On the periodic domain no boundary correction of the filtered field is
//! required; the wrapped stencils of downstream operators close it.
use crate::error::{Error, Result};
use crate::field::VelocityField;
use crate::grid::Grid;
use ndarray::Array2;

/// Filter variants
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    /// Divergence consistent face average
    FaceAverage,
    /// Divergence inconsistent volume average
    VolumeAverage,
}

impl FilterKind {
    /// Short tag used in dataset file names
    pub fn tag(&self) -> &'static str {
        match self {
            Self::FaceAverage => "fa",
            Self::VolumeAverage => "va",
        }
    }
}

/// Stateless filter operator: kind plus fine-to-coarse compression ratio
#[derive(Clone, Debug)]
pub struct FilterOperator {
    /// Filter variant
    pub kind: FilterKind,
    /// Fine cells per coarse cell and direction
    pub compression: usize,
}

impl FilterOperator {
    /// Build and validate a filter between two grids
    ///
    /// # Errors
    /// Grids with mismatched domains or non-integer compression.
    pub fn new(kind: FilterKind, fine: &Grid, coarse: &Grid) -> Result<Self> {
        if (fine.lx - coarse.lx).abs() > f64::EPSILON || (fine.ly - coarse.ly).abs() > f64::EPSILON
        {
            return Err(Error::Config(format!(
                "filter domains differ: fine {} x {}, coarse {} x {}",
                fine.lx, fine.ly, coarse.lx, coarse.ly
            )));
        }
        if coarse.nx == 0
            || fine.nx % coarse.nx != 0
            || fine.ny % coarse.ny != 0
            || fine.nx / coarse.nx != fine.ny / coarse.ny
        {
            return Err(Error::Config(format!(
                "no uniform compression maps {} x {} onto {} x {}",
                fine.nx, fine.ny, coarse.nx, coarse.ny
            )));
        }
        let compression = fine.nx / coarse.nx;
        if compression < 2 {
            return Err(Error::Config(
                "filter compression must be at least 2".to_owned(),
            ));
        }
        Ok(Self { kind, compression })
    }

    /// Apply the filter to a fine grid velocity field
    pub fn apply(&self, fine: &VelocityField, coarse: &Grid) -> VelocityField {
        match self.kind {
            FilterKind::FaceAverage => self.face_average(fine, coarse),
            FilterKind::VolumeAverage => self.volume_average(fine, coarse),
        }
    }

    fn face_average(&self, fine: &VelocityField, coarse: &Grid) -> VelocityField {
        let c = self.compression;
        let inv = 1. / c as f64;
        let u = Array2::from_shape_fn((coarse.nx, coarse.ny), |(bi, bj)| {
            let i = (bi + 1) * c - 1;
            (0..c).map(|jj| fine.u[[i, bj * c + jj]]).sum::<f64>() * inv
        });
        let v = Array2::from_shape_fn((coarse.nx, coarse.ny), |(bi, bj)| {
            let j = (bj + 1) * c - 1;
            (0..c).map(|ii| fine.v[[bi * c + ii, j]]).sum::<f64>() * inv
        });
        VelocityField { u, v }
    }

    fn volume_average(&self, fine: &VelocityField, coarse: &Grid) -> VelocityField {
        let c = self.compression;
        let (nxf, nyf) = fine.u.dim();
        // Weights across the face normal direction, centered on the
        // coarse face: trapezoid over c+1 faces for even c, plain block
        // of c faces for odd c.
        let (offsets, weights): (Vec<isize>, Vec<f64>) = if c % 2 == 0 {
            let offs: Vec<isize> = (0..=c as isize).map(|k| k - (c as isize) / 2).collect();
            let mut w = vec![1. / c as f64; c + 1];
            w[0] *= 0.5;
            w[c] *= 0.5;
            (offs, w)
        } else {
            let offs: Vec<isize> = (0..c as isize).map(|k| k - (c as isize - 1) / 2).collect();
            (offs, vec![1. / c as f64; c])
        };
        let inv = 1. / c as f64;

        let u = Array2::from_shape_fn((coarse.nx, coarse.ny), |(bi, bj)| {
            let face = ((bi + 1) * c) as isize - 1;
            offsets
                .iter()
                .zip(weights.iter())
                .map(|(off, w)| {
                    let i = (face + off).rem_euclid(nxf as isize) as usize;
                    w * (0..c).map(|jj| fine.u[[i, bj * c + jj]]).sum::<f64>() * inv
                })
                .sum()
        });
        let v = Array2::from_shape_fn((coarse.nx, coarse.ny), |(bi, bj)| {
            let face = ((bj + 1) * c) as isize - 1;
            offsets
                .iter()
                .zip(weights.iter())
                .map(|(off, w)| {
                    let j = (face + off).rem_euclid(nyf as isize) as usize;
                    w * (0..c).map(|ii| fine.v[[bi * c + ii, j]]).sum::<f64>() * inv
                })
                .sum()
        });
        VelocityField { u, v }
    }
}

/// Block average of a cell centered fine grid quantity
pub fn block_average(fine: &Array2<f64>, compression: usize) -> Array2<f64> {
    let c = compression;
    let (nxf, nyf) = fine.dim();
    let inv = 1. / (c * c) as f64;
    Array2::from_shape_fn((nxf / c, nyf / c), |(bi, bj)| {
        let mut acc = 0.;
        for ii in 0..c {
            for jj in 0..c {
                acc += fine[[bi * c + ii, bj * c + jj]];
            }
        }
        acc * inv
    })
}

//! Filtered trajectory datasets
//!
//! A trajectory holds the filtered velocity snapshots of one simulation
//! together with the commutator labels at the same instants. Datasets
//! are flat hdf5 files, one variable per snapshot and component
//! (`velx_0004`, `vely_0004`, `cx_0004`, `cy_0004`) plus the shared
//! `time` axis.
use crate::error::{Error, Result};
use crate::field::VelocityField;
use crate::grid::Grid;
use crate::io::{read_from_hdf5, replace_file, write_to_hdf5};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::Rng;

/// One filtered trajectory with labels
#[derive(Clone, Debug)]
pub struct TrajectoryData {
    /// Snapshot times, strictly increasing
    pub time: Array1<f64>,
    /// Filtered velocity snapshots
    pub velocity: Vec<VelocityField>,
    /// Commutator labels, one per snapshot
    pub commutator: Vec<VelocityField>,
}

impl TrajectoryData {
    /// Number of snapshots
    pub fn n_snapshots(&self) -> usize {
        self.time.len()
    }

    /// Snapshot spacing, assumed uniform
    pub fn dt(&self) -> f64 {
        self.time[1] - self.time[0]
    }

    /// Write the trajectory to a single hdf5 file, via a temporary
    /// file so the final name never holds a torn write
    ///
    /// # Errors
    /// File system or hdf5 failures.
    pub fn write(&self, path: &str) -> Result<()> {
        let tmp = format!("{}.tmp", path);
        let _ = std::fs::remove_file(&tmp);
        write_to_hdf5(&tmp, "time", &self.time)?;
        for (i, (vel, com)) in self.velocity.iter().zip(self.commutator.iter()).enumerate() {
            write_to_hdf5(&tmp, &format!("velx_{:04}", i), &vel.u)?;
            write_to_hdf5(&tmp, &format!("vely_{:04}", i), &vel.v)?;
            write_to_hdf5(&tmp, &format!("cx_{:04}", i), &com.u)?;
            write_to_hdf5(&tmp, &format!("cy_{:04}", i), &com.v)?;
        }
        replace_file(&tmp, path)
    }

    /// Read a trajectory written by [`Self::write`]
    ///
    /// # Errors
    /// Missing file or variables, or snapshots of the wrong shape.
    pub fn read(path: &str, grid: &Grid) -> Result<Self> {
        let time: Array1<f64> = read_from_hdf5(path, "time")?;
        let expected = [grid.nx, grid.ny];
        let mut velocity = Vec::with_capacity(time.len());
        let mut commutator = Vec::with_capacity(time.len());
        for i in 0..time.len() {
            let u: Array2<f64> = read_from_hdf5(path, &format!("velx_{:04}", i))?;
            let v: Array2<f64> = read_from_hdf5(path, &format!("vely_{:04}", i))?;
            let cu: Array2<f64> = read_from_hdf5(path, &format!("cx_{:04}", i))?;
            let cv: Array2<f64> = read_from_hdf5(path, &format!("cy_{:04}", i))?;
            for arr in [&u, &v, &cu, &cv] {
                if arr.shape() != expected {
                    return Err(Error::ShapeMismatch {
                        expected: expected.to_vec(),
                        actual: arr.shape().to_vec(),
                    });
                }
            }
            velocity.push(VelocityField { u, v });
            commutator.push(VelocityField { u: cu, v: cv });
        }
        Ok(Self {
            time,
            velocity,
            commutator,
        })
    }
}

/// Collection of trajectories used by one trainer
#[derive(Clone, Debug)]
pub struct Dataset {
    /// Member trajectories, all on the same grid
    pub trajectories: Vec<TrajectoryData>,
}

impl Dataset {
    /// Total number of snapshots
    pub fn n_samples(&self) -> usize {
        self.trajectories.iter().map(TrajectoryData::n_snapshots).sum()
    }

    /// Draw `batch` (velocity, commutator) pairs with replacement
    pub fn sample_pairs<'a>(
        &'a self,
        batch: usize,
        rng: &mut StdRng,
    ) -> Vec<(&'a VelocityField, &'a VelocityField)> {
        (0..batch)
            .map(|_| {
                let t = rng.gen_range(0..self.trajectories.len());
                let traj = &self.trajectories[t];
                let i = rng.gen_range(0..traj.n_snapshots());
                (&traj.velocity[i], &traj.commutator[i])
            })
            .collect()
    }

    /// Draw `batch` unroll windows `(trajectory, start snapshot)` such
    /// that `start + nunroll` stays inside the trajectory
    pub fn sample_windows(
        &self,
        batch: usize,
        nunroll: usize,
        rng: &mut StdRng,
    ) -> Vec<(usize, usize)> {
        (0..batch)
            .map(|_| {
                let t = rng.gen_range(0..self.trajectories.len());
                let n = self.trajectories[t].n_snapshots();
                assert!(n > nunroll, "trajectory too short for unroll window");
                let start = rng.gen_range(0..n - nunroll);
                (t, start)
            })
            .collect()
    }
}

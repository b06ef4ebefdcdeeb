//! # Input/output to `hdf5` files
//!
//! Thin helpers around the `hdf5` crate. All fallible calls return the
//! crate wide [`crate::error::Result`], with the offending file path
//! attached to the error. Checkpoint writers combine [`write_to_hdf5`]
//! on a temporary file with [`replace_file`], so a crash mid write can
//! never leave a torn file under the final name.
pub mod read_write_hdf5;
pub mod traits;

/// Re-export of the `hdf5` element type marker
pub use hdf5::H5Type;

pub use read_write_hdf5::{
    read_from_hdf5, read_scalar_from_hdf5, replace_file, write_scalar_to_hdf5, write_to_hdf5,
};
pub use traits::ReadWrite;

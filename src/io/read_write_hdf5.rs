//! `Hdf5` functions to read and write ndarrays
use super::H5Type;
use crate::error::{Error, Result};
use ndarray::{Array, Array1, ArrayBase, ArrayD, Dimension};
use std::path::Path;

/// Read a scalar stored as a length one dataset
///
/// # Errors
/// File or variable does not exist, or the dataset is not a scalar.
pub fn read_scalar_from_hdf5<T>(filename: &str, name: &str) -> Result<T>
where
    T: H5Type + Copy,
{
    let arr: Array1<T> = read_from_hdf5(filename, name)?;
    if arr.len() != 1 {
        return Err(Error::Config(format!(
            "dataset {} in {} is not a scalar",
            name, filename
        )));
    }
    Ok(arr[0])
}

/// Write a scalar as a length one dataset
///
/// # Errors
/// File cannot be created or written.
pub fn write_scalar_to_hdf5<T>(filename: &str, name: &str, scalar: T) -> Result<()>
where
    T: H5Type + Copy,
{
    let x = Array1::<T>::from_elem(1, scalar);
    write_to_hdf5(filename, name, &x)
}

/// Read an ndarray from an hdf5 file
///
/// # Errors
/// File or variable does not exist, or the stored dimensionality does
/// not match `D`.
pub fn read_from_hdf5<A, D>(filename: &str, varname: &str) -> Result<Array<A, D>>
where
    A: H5Type,
    D: Dimension,
{
    let inner = || -> hdf5::Result<ArrayD<A>> {
        let file = hdf5::File::open(filename)?;
        let data = file.dataset(varname)?;
        data.read_dyn::<A>()
    };
    let dyn_array = inner().map_err(|e| Error::io(filename, e))?;
    dyn_array
        .into_dimensionality::<D>()
        .map_err(|_| Error::Config(format!("unexpected rank of {} in {}", varname, filename)))
}

/// Write an ndarray to an hdf5 file, appending to an existing file and
/// overwriting an existing variable of the same shape
///
/// # Errors
/// File cannot be created, or the variable exists with another shape.
pub fn write_to_hdf5<A, S, D>(filename: &str, varname: &str, array: &ArrayBase<S, D>) -> Result<()>
where
    A: H5Type,
    S: ndarray::Data<Elem = A>,
    D: Dimension,
{
    let inner = || -> hdf5::Result<()> {
        let file = if Path::new(filename).exists() {
            hdf5::File::append(filename)?
        } else {
            hdf5::File::create(filename)?
        };
        let dset = match file.dataset(varname) {
            Ok(dset) => dset,
            Err(..) => file
                .new_dataset::<A>()
                .no_chunk()
                .shape(array.shape())
                .create(varname)?,
        };
        dset.write(&array.view())
    };
    inner().map_err(|e| Error::io(filename, e))
}

/// Atomically move a fully written temporary file onto its final name
///
/// # Errors
/// The rename fails (missing temporary, permissions).
pub fn replace_file(tmp: &str, path: &str) -> Result<()> {
    std::fs::rename(tmp, path).map_err(|e| {
        Error::Config(format!(
            "cannot move checkpoint {} onto {}: {}",
            tmp, path, e
        ))
    })
}

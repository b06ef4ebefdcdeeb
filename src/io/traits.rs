//! `ReadWrite` trait
use super::read_write_hdf5::{read_from_hdf5, write_to_hdf5};
use crate::error::{Error, Result};
use ndarray::{ArrayBase, Data, DataMut, Dimension};

/// Read and write field data (hdf5)
pub trait ReadWrite<A> {
    /// Read field data from an hdf5 file into `self`
    ///
    /// # Errors
    /// File missing or stored shape differs from `self`.
    fn read(&mut self, filename: &str, varname: &str) -> Result<()>;
    /// Write field data to an hdf5 file
    ///
    /// # Errors
    /// File cannot be written.
    fn write(&self, filename: &str, varname: &str) -> Result<()>;
}

impl<S, D> ReadWrite<f64> for ArrayBase<S, D>
where
    S: Data<Elem = f64> + DataMut,
    D: Dimension,
{
    fn read(&mut self, filename: &str, varname: &str) -> Result<()> {
        let data = read_from_hdf5::<f64, D>(filename, varname)?;
        if data.shape() == self.shape() {
            self.assign(&data);
            Ok(())
        } else {
            Err(Error::ShapeMismatch {
                expected: self.shape().to_vec(),
                actual: data.shape().to_vec(),
            })
        }
    }

    fn write(&self, filename: &str, varname: &str) -> Result<()> {
        write_to_hdf5(filename, varname, &self)
    }
}

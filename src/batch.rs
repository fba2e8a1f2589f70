//! Batch container: an ordered list of co-indexed tensors.
//!
//! A `Batch` holds one or more tensors that share the same leading (batch)
//! dimension — typically the input itself plus auxiliary arrays such as
//! labels or masks. Normalization applies to the head tensor; auxiliaries
//! ride along through splitting and recombination unchanged.

use crate::{GhostNormError, Result};
use ndarray::ArrayD;

#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    arrays: Vec<ArrayD<T>>,
}

impl<T> Batch<T> {
    /// Creates a batch from co-indexed tensors.
    ///
    /// Fails if the list is empty, if any tensor is rank 0, or if the
    /// tensors disagree on their leading-dimension size.
    pub fn new(arrays: Vec<ArrayD<T>>) -> Result<Self> {
        let head = arrays.first().ok_or_else(|| {
            GhostNormError::invalid_shape("Batch::new", "batch must contain at least one tensor")
        })?;
        if head.ndim() == 0 {
            return Err(GhostNormError::invalid_shape(
                "Batch::new",
                "tensors must have a leading batch dimension, got rank 0",
            ));
        }
        let batch_size = head.shape()[0];
        for (i, array) in arrays.iter().enumerate().skip(1) {
            if array.ndim() == 0 || array.shape()[0] != batch_size {
                return Err(GhostNormError::invalid_shape(
                    "Batch::new",
                    format!(
                        "tensor {i} has leading dimension {}, expected {batch_size}",
                        if array.ndim() == 0 { 0 } else { array.shape()[0] }
                    ),
                ));
            }
        }
        Ok(Self { arrays })
    }

    /// Convenience constructor for the common single-tensor batch.
    pub fn single(array: ArrayD<T>) -> Result<Self> {
        Self::new(vec![array])
    }

    /// The tensor normalization statistics are computed from.
    pub fn head(&self) -> &ArrayD<T> {
        &self.arrays[0]
    }

    /// Size of the leading (batch) dimension.
    pub fn batch_size(&self) -> usize {
        self.arrays[0].shape()[0]
    }

    pub fn arrays(&self) -> &[ArrayD<T>] {
        &self.arrays
    }

    /// Number of co-indexed tensors in the batch.
    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn into_arrays(self) -> Vec<ArrayD<T>> {
        self.arrays
    }

    /// Consumes the batch, returning its head tensor.
    pub fn into_head(mut self) -> ArrayD<T> {
        self.arrays.swap_remove(0)
    }
}

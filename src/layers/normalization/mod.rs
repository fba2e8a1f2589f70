//! Normalization layers.
//!
//! - **BatchNorm**: standard batch normalization with training/inference
//!   modes and running statistics
//! - **GhostBatchNorm**: batch normalization over small virtual sub-batches
//!   of a larger mini-batch

pub mod batch_norm;
pub mod ghost_batch_norm;

pub use batch_norm::BatchNorm;
pub use ghost_batch_norm::{GhostBatchNorm, GhostBatchNormConfig};

use crate::{Batch, Result};
use ndarray::Array1;

/// Capability interface of a normalization primitive.
///
/// The ghost batch normalizer delegates to this per sub-batch: one instance
/// owns the learnable parameters and running-statistics accumulators shared
/// by every sub-batch, while mean/variance are computed from each sub-batch
/// alone.
pub trait Normalization<T> {
    /// Allocates learnable parameters and running statistics for
    /// `num_features` features. Must be called before any forward pass.
    fn initialize(&mut self, num_features: usize) -> Result<()>;

    fn is_initialized(&self) -> bool;

    /// Normalizes the batch head; auxiliary tensors pass through unchanged.
    fn forward_batch(&self, input: &Batch<T>, training: bool) -> Result<Batch<T>>;

    fn parameters(&self) -> Vec<&Array1<T>>;

    fn clone_box(&self) -> Box<dyn Normalization<T>>;
}

impl<T> Clone for Box<dyn Normalization<T>> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

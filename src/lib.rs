//! Ghost batch normalization.
//!
//! A training-time layer that normalizes statistics over small virtual
//! sub-batches ("ghost batches") of a larger mini-batch instead of the whole
//! batch. Each ghost batch computes its own mean and variance while sharing
//! the layer's learnable parameters and running-statistics accumulators; the
//! noisier per-group statistics improve generalization.
//!
//! # Usage
//!
//! ```
//! use ghostnorm::{Batch, GhostBatchNorm, GhostBatchNormConfig};
//! use ndarray::ArrayD;
//!
//! # fn main() -> ghostnorm::Result<()> {
//! let config = GhostBatchNormConfig {
//!     virtual_batch_size: 2,
//!     ..GhostBatchNormConfig::default()
//! };
//! let mut layer = GhostBatchNorm::<f32>::new(config)?;
//! layer.initialize(3)?;
//!
//! let input = Batch::single(ArrayD::zeros(vec![6, 3]))?;
//! let output = layer.forward_with(&input, true)?;
//! assert_eq!(output.head().shape(), input.head().shape());
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod batchifier;
pub mod error;
pub mod layers;

pub use batch::Batch;
pub use batchifier::{Batchifier, StackBatchifier};
pub use error::{GhostNormError, Result};
pub use layers::normalization::{BatchNorm, GhostBatchNorm, GhostBatchNormConfig, Normalization};
pub use layers::Layer;

//! Ghost Batch Normalization layer implementation
//!
//! Ghost batch normalization splits a mini-batch into smaller virtual
//! sub-batches ("ghost batches") and normalizes each one independently:
//! every ghost batch computes its own mean and variance while sharing the
//! layer's learnable parameters and running-statistics accumulators. The
//! noisier per-group statistics act as a regularizer. Outputs are
//! concatenated back in the original sample order, so the result has the
//! input's shape.

use crate::batchifier::{Batchifier, StackBatchifier};
use crate::layers::normalization::{BatchNorm, Normalization};
use crate::layers::Layer;
use crate::{Batch, GhostNormError, Result};
use ndarray::Array1;
use num_traits::Float;
use serde::{Deserialize, Serialize};

/// All recognized options, validated eagerly at construction.
///
/// The normalization options (`axis`, `center`, `scale`, `epsilon`,
/// `momentum`) are forwarded unchanged to the underlying primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostBatchNormConfig {
    /// Target size of each ghost batch. The last ghost batch may be smaller
    /// if the batch size is not evenly divisible.
    pub virtual_batch_size: usize,
    /// Feature axis to normalize over. Axis 0 is the batch dimension.
    pub axis: usize,
    /// Apply the learned shift (beta).
    pub center: bool,
    /// Apply the learned scale (gamma).
    pub scale: bool,
    /// Numerical-stability epsilon.
    pub epsilon: f32,
    /// EMA momentum for running statistics; weights the new observation.
    pub momentum: f32,
}

impl Default for GhostBatchNormConfig {
    fn default() -> Self {
        Self {
            virtual_batch_size: 128,
            axis: 1,
            center: true,
            scale: true,
            epsilon: 1e-5,
            momentum: 0.1,
        }
    }
}

impl GhostBatchNormConfig {
    pub fn validate(&self) -> Result<()> {
        if self.virtual_batch_size < 1 {
            return Err(GhostNormError::invalid_configuration(
                "GhostBatchNormConfig::validate",
                "virtual_batch_size must be at least 1",
            ));
        }
        if self.axis == 0 {
            return Err(GhostNormError::invalid_configuration(
                "GhostBatchNormConfig::validate",
                "axis 0 is the batch dimension and cannot be the feature axis",
            ));
        }
        if !(self.epsilon > 0.0) {
            return Err(GhostNormError::invalid_configuration(
                "GhostBatchNormConfig::validate",
                "epsilon must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.momentum) {
            return Err(GhostNormError::invalid_configuration(
                "GhostBatchNormConfig::validate",
                "momentum must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

pub struct GhostBatchNorm<T> {
    virtual_batch_size: usize,
    norm: Box<dyn Normalization<T>>,
    batchifier: StackBatchifier,
    training: bool,
}

impl<T> Clone for GhostBatchNorm<T> {
    fn clone(&self) -> Self {
        Self {
            virtual_batch_size: self.virtual_batch_size,
            norm: self.norm.clone_box(),
            batchifier: self.batchifier,
            training: self.training,
        }
    }
}

impl<T> GhostBatchNorm<T>
where
    T: Float + Send + Sync + 'static,
{
    /// Creates a layer backed by a [`BatchNorm`] primitive built from
    /// `config`. Call [`GhostBatchNorm::initialize`] before the first
    /// forward pass.
    pub fn new(config: GhostBatchNormConfig) -> Result<Self> {
        config.validate()?;
        let norm = BatchNorm::new()
            .with_axis(config.axis)
            .with_center(config.center)
            .with_scale(config.scale)
            .with_epsilon(config.epsilon)
            .with_momentum(config.momentum);
        Ok(Self {
            virtual_batch_size: config.virtual_batch_size,
            norm: Box::new(norm),
            batchifier: StackBatchifier::new(),
            training: false,
        })
    }

    /// Creates a layer delegating to a caller-supplied normalization
    /// primitive instead of the built-in [`BatchNorm`].
    pub fn with_normalization(
        virtual_batch_size: usize,
        norm: Box<dyn Normalization<T>>,
    ) -> Result<Self> {
        if virtual_batch_size < 1 {
            return Err(GhostNormError::invalid_configuration(
                "GhostBatchNorm::with_normalization",
                "virtual_batch_size must be at least 1",
            ));
        }
        Ok(Self {
            virtual_batch_size,
            norm,
            batchifier: StackBatchifier::new(),
            training: false,
        })
    }

    /// Allocates the primitive's learnable parameters and running
    /// statistics for `num_features` features.
    pub fn initialize(&mut self, num_features: usize) -> Result<()> {
        self.norm.initialize(num_features)
    }

    pub fn virtual_batch_size(&self) -> usize {
        self.virtual_batch_size
    }

    /// Changes the ghost batch size; affects only subsequent invocations.
    pub fn set_virtual_batch_size(&mut self, virtual_batch_size: usize) -> Result<()> {
        if virtual_batch_size < 1 {
            return Err(GhostNormError::invalid_configuration(
                "GhostBatchNorm::set_virtual_batch_size",
                "virtual_batch_size must be at least 1",
            ));
        }
        self.virtual_batch_size = virtual_batch_size;
        Ok(())
    }

    /// Splits `input` into `ceil(batch_size / virtual_batch_size)` ghost
    /// batches. When the batch size is divisible by the virtual batch size
    /// all groups share the same size; otherwise the last group is smaller.
    pub fn split(&self, input: &Batch<T>) -> Result<Vec<Batch<T>>> {
        let batch_size = input.batch_size();
        if batch_size == 0 {
            return Err(GhostNormError::invalid_shape(
                "GhostBatchNorm::split",
                "cannot split an empty batch",
            ));
        }
        let count_groups = batch_size.div_ceil(self.virtual_batch_size);
        self.batchifier.split(input, count_groups, true)
    }

    /// Forward pass with an explicit training flag.
    ///
    /// Each ghost batch is normalized independently with its own statistics;
    /// in training mode the shared running accumulators are updated once per
    /// ghost batch, in sub-batch index order.
    pub fn forward_with(&self, input: &Batch<T>, training: bool) -> Result<Batch<T>> {
        if !self.norm.is_initialized() {
            return Err(GhostNormError::uninitialized(
                "GhostBatchNorm::forward",
                "call initialize(num_features) before the first forward pass",
            ));
        }
        let groups = self.split(input)?;
        let mut normalized = Vec::with_capacity(groups.len());
        for group in &groups {
            normalized.push(self.norm.forward_batch(group, training)?);
        }
        self.batchifier.batchify(&normalized)
    }
}

impl<T> Layer<T> for GhostBatchNorm<T>
where
    T: Float + Send + Sync + 'static,
{
    fn forward(&self, input: &Batch<T>) -> Result<Batch<T>> {
        self.forward_with(input, self.training)
    }

    fn parameters(&self) -> Vec<&Array1<T>> {
        self.norm.parameters()
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn clone_box(&self) -> Box<dyn Layer<T>> {
        Box::new(self.clone())
    }
}

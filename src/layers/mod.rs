pub mod normalization;

pub use normalization::{BatchNorm, GhostBatchNorm, GhostBatchNormConfig, Normalization};

use crate::{Batch, Result};
use ndarray::Array1;

pub trait Layer<T> {
    fn forward(&self, input: &Batch<T>) -> Result<Batch<T>>;
    fn parameters(&self) -> Vec<&Array1<T>>;
    fn set_training(&mut self, training: bool);
    fn clone_box(&self) -> Box<dyn Layer<T>>;
}

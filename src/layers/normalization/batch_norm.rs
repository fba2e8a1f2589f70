//! Batch Normalization layer implementation
//!
//! Batch Normalization normalizes the input by subtracting the batch mean and
//! dividing by the batch standard deviation, then applying learned scale and
//! shift parameters. Parameters are allocated lazily via [`BatchNorm::initialize`]
//! so the layer can be configured before the feature count is known.

use crate::layers::normalization::Normalization;
use crate::layers::Layer;
use crate::{Batch, GhostNormError, Result};
use ndarray::{Array1, ArrayD, Axis, Zip};
use num_traits::Float;
use std::cell::RefCell;

#[derive(Debug, Clone)]
struct BatchNormParams<T> {
    gamma: Array1<T>,
    beta: Array1<T>,
    running_mean: RefCell<Array1<T>>,
    running_var: RefCell<Array1<T>>,
}

#[derive(Debug, Clone)]
pub struct BatchNorm<T> {
    axis: usize,
    center: bool,
    scale: bool,
    epsilon: f32,
    momentum: f32,
    params: Option<BatchNormParams<T>>,
    training: bool,
}

impl<T> Default for BatchNorm<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BatchNorm<T> {
    /// Creates an uninitialized layer with default options. Call
    /// [`BatchNorm::initialize`] before the first forward pass.
    pub fn new() -> Self {
        Self {
            axis: 1,
            center: true,
            scale: true,
            epsilon: 1e-5,
            momentum: 0.1,
            params: None,
            training: false,
        }
    }

    /// Set the feature axis to normalize over. Axis 0 is the batch dimension.
    pub fn with_axis(mut self, axis: usize) -> Self {
        self.axis = axis;
        self
    }

    /// Set whether the learned shift (beta) is applied.
    pub fn with_center(mut self, center: bool) -> Self {
        self.center = center;
        self
    }

    /// Set whether the learned scale (gamma) is applied.
    pub fn with_scale(mut self, scale: bool) -> Self {
        self.scale = scale;
        self
    }

    /// Set the epsilon value for numerical stability.
    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Set the momentum for exponential moving average of running statistics.
    /// The momentum weights the new observation.
    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn num_features(&self) -> Option<usize> {
        self.params.as_ref().map(|p| p.gamma.len())
    }
}

impl<T> BatchNorm<T>
where
    T: Float + Send + Sync + 'static,
{
    /// Snapshot of the running mean/variance accumulators, if initialized.
    pub fn running_statistics(&self) -> Option<(Array1<T>, Array1<T>)> {
        self.params
            .as_ref()
            .map(|p| (p.running_mean.borrow().clone(), p.running_var.borrow().clone()))
    }

    /// Normalizes a single tensor.
    ///
    /// In training mode statistics come from this tensor's samples and the
    /// running accumulators are updated once; in inference mode the running
    /// statistics are used instead.
    pub fn forward_array(&self, input: &ArrayD<T>, training: bool) -> Result<ArrayD<T>> {
        let params = self.params.as_ref().ok_or_else(|| {
            GhostNormError::uninitialized(
                "BatchNorm::forward",
                "call initialize(num_features) before the first forward pass",
            )
        })?;

        let ndim = input.ndim();
        if ndim < 2 {
            return Err(GhostNormError::invalid_shape(
                "BatchNorm::forward",
                format!("expected at least 2D input, got {ndim}D"),
            ));
        }
        if self.axis == 0 || self.axis >= ndim {
            return Err(GhostNormError::invalid_shape(
                "BatchNorm::forward",
                format!("feature axis {} out of range for {ndim}D input", self.axis),
            ));
        }
        if input.shape()[0] == 0 || input.len() == 0 {
            return Err(GhostNormError::invalid_shape(
                "BatchNorm::forward",
                "cannot normalize an empty batch",
            ));
        }
        let num_features = input.shape()[self.axis];
        if num_features != params.gamma.len() {
            return Err(GhostNormError::invalid_shape(
                "BatchNorm::forward",
                format!("expected {} features, got {num_features}", params.gamma.len()),
            ));
        }

        let (mean, var) = if training {
            self.batch_statistics(input, num_features)
        } else {
            (
                params.running_mean.borrow().clone(),
                params.running_var.borrow().clone(),
            )
        };

        let eps = T::from(self.epsilon).unwrap();
        let mut output = input.to_owned();
        for (f, mut lane) in output.axis_iter_mut(Axis(self.axis)).enumerate() {
            let inv_std = (var[f] + eps).sqrt().recip();
            let m = mean[f];
            let g = if self.scale { params.gamma[f] } else { T::one() };
            let b = if self.center { params.beta[f] } else { T::zero() };
            lane.mapv_inplace(|x| (x - m) * inv_std * g + b);
        }

        if training {
            // running = (1 - momentum) * running + momentum * batch_stat
            let momentum = T::from(self.momentum).unwrap();
            let keep = T::one() - momentum;
            {
                let mut running_mean = params.running_mean.borrow_mut();
                Zip::from(&mut *running_mean)
                    .and(&mean)
                    .for_each(|r, &m| *r = *r * keep + m * momentum);
            }
            {
                let mut running_var = params.running_var.borrow_mut();
                Zip::from(&mut *running_var)
                    .and(&var)
                    .for_each(|r, &v| *r = *r * keep + v * momentum);
            }
        }

        Ok(output)
    }

    /// Per-feature mean and biased variance over all non-feature axes.
    fn batch_statistics(
        &self,
        input: &ArrayD<T>,
        num_features: usize,
    ) -> (Array1<T>, Array1<T>) {
        let mut mean = Array1::<T>::zeros(num_features);
        let mut var = Array1::<T>::zeros(num_features);
        for (f, lane) in input.axis_iter(Axis(self.axis)).enumerate() {
            let count = T::from(lane.len()).unwrap();
            let m = lane.sum() / count;
            let v = lane.fold(T::zero(), |acc, &x| acc + (x - m) * (x - m)) / count;
            mean[f] = m;
            var[f] = v;
        }
        (mean, var)
    }
}

impl<T> Normalization<T> for BatchNorm<T>
where
    T: Float + Send + Sync + 'static,
{
    fn initialize(&mut self, num_features: usize) -> Result<()> {
        if num_features < 1 {
            return Err(GhostNormError::invalid_configuration(
                "BatchNorm::initialize",
                "num_features must be at least 1",
            ));
        }
        self.params = Some(BatchNormParams {
            gamma: Array1::ones(num_features),
            beta: Array1::zeros(num_features),
            running_mean: RefCell::new(Array1::zeros(num_features)),
            running_var: RefCell::new(Array1::ones(num_features)),
        });
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.params.is_some()
    }

    fn forward_batch(&self, input: &Batch<T>, training: bool) -> Result<Batch<T>> {
        let mut arrays = Vec::with_capacity(input.len());
        arrays.push(self.forward_array(input.head(), training)?);
        arrays.extend(input.arrays()[1..].iter().cloned());
        Batch::new(arrays)
    }

    fn parameters(&self) -> Vec<&Array1<T>> {
        match &self.params {
            Some(p) => vec![&p.gamma, &p.beta],
            None => Vec::new(),
        }
    }

    fn clone_box(&self) -> Box<dyn Normalization<T>> {
        Box::new(self.clone())
    }
}

impl<T> Layer<T> for BatchNorm<T>
where
    T: Float + Send + Sync + 'static,
{
    fn forward(&self, input: &Batch<T>) -> Result<Batch<T>> {
        self.forward_batch(input, self.training)
    }

    fn parameters(&self) -> Vec<&Array1<T>> {
        Normalization::parameters(self)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn clone_box(&self) -> Box<dyn Layer<T>> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{ArrayD, IxDyn};

    fn init_norm(num_features: usize) -> BatchNorm<f32> {
        let mut norm = BatchNorm::new();
        norm.initialize(num_features).unwrap();
        norm
    }

    #[test]
    fn test_batch_norm_creation() {
        let norm = BatchNorm::<f32>::new();
        assert!(!norm.is_initialized());
        assert_eq!(norm.num_features(), None);
    }

    #[test]
    fn test_batch_norm_builder_pattern() {
        let norm = BatchNorm::<f32>::new()
            .with_momentum(0.05)
            .with_epsilon(1e-6)
            .with_center(false)
            .with_scale(false)
            .with_axis(2);
        assert_eq!(norm.momentum, 0.05);
        assert_eq!(norm.epsilon, 1e-6);
        assert!(!norm.center);
        assert!(!norm.scale);
        assert_eq!(norm.axis, 2);
    }

    #[test]
    fn test_batch_norm_parameters() {
        let norm = init_norm(32);
        let params = Normalization::parameters(&norm);
        assert_eq!(params.len(), 2); // gamma and beta
        assert_eq!(params[0].len(), 32);
    }

    #[test]
    fn test_forward_before_initialize_fails() {
        let norm = BatchNorm::<f32>::new();
        let input = ArrayD::<f32>::zeros(vec![4, 3]);
        let result = norm.forward_array(&input, true);
        assert!(matches!(
            result,
            Err(GhostNormError::UninitializedParameters { .. })
        ));
    }

    #[test]
    fn test_training_forward_normalizes_features() {
        let norm = init_norm(2);
        let input = ArrayD::from_shape_vec(
            IxDyn(&[4, 2]),
            vec![1.0f32, 10.0, 2.0, 20.0, 3.0, 30.0, 4.0, 40.0],
        )
        .unwrap();
        let output = norm.forward_array(&input, true).unwrap();

        for f in 0..2 {
            let lane = output.index_axis(Axis(1), f);
            let mean: f32 = lane.sum() / 4.0;
            let var: f32 = lane.fold(0.0, |acc, &x| acc + (x - mean) * (x - mean)) / 4.0;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-5);
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_running_statistics_ema_update() {
        let mut norm = BatchNorm::<f32>::new().with_momentum(0.5);
        norm.initialize(1).unwrap();
        let input =
            ArrayD::from_shape_vec(IxDyn(&[2, 1]), vec![1.0f32, 3.0]).unwrap();
        norm.forward_array(&input, true).unwrap();

        // batch mean 2.0, biased variance 1.0
        let (mean, var) = norm.running_statistics().unwrap();
        assert_abs_diff_eq!(mean[0], 1.0, epsilon = 1e-6); // 0.5*0 + 0.5*2
        assert_abs_diff_eq!(var[0], 1.0, epsilon = 1e-6); // 0.5*1 + 0.5*1
    }

    #[test]
    fn test_inference_uses_running_statistics() {
        let norm = init_norm(2);
        // Freshly initialized running stats are mean 0, var 1, so inference
        // is close to identity.
        let input = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let output = norm.forward_array(&input, false).unwrap();
        for (o, i) in output.iter().zip(input.iter()) {
            assert_abs_diff_eq!(*o, *i, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_feature_count_mismatch_fails() {
        let norm = init_norm(3);
        let input = ArrayD::<f32>::zeros(vec![4, 2]);
        let result = norm.forward_array(&input, true);
        assert!(matches!(result, Err(GhostNormError::InvalidShape { .. })));
    }

    #[test]
    fn test_one_dimensional_input_fails() {
        let norm = init_norm(3);
        let input = ArrayD::<f32>::zeros(vec![3]);
        let result = norm.forward_array(&input, true);
        assert!(matches!(result, Err(GhostNormError::InvalidShape { .. })));
    }

    #[test]
    fn test_auxiliary_tensors_pass_through() {
        let norm = init_norm(2);
        let input = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let labels = ArrayD::from_shape_vec(IxDyn(&[2]), vec![7.0f32, 8.0]).unwrap();
        let batch = Batch::new(vec![input, labels.clone()]).unwrap();
        let output = norm.forward_batch(&batch, true).unwrap();
        assert_eq!(output.arrays()[1], labels);
    }
}

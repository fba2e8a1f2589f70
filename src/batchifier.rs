//! Splitting a batch along its leading dimension and the inverse
//! recombination ("batchify").
//!
//! `split` partitions every tensor in a [`Batch`] into `count_groups`
//! contiguous groups; `batchify` concatenates a sequence of batches back
//! together in order. Concatenating the groups returned by `split`
//! reconstructs the original batch exactly.

use crate::{Batch, GhostNormError, Result};
use ndarray::{concatenate, Axis, Slice};

pub trait Batchifier<T> {
    /// Splits `batch` into `count_groups` ordered, contiguous groups along
    /// the leading dimension.
    ///
    /// With `allow_uneven` the last group may be smaller than the others;
    /// without it, a batch size not divisible by `count_groups` is an error.
    fn split(&self, batch: &Batch<T>, count_groups: usize, allow_uneven: bool)
        -> Result<Vec<Batch<T>>>;

    /// Concatenates `parts` back into a single batch, preserving order.
    /// Exact inverse of [`Batchifier::split`].
    fn batchify(&self, parts: &[Batch<T>]) -> Result<Batch<T>>;
}

/// Batchifier that slices and concatenates along the leading dimension.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackBatchifier;

impl StackBatchifier {
    pub fn new() -> Self {
        StackBatchifier
    }
}

impl<T: Clone> Batchifier<T> for StackBatchifier {
    fn split(
        &self,
        batch: &Batch<T>,
        count_groups: usize,
        allow_uneven: bool,
    ) -> Result<Vec<Batch<T>>> {
        let batch_size = batch.batch_size();
        if batch_size == 0 {
            return Err(GhostNormError::invalid_shape(
                "split",
                "cannot split an empty batch",
            ));
        }
        if count_groups < 1 {
            return Err(GhostNormError::invalid_configuration(
                "split",
                "count_groups must be at least 1",
            ));
        }

        // Never produce more groups than there are samples.
        let count_groups = count_groups.min(batch_size);

        if !allow_uneven && batch_size % count_groups != 0 {
            return Err(GhostNormError::invalid_shape(
                "split",
                format!(
                    "batch size {batch_size} is not divisible into {count_groups} equal groups"
                ),
            ));
        }

        let step = batch_size.div_ceil(count_groups);
        let mut groups = Vec::with_capacity(count_groups);
        for i in 0..count_groups {
            let start = i * step;
            if start >= batch_size {
                return Err(GhostNormError::invalid_shape(
                    "split",
                    format!(
                        "cannot split {batch_size} samples into {count_groups} groups of {step}"
                    ),
                ));
            }
            let end = (start + step).min(batch_size);
            let arrays = batch
                .arrays()
                .iter()
                .map(|a| a.slice_axis(Axis(0), Slice::from(start..end)).to_owned())
                .collect();
            groups.push(Batch::new(arrays)?);
        }
        Ok(groups)
    }

    fn batchify(&self, parts: &[Batch<T>]) -> Result<Batch<T>> {
        let first = parts.first().ok_or_else(|| {
            GhostNormError::invalid_shape("batchify", "no sub-batches to recombine")
        })?;
        let arity = first.len();
        for (i, part) in parts.iter().enumerate() {
            if part.len() != arity {
                return Err(GhostNormError::invalid_shape(
                    "batchify",
                    format!(
                        "sub-batch {i} holds {} tensors, expected {arity}",
                        part.len()
                    ),
                ));
            }
        }

        let mut arrays = Vec::with_capacity(arity);
        for k in 0..arity {
            let views: Vec<_> = parts.iter().map(|p| p.arrays()[k].view()).collect();
            let merged = concatenate(Axis(0), &views).map_err(|e| {
                GhostNormError::invalid_shape(
                    "batchify",
                    format!("tensor column {k} cannot be concatenated: {e}"),
                )
            })?;
            arrays.push(merged);
        }
        Batch::new(arrays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};
    use proptest::prelude::*;

    fn counted_batch(batch_size: usize, features: usize) -> Batch<f32> {
        let data: Vec<f32> = (0..batch_size * features).map(|i| i as f32).collect();
        Batch::single(ArrayD::from_shape_vec(IxDyn(&[batch_size, features]), data).unwrap())
            .unwrap()
    }

    #[test]
    fn test_even_split_sizes() {
        let batch = counted_batch(6, 4);
        let groups = StackBatchifier.split(&batch, 3, true).unwrap();
        assert_eq!(groups.len(), 3);
        for group in &groups {
            assert_eq!(group.batch_size(), 2);
        }
    }

    #[test]
    fn test_uneven_split_last_group_smaller() {
        let batch = counted_batch(7, 2);
        let groups = StackBatchifier.split(&batch, 3, true).unwrap();
        let sizes: Vec<usize> = groups.iter().map(|g| g.batch_size()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_split_preserves_sample_order() {
        let batch = counted_batch(5, 2);
        let groups = StackBatchifier.split(&batch, 2, true).unwrap();
        assert_eq!(groups[0].head()[[0, 0]], 0.0);
        assert_eq!(groups[0].head()[[2, 1]], 5.0);
        assert_eq!(groups[1].head()[[0, 0]], 6.0);
        assert_eq!(groups[1].head()[[1, 1]], 9.0);
    }

    #[test]
    fn test_even_split_required_rejects_remainder() {
        let batch = counted_batch(7, 2);
        let result = StackBatchifier.split(&batch, 3, false);
        assert!(matches!(result, Err(GhostNormError::InvalidShape { .. })));
    }

    #[test]
    fn test_group_count_clamped_to_batch_size() {
        let batch = counted_batch(2, 3);
        let groups = StackBatchifier.split(&batch, 8, true).unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let batch = Batch::single(ArrayD::<f32>::zeros(vec![0, 3])).unwrap();
        let result = StackBatchifier.split(&batch, 1, true);
        assert!(matches!(result, Err(GhostNormError::InvalidShape { .. })));
    }

    #[test]
    fn test_zero_groups_rejected() {
        let batch = counted_batch(4, 2);
        let result = StackBatchifier.split(&batch, 0, true);
        assert!(matches!(
            result,
            Err(GhostNormError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_infeasible_group_count_rejected() {
        // Splitting 6 samples into 4 equal steps of 2 leaves the last group
        // empty; there is no equal-except-last partition here.
        let batch = counted_batch(6, 2);
        let result = StackBatchifier.split(&batch, 4, true);
        assert!(matches!(result, Err(GhostNormError::InvalidShape { .. })));
    }

    #[test]
    fn test_batchify_restores_auxiliary_tensors() {
        let input = ArrayD::from_shape_vec(IxDyn(&[4, 2]), (0..8).map(|i| i as f32).collect())
            .unwrap();
        let labels =
            ArrayD::from_shape_vec(IxDyn(&[4]), vec![10.0f32, 11.0, 12.0, 13.0]).unwrap();
        let batch = Batch::new(vec![input, labels]).unwrap();
        let groups = StackBatchifier.split(&batch, 2, true).unwrap();
        let merged = StackBatchifier.batchify(&groups).unwrap();
        assert_eq!(merged, batch);
    }

    #[test]
    fn test_batchify_of_nothing_rejected() {
        let result = StackBatchifier.batchify(&[] as &[Batch<f32>]);
        assert!(matches!(result, Err(GhostNormError::InvalidShape { .. })));
    }

    #[test]
    fn test_batchify_mismatched_arity_rejected() {
        let a = counted_batch(2, 2);
        let b = Batch::new(vec![
            ArrayD::<f32>::zeros(vec![2, 2]),
            ArrayD::<f32>::zeros(vec![2]),
        ])
        .unwrap();
        let result = StackBatchifier.batchify(&[a, b]);
        assert!(matches!(result, Err(GhostNormError::InvalidShape { .. })));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_split_batchify_round_trip(
            batch_size in 1usize..96,
            virtual_batch_size in 1usize..96,
            features in 1usize..6,
        ) {
            let batch = counted_batch(batch_size, features);
            let count_groups = batch_size.div_ceil(virtual_batch_size);
            let groups = StackBatchifier.split(&batch, count_groups, true).unwrap();

            prop_assert_eq!(groups.len(), count_groups);
            let total: usize = groups.iter().map(|g| g.batch_size()).sum();
            prop_assert_eq!(total, batch_size);

            let merged = StackBatchifier.batchify(&groups).unwrap();
            prop_assert_eq!(merged, batch);
        }
    }
}

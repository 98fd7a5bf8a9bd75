//! Contract checks on classifier output and dataset labels
//!
//! Run before any cache mutation so a misbehaving adapter can never leave a
//! malformed entry behind.

use tracing::warn;

use crate::classifier::Inference;
use crate::constants::{EMBEDDING_NORM_TOLERANCE, PROBABILITY_SUM_TOLERANCE};
use crate::errors::{AdaptError, Result};
use crate::similarity::is_normalized;

/// Validate one inference against the class count and the embedding
/// dimension established by earlier samples (if any).
pub fn validate_inference(
    inference: &Inference,
    num_classes: usize,
    expected_dim: Option<usize>,
) -> Result<()> {
    if inference.logits.len() != num_classes {
        return Err(AdaptError::DimensionMismatch {
            context: "baseline logits",
            expected: num_classes,
            actual: inference.logits.len(),
        });
    }

    if inference.probability_map.len() != num_classes {
        return Err(AdaptError::DimensionMismatch {
            context: "probability map",
            expected: num_classes,
            actual: inference.probability_map.len(),
        });
    }

    if inference.predicted >= num_classes {
        return Err(AdaptError::Classifier(format!(
            "predicted label {} outside 0..{num_classes}",
            inference.predicted
        )));
    }

    if inference.embedding.dim() == 0 {
        return Err(AdaptError::Classifier("embedding is empty".to_string()));
    }

    if !is_normalized(&inference.embedding, EMBEDDING_NORM_TOLERANCE) {
        return Err(AdaptError::Classifier(
            "embedding is not L2-normalized (zero or non-finite features?)".to_string(),
        ));
    }

    if let Some(expected) = expected_dim {
        if inference.embedding.dim() != expected {
            return Err(AdaptError::DimensionMismatch {
                context: "embedding",
                expected,
                actual: inference.embedding.dim(),
            });
        }
    }

    if !inference.loss.is_finite() || inference.loss < 0.0 {
        return Err(AdaptError::Classifier(format!(
            "loss must be a finite non-negative entropy, got {}",
            inference.loss
        )));
    }

    let sum: f32 = inference.probability_map.iter().sum();
    if (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
        warn!(sum, "probability map does not sum to 1");
    }

    Ok(())
}

/// Validate a ground-truth label
pub fn validate_label(label: usize, num_classes: usize) -> Result<()> {
    if label >= num_classes {
        return Err(AdaptError::Dataset(format!(
            "ground-truth label {label} outside 0..{num_classes}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Embedding;

    fn inference() -> Inference {
        Inference::from_logits(Embedding::new(vec![1.0, 0.0]), vec![2.0, 1.0, 0.5])
    }

    #[test]
    fn test_valid_inference() {
        assert!(validate_inference(&inference(), 3, None).is_ok());
        assert!(validate_inference(&inference(), 3, Some(2)).is_ok());
    }

    #[test]
    fn test_logit_length_mismatch() {
        let err = validate_inference(&inference(), 4, None).unwrap_err();
        assert_eq!(err.code(), "DIMENSION_MISMATCH");
    }

    #[test]
    fn test_embedding_dimension_drift() {
        let err = validate_inference(&inference(), 3, Some(512)).unwrap_err();
        assert!(matches!(
            err,
            AdaptError::DimensionMismatch {
                context: "embedding",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_embedding_is_rejected() {
        let inf = Inference::from_logits(Embedding::new(vec![0.0, 0.0]), vec![2.0, 1.0, 0.5]);
        let err = validate_inference(&inf, 3, None).unwrap_err();
        assert_eq!(err.code(), "CLASSIFIER_ERROR");
    }

    #[test]
    fn test_predicted_out_of_range() {
        let mut inf = inference();
        inf.predicted = 3;
        assert!(validate_inference(&inf, 3, None).is_err());
    }

    #[test]
    fn test_label_range() {
        assert!(validate_label(2, 3).is_ok());
        assert!(validate_label(3, 3).is_err());
    }
}

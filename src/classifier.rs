//! Classifier capability consumed by the adaptation loop
//!
//! The engine never looks inside the model. It only needs, per input, the
//! five-tuple in [`Inference`]: a normalized embedding, baseline logits, the
//! prediction entropy, the softmax probability map and the arg-max label.
//!
//! [`PrototypeClassifier`] is the zero-shot adapter used by the CLI: one
//! normalized prototype (text embedding) per class, cosine logits scaled by
//! [`ZERO_SHOT_LOGIT_SCALE`].

use crate::cache::Embedding;
use crate::constants::{MIN_NUM_CLASSES, ZERO_SHOT_LOGIT_SCALE};
use crate::errors::{AdaptError, Result};
use crate::similarity::dot_product;

/// Output of one classifier call
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    pub embedding: Embedding,
    /// Baseline logits, one per class
    pub logits: Vec<f32>,
    /// Entropy of the softmax output, in nats
    pub loss: f32,
    /// Softmax of `logits`
    pub probability_map: Vec<f32>,
    /// Arg-max of `logits`
    pub predicted: usize,
}

impl Inference {
    /// Derive probability map, entropy and prediction from raw logits
    pub fn from_logits(embedding: Embedding, logits: Vec<f32>) -> Self {
        let probability_map = softmax(&logits);
        let loss = entropy(&probability_map);
        let predicted = argmax(&logits).unwrap_or(0);
        Self {
            embedding,
            logits,
            loss,
            probability_map,
            predicted,
        }
    }
}

/// Trait for frozen classifiers driven by the adaptation loop
pub trait Classifier {
    /// Whatever the adapter consumes per sample
    type Input;

    /// Classify one input
    fn infer(&self, input: &Self::Input) -> Result<Inference>;

    /// Number of output classes
    fn num_classes(&self) -> usize;
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max_logit = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|x| (x - max_logit).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Shannon entropy in nats; zero-probability terms contribute nothing
pub fn entropy(probabilities: &[f32]) -> f32 {
    -probabilities
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| p * p.ln())
        .sum::<f32>()
}

/// Index of the first maximum; `None` for an empty slice
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((idx, v)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Entropy scaled into `[0, 1]` by the maximum entropy `ln(num_classes)`
#[inline]
pub fn normalized_entropy(loss: f32, num_classes: usize) -> f32 {
    loss / (num_classes as f32).ln()
}

/// Zero-shot classifier over fixed class prototypes
#[derive(Debug, Clone)]
pub struct PrototypeClassifier {
    prototypes: Vec<Embedding>,
    dim: usize,
    logit_scale: f32,
}

impl PrototypeClassifier {
    /// Build from raw per-class prototype vectors; each is L2-normalized.
    pub fn new(prototypes: Vec<Vec<f32>>) -> Result<Self> {
        if prototypes.len() < MIN_NUM_CLASSES {
            return Err(AdaptError::invalid_config(
                "prototypes",
                format!(
                    "need at least {MIN_NUM_CLASSES} classes, got {}",
                    prototypes.len()
                ),
            ));
        }
        let dim = prototypes[0].len();
        if dim == 0 {
            return Err(AdaptError::invalid_config(
                "prototypes",
                "prototype vectors must not be empty",
            ));
        }
        if let Some(bad) = prototypes.iter().find(|p| p.len() != dim) {
            return Err(AdaptError::DimensionMismatch {
                context: "class prototype",
                expected: dim,
                actual: bad.len(),
            });
        }

        Ok(Self {
            prototypes: prototypes.into_iter().map(Embedding::new).collect(),
            dim,
            logit_scale: ZERO_SHOT_LOGIT_SCALE,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl Classifier for PrototypeClassifier {
    type Input = Vec<f32>;

    fn infer(&self, input: &Vec<f32>) -> Result<Inference> {
        if input.len() != self.dim {
            return Err(AdaptError::DimensionMismatch {
                context: "classifier input",
                expected: self.dim,
                actual: input.len(),
            });
        }
        if input.iter().any(|v| !v.is_finite()) {
            return Err(AdaptError::Classifier(
                "input features contain NaN or Inf values".to_string(),
            ));
        }

        let embedding = Embedding::new(input.clone());
        let logits: Vec<f32> = self
            .prototypes
            .iter()
            .map(|proto| self.logit_scale * dot_product(&embedding, proto))
            .collect();

        Ok(Inference::from_logits(embedding, logits))
    }

    fn num_classes(&self) -> usize {
        self.prototypes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(p[2] > p[1] && p[1] > p[0]);

        // Large logits must not overflow
        let p = softmax(&[1000.0, 0.0]);
        assert!((p[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_entropy_extremes() {
        assert_eq!(entropy(&[1.0, 0.0, 0.0]), 0.0);
        let uniform = entropy(&[0.25; 4]);
        assert!((uniform - 4.0f32.ln()).abs() < 1e-6);
        assert!((normalized_entropy(uniform, 4) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_argmax_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[f32::NAN, 0.3, 0.1]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_prototype_classifier() {
        let clf = PrototypeClassifier::new(vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 2.0],
        ])
        .unwrap();
        assert_eq!(clf.num_classes(), 3);

        let out = clf.infer(&vec![0.1, 0.0, 3.0]).unwrap();
        assert_eq!(out.predicted, 2);
        assert_eq!(out.logits.len(), 3);
        assert!((out.embedding.iter().map(|v| v * v).sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(out.logits[2] <= ZERO_SHOT_LOGIT_SCALE + 1e-3);
        assert!(out.loss >= 0.0);
    }

    #[test]
    fn test_prototype_classifier_rejects_bad_shapes() {
        assert!(PrototypeClassifier::new(vec![vec![1.0]]).is_err());
        assert!(PrototypeClassifier::new(vec![vec![1.0, 0.0], vec![1.0]]).is_err());

        let clf = PrototypeClassifier::new(vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        let err = clf.infer(&vec![1.0, 0.0, 0.0]).unwrap_err();
        assert_eq!(err.code(), "DIMENSION_MISMATCH");
    }
}

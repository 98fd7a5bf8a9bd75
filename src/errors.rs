//! Structured error types for the adaptation engine
//!
//! Every failure the core can raise is an [`AdaptError`] variant with a stable
//! machine-readable code. Configuration and contract violations abort a run;
//! telemetry failures are isolated by the caller and never stop adaptation.

use crate::cache::CacheKind;

/// Result alias used throughout the core
pub type Result<T> = std::result::Result<T, AdaptError>;

/// Errors raised by the cache engine, the scorer and the orchestrator
#[derive(Debug, thiserror::Error)]
pub enum AdaptError {
    /// Capacity of zero, malformed threshold window, or missing hyperparameter
    #[error("Invalid config for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Scorer invoked on a store with no entries
    #[error("{0} cache is empty")]
    EmptyCache(CacheKind),

    /// Vector length disagrees with the established contract
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A size computation met a value that is not a finite number
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// The classifier adapter failed to produce an inference
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// The dataset adapter produced a malformed record
    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AdaptError {
    /// Shorthand for an [`AdaptError::InvalidConfig`]
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Get error code for log and report identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::EmptyCache(_) => "EMPTY_CACHE",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::TypeMismatch(_) => "TYPE_MISMATCH",
            Self::Classifier(_) => "CLASSIFIER_ERROR",
            Self::Dataset(_) => "DATASET_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Whether this error must abort the run.
    ///
    /// Only telemetry size failures are recoverable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::TypeMismatch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AdaptError::invalid_config("positive.shot_capacity", "must be >= 1").code(),
            "INVALID_CONFIG"
        );
        assert_eq!(
            AdaptError::EmptyCache(CacheKind::Negative).code(),
            "EMPTY_CACHE"
        );
        assert_eq!(AdaptError::TypeMismatch("NaN".into()).code(), "TYPE_MISMATCH");
    }

    #[test]
    fn test_only_type_mismatch_is_recoverable() {
        assert!(!AdaptError::TypeMismatch("NaN".into()).is_fatal());
        assert!(AdaptError::EmptyCache(CacheKind::Positive).is_fatal());
        assert!(AdaptError::DimensionMismatch {
            context: "query",
            expected: 512,
            actual: 1024
        }
        .is_fatal());
    }

    #[test]
    fn test_messages() {
        let err = AdaptError::DimensionMismatch {
            context: "affinity query",
            expected: 3,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            "Dimension mismatch in affinity query: expected 3, got 4"
        );
        assert_eq!(
            AdaptError::EmptyCache(CacheKind::Positive).to_string(),
            "positive cache is empty"
        );
    }
}

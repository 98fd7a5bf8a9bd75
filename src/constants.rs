//! Documented constants for the adaptation engine
//!
//! Centralizing constants prevents magic numbers and makes tuning easier.

// =============================================================================
// CLASSIFIER CONSTANTS
// =============================================================================

/// Temperature applied to cosine logits of the zero-shot classifier
///
/// Contrastive image-text models learn a logit scale that saturates at 100.
/// Logits are `100 * cos(image, class_prototype)`.
pub const ZERO_SHOT_LOGIT_SCALE: f32 = 100.0;

/// Minimum number of classes for a meaningful entropy normalization
///
/// Normalized entropy divides by `ln(num_classes)`, which is zero for a
/// single class.
pub const MIN_NUM_CLASSES: usize = 2;

// =============================================================================
// TELEMETRY CONSTANTS
// =============================================================================

/// Samples between two telemetry records
///
/// Records are also emitted for the first sample and at stream end.
pub const DEFAULT_TELEMETRY_INTERVAL: usize = 1000;

/// Upper clamp for the telemetry interval taken from the environment
pub const MAX_TELEMETRY_INTERVAL: usize = 10_000_000;

// =============================================================================
// PATH DEFAULTS
// =============================================================================

/// Default directory for per-dataset telemetry log files
pub const DEFAULT_LOG_DIR: &str = ".";

/// Default root holding one directory per dataset
pub const DEFAULT_DATA_ROOT: &str = "./dataset/";

/// File inside a dataset directory with class names and prototype weights
pub const PROTOTYPES_FILE: &str = "prototypes.json";

/// File inside a dataset directory with one JSON sample per line
pub const FEATURES_FILE: &str = "features.jsonl";

// =============================================================================
// VALIDATION TOLERANCES
// =============================================================================

/// Allowed deviation of a probability map's sum from 1.0
pub const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

/// Allowed deviation of an embedding's squared L2 norm from 1.0
pub const EMBEDDING_NORM_TOLERANCE: f32 = 1e-3;

//! tda-cache Library
//!
//! Training-free test-time adaptation for frozen zero-shot classifiers.
//!
//! # Key Features
//! - Dual adaptive cache: a positive cache reinforcing confident predictions
//!   and a negative cache suppressing likely mislabelings
//! - Bounded per-class buckets that keep the lowest-loss observations
//! - Affinity-kernel logit adjustment, `alpha * exp(-beta * (1 - cos))`
//! - Entropy gating for negative-cache admission
//!
//! # Pipeline
//! classifier → (embedding, logits, loss, probability map, label)
//! → cache update → affinity scoring → adjusted logits → accuracy

pub mod adapter;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod dataset;
pub mod errors;
pub mod metrics;
pub mod similarity;
pub mod telemetry;
pub mod tracing_setup;
pub mod validation;

pub use adapter::{CacheUpdate, RunReport, SampleOutcome, TestTimeAdapter, UpdateCounts};
pub use cache::{CacheEntry, CacheKind, CacheStore, ClassBucket, Embedding, InsertOutcome};
pub use classifier::{Classifier, Inference, PrototypeClassifier};
pub use config::{CacheParams, DatasetConfig, NegativeParams, RunSettings, ThresholdWindow};
pub use errors::{AdaptError, Result};

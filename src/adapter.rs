//! Test-time adaptation loop
//!
//! [`TestTimeAdapter`] folds a labeled input stream through a frozen
//! [`Classifier`], exclusively owning the positive and negative
//! [`CacheStore`]s for the pass. Per sample, in order:
//!
//! 1. classify the input
//! 2. normalize the prediction entropy by `ln(num_classes)`
//! 3. offer the sample to the positive cache (if enabled)
//! 4. offer it to the negative cache, only if enabled and the normalized
//!    entropy lies strictly inside the entropy window
//! 5. add positive affinity logits, subtract negative affinity logits,
//!    skipping any cache that is still empty
//! 6. arg-max, score against the ground truth, emit telemetry on cadence
//!
//! Cache updates for a sample happen before that sample is scored. Samples
//! are processed strictly one at a time.

use std::io::Write;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::cache::scorer::affinity_logits;
use crate::cache::{CacheEntry, CacheKind, CacheStore, InsertOutcome};
use crate::classifier::{argmax, normalized_entropy, Classifier, Inference};
use crate::config::DatasetConfig;
use crate::constants::{DEFAULT_TELEMETRY_INTERVAL, MIN_NUM_CLASSES};
use crate::errors::{AdaptError, Result};
use crate::metrics::{
    CACHE_BYTES, CACHE_ENTRIES, CACHE_LOOKUP_DURATION, CACHE_UPDATES_TOTAL, SAMPLES_TOTAL,
    TELEMETRY_ERRORS_TOTAL,
};
use crate::telemetry::{Telemetry, TelemetryRecord};
use crate::validation::{validate_inference, validate_label};

/// What happened to one sample on one cache side
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheUpdate {
    /// Cache side is disabled for this dataset
    Disabled,
    /// Normalized entropy fell outside the entropy window (negative side only)
    Gated,
    /// Entry was offered to the store
    Applied(InsertOutcome),
}

impl CacheUpdate {
    fn as_str(&self) -> &'static str {
        match self {
            CacheUpdate::Disabled => "disabled",
            CacheUpdate::Gated => "gated",
            CacheUpdate::Applied(outcome) => outcome.as_str(),
        }
    }
}

/// Per-cache tally of update outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateCounts {
    pub inserted: usize,
    pub replaced: usize,
    pub rejected: usize,
    pub gated: usize,
}

impl UpdateCounts {
    fn record(&mut self, update: CacheUpdate) {
        match update {
            CacheUpdate::Disabled => {}
            CacheUpdate::Gated => self.gated += 1,
            CacheUpdate::Applied(InsertOutcome::Inserted) => self.inserted += 1,
            CacheUpdate::Applied(InsertOutcome::Replaced { .. }) => self.replaced += 1,
            CacheUpdate::Applied(InsertOutcome::Rejected) => self.rejected += 1,
        }
    }
}

/// Result of processing one sample
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    /// Zero-based position in the stream
    pub iteration: usize,
    /// Logits after cache adjustment
    pub logits: Vec<f32>,
    /// Arg-max of the adjusted logits
    pub predicted: usize,
    /// Arg-max of the baseline logits, as reported by the classifier
    pub baseline_predicted: usize,
    pub target: usize,
    pub correct: bool,
    pub normalized_entropy: f32,
    pub positive: CacheUpdate,
    pub negative: CacheUpdate,
}

/// Summary of a dataset pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub samples: usize,
    pub correct: usize,
    /// Fraction of correct predictions over the stream
    pub accuracy: f64,
    pub positive_entries: usize,
    pub negative_entries: usize,
    pub positive_bytes: Option<usize>,
    pub negative_bytes: Option<usize>,
    pub avg_lookup_secs: f64,
    pub avg_sample_secs: f64,
    pub positive_updates: UpdateCounts,
    pub negative_updates: UpdateCounts,
}

impl RunReport {
    pub fn accuracy_pct(&self) -> f64 {
        self.accuracy * 100.0
    }
}

/// Owner of both caches for one dataset pass
pub struct TestTimeAdapter<C: Classifier> {
    classifier: C,
    config: DatasetConfig,
    positive: Option<CacheStore>,
    negative: Option<CacheStore>,
    num_classes: usize,
    /// Fixed by the first sample; later samples must match
    embedding_dim: Option<usize>,
    processed: usize,
    correct: usize,
    positive_updates: UpdateCounts,
    negative_updates: UpdateCounts,
    telemetry: Telemetry,
    sink: Option<Box<dyn Write>>,
}

impl<C: Classifier> TestTimeAdapter<C> {
    /// Create an adapter with empty caches.
    ///
    /// Fails with [`AdaptError::InvalidConfig`] before any sample is seen if
    /// the configuration or the classifier's class count is unusable.
    pub fn new(classifier: C, config: DatasetConfig) -> Result<Self> {
        config.validate()?;

        let num_classes = classifier.num_classes();
        if num_classes < MIN_NUM_CLASSES {
            return Err(AdaptError::invalid_config(
                "num_classes",
                format!("need at least {MIN_NUM_CLASSES} classes, got {num_classes}"),
            ));
        }

        let positive = config
            .positive
            .map(|p| CacheStore::new(CacheKind::Positive, p.shot_capacity))
            .transpose()?;
        let negative = config
            .negative
            .map(|n| CacheStore::new(CacheKind::Negative, n.cache.shot_capacity))
            .transpose()?;

        Ok(Self {
            classifier,
            config,
            positive,
            negative,
            num_classes,
            embedding_dim: None,
            processed: 0,
            correct: 0,
            positive_updates: UpdateCounts::default(),
            negative_updates: UpdateCounts::default(),
            telemetry: Telemetry::new(DEFAULT_TELEMETRY_INTERVAL),
            sink: None,
        })
    }

    /// Emit a telemetry record every `interval` samples
    pub fn with_telemetry_interval(mut self, interval: usize) -> Self {
        self.telemetry = Telemetry::new(interval);
        self
    }

    /// Also write telemetry records as plain text to `sink`
    pub fn with_telemetry_sink(mut self, sink: impl Write + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Process one labeled sample
    pub fn process(&mut self, input: &C::Input, target: usize) -> Result<SampleOutcome> {
        let started = Instant::now();
        validate_label(target, self.num_classes)?;

        let inference = self.classifier.infer(input)?;
        validate_inference(&inference, self.num_classes, self.embedding_dim)?;
        self.embedding_dim.get_or_insert(inference.embedding.dim());

        let entropy = normalized_entropy(inference.loss, self.num_classes);
        let Inference {
            embedding,
            logits,
            loss,
            probability_map,
            predicted: baseline_predicted,
        } = inference;

        let positive = match self.positive.as_mut() {
            Some(store) => CacheUpdate::Applied(store.update(
                baseline_predicted,
                CacheEntry::positive(embedding.clone(), loss),
            )?),
            None => CacheUpdate::Disabled,
        };

        let negative = match (self.negative.as_mut(), self.config.negative) {
            (Some(store), Some(params)) if params.entropy_threshold.contains(entropy) => {
                CacheUpdate::Applied(store.update(
                    baseline_predicted,
                    CacheEntry::negative(embedding.clone(), loss, probability_map),
                )?)
            }
            (Some(_), Some(_)) => CacheUpdate::Gated,
            _ => CacheUpdate::Disabled,
        };

        self.positive_updates.record(positive);
        self.negative_updates.record(negative);
        record_update_metrics(CacheKind::Positive, positive, self.positive.as_ref());
        record_update_metrics(CacheKind::Negative, negative, self.negative.as_ref());

        let mut final_logits = logits;
        let lookup_started = Instant::now();

        if let (Some(store), Some(params)) = (self.positive.as_ref(), self.config.positive) {
            if !store.is_empty() {
                let adjustment = affinity_logits(
                    &embedding,
                    store,
                    params.alpha,
                    params.beta,
                    self.num_classes,
                    None,
                )?;
                for (l, a) in final_logits.iter_mut().zip(adjustment) {
                    *l += a;
                }
            }
        }

        if let (Some(store), Some(params)) = (self.negative.as_ref(), self.config.negative) {
            if !store.is_empty() {
                let adjustment = affinity_logits(
                    &embedding,
                    store,
                    params.cache.alpha,
                    params.cache.beta,
                    self.num_classes,
                    Some(params.mask_threshold),
                )?;
                for (l, a) in final_logits.iter_mut().zip(adjustment) {
                    *l -= a;
                }
            }
        }

        let lookup = lookup_started.elapsed();
        self.telemetry.record_lookup(lookup);
        CACHE_LOOKUP_DURATION.observe(lookup.as_secs_f64());

        let predicted = argmax(&final_logits)
            .ok_or_else(|| AdaptError::Classifier("adjusted logits are all NaN".to_string()))?;
        let correct = predicted == target;

        let iteration = self.processed;
        self.processed += 1;
        if correct {
            self.correct += 1;
        }
        SAMPLES_TOTAL
            .with_label_values(&[if correct { "correct" } else { "incorrect" }])
            .inc();

        trace!(
            iteration,
            predicted,
            baseline_predicted,
            target,
            normalized_entropy = entropy,
            positive = positive.as_str(),
            negative = negative.as_str(),
            "sample processed"
        );

        self.telemetry.record_sample(started.elapsed());
        if self.telemetry.is_due(iteration) {
            self.emit(iteration, false);
        }

        Ok(SampleOutcome {
            iteration,
            logits: final_logits,
            predicted,
            baseline_predicted,
            target,
            correct,
            normalized_entropy: entropy,
            positive,
            negative,
        })
    }

    /// Process a whole stream and emit the final telemetry record.
    ///
    /// Any stream or processing error aborts the pass with no partial report.
    pub fn run<I>(&mut self, stream: I) -> Result<RunReport>
    where
        I: IntoIterator<Item = Result<(C::Input, usize)>>,
    {
        for item in stream {
            let (input, target) = item?;
            self.process(&input, target)?;
        }

        if self.processed == 0 {
            return Err(AdaptError::Dataset(
                "input stream produced no samples".to_string(),
            ));
        }

        self.emit(self.processed - 1, true);
        let report = self.report();
        info!(
            samples = report.samples,
            accuracy_pct = report.accuracy_pct(),
            positive_entries = report.positive_entries,
            negative_entries = report.negative_entries,
            "adaptation pass complete"
        );
        Ok(report)
    }

    /// Snapshot of the pass so far
    pub fn report(&self) -> RunReport {
        RunReport {
            samples: self.processed,
            correct: self.correct,
            accuracy: self.accuracy(),
            positive_entries: self.positive.as_ref().map_or(0, CacheStore::len),
            negative_entries: self.negative.as_ref().map_or(0, CacheStore::len),
            positive_bytes: cache_bytes(CacheKind::Positive, self.positive.as_ref()),
            negative_bytes: cache_bytes(CacheKind::Negative, self.negative.as_ref()),
            avg_lookup_secs: self.telemetry.avg_lookup_secs(),
            avg_sample_secs: self.telemetry.avg_sample_secs(),
            positive_updates: self.positive_updates,
            negative_updates: self.negative_updates,
        }
    }

    /// Fraction of correct predictions so far
    pub fn accuracy(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.correct as f64 / self.processed as f64
        }
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Read-only view of the positive cache, if enabled
    pub fn positive_store(&self) -> Option<&CacheStore> {
        self.positive.as_ref()
    }

    /// Read-only view of the negative cache, if enabled
    pub fn negative_store(&self) -> Option<&CacheStore> {
        self.negative.as_ref()
    }

    fn emit(&mut self, iteration: usize, is_final: bool) {
        let record: TelemetryRecord = self.telemetry.snapshot(
            iteration,
            cache_bytes(CacheKind::Positive, self.positive.as_ref()),
            cache_bytes(CacheKind::Negative, self.negative.as_ref()),
            self.accuracy() * 100.0,
            is_final,
        );

        info!(
            iteration = record.iteration,
            positive_bytes = ?record.positive_bytes,
            negative_bytes = ?record.negative_bytes,
            avg_lookup_secs = record.avg_lookup_secs,
            avg_sample_secs = record.avg_sample_secs,
            accuracy_pct = record.accuracy_pct,
            is_final,
            "telemetry"
        );

        if let Some(sink) = self.sink.as_mut() {
            let written = writeln!(sink, "{record}").and_then(|_| sink.flush());
            if let Err(e) = written {
                warn!(error = %e, "failed to write telemetry record");
            }
        }
    }
}

/// Byte size of a cache for telemetry; a missing cache counts as empty.
///
/// Size failures are logged and skipped.
fn cache_bytes(kind: CacheKind, store: Option<&CacheStore>) -> Option<usize> {
    let store = match store {
        Some(store) => store,
        None => return Some(0),
    };
    match store.byte_size() {
        Ok(bytes) => {
            CACHE_BYTES
                .with_label_values(&[kind.as_str()])
                .set(i64::try_from(bytes).unwrap_or(i64::MAX));
            Some(bytes)
        }
        Err(e) => {
            warn!(cache = %kind, code = e.code(), error = %e, "skipping cache size");
            TELEMETRY_ERRORS_TOTAL.with_label_values(&[e.code()]).inc();
            None
        }
    }
}

fn record_update_metrics(kind: CacheKind, update: CacheUpdate, store: Option<&CacheStore>) {
    if update == CacheUpdate::Disabled {
        return;
    }
    CACHE_UPDATES_TOTAL
        .with_label_values(&[kind.as_str(), update.as_str()])
        .inc();
    if let Some(store) = store {
        CACHE_ENTRIES
            .with_label_values(&[kind.as_str()])
            .set(i64::try_from(store.len()).unwrap_or(i64::MAX));
    }
    if let CacheUpdate::Applied(InsertOutcome::Replaced { evicted_loss }) = update {
        debug!(cache = %kind, evicted_loss, "evicted highest-loss entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Embedding;
    use crate::config::{CacheParams, NegativeParams, ThresholdWindow};

    /// Classifier whose input already is its output
    struct Scripted {
        num_classes: usize,
    }

    impl Classifier for Scripted {
        type Input = Inference;

        fn infer(&self, input: &Inference) -> Result<Inference> {
            Ok(input.clone())
        }

        fn num_classes(&self) -> usize {
            self.num_classes
        }
    }

    fn sample(embedding: Vec<f32>, logits: Vec<f32>) -> Inference {
        Inference::from_logits(Embedding::new(embedding), logits)
    }

    fn positive_only(capacity: usize) -> DatasetConfig {
        DatasetConfig {
            positive: Some(CacheParams {
                shot_capacity: capacity,
                alpha: 1.0,
                beta: 5.0,
            }),
            negative: None,
        }
    }

    #[test]
    fn test_rejects_single_class_classifier() {
        let err = TestTimeAdapter::new(Scripted { num_classes: 1 }, positive_only(2))
            .err()
            .unwrap();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_rejects_zero_capacity_before_processing() {
        let err = TestTimeAdapter::new(Scripted { num_classes: 3 }, positive_only(0))
            .err()
            .unwrap();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_disabled_caches_leave_logits_untouched() {
        let config = DatasetConfig {
            positive: None,
            negative: None,
        };
        let mut adapter = TestTimeAdapter::new(Scripted { num_classes: 3 }, config).unwrap();
        let s = sample(vec![1.0, 0.0], vec![0.1, 0.9, 0.2]);
        let outcome = adapter.process(&s, 1).unwrap();
        assert_eq!(outcome.logits, s.logits);
        assert_eq!(outcome.positive, CacheUpdate::Disabled);
        assert_eq!(outcome.negative, CacheUpdate::Disabled);
        assert!(outcome.correct);
    }

    #[test]
    fn test_update_precedes_scoring() {
        let mut adapter =
            TestTimeAdapter::new(Scripted { num_classes: 3 }, positive_only(2)).unwrap();
        let s = sample(vec![1.0, 0.0], vec![0.0, 2.0, 0.0]);
        let outcome = adapter.process(&s, 1).unwrap();
        // Own embedding already stored: identical key contributes weight 1
        assert!((outcome.logits[1] - 3.0).abs() < 1e-5);
        assert_eq!(outcome.positive, CacheUpdate::Applied(InsertOutcome::Inserted));
    }

    #[test]
    fn test_negative_gating_outside_window() {
        let config = DatasetConfig {
            positive: None,
            negative: Some(NegativeParams {
                cache: CacheParams {
                    shot_capacity: 2,
                    alpha: 1.0,
                    beta: 1.0,
                },
                entropy_threshold: ThresholdWindow::new(0.2, 0.5),
                mask_threshold: ThresholdWindow::new(0.03, 1.0),
            }),
        };
        let mut adapter = TestTimeAdapter::new(Scripted { num_classes: 3 }, config).unwrap();

        // Near-certain prediction: entropy close to zero
        let confident = sample(vec![1.0, 0.0], vec![50.0, 0.0, 0.0]);
        let outcome = adapter.process(&confident, 0).unwrap();
        assert_eq!(outcome.negative, CacheUpdate::Gated);
        assert!(adapter.negative_store().unwrap().is_empty());
        assert_eq!(outcome.logits, confident.logits);
    }

    #[test]
    fn test_label_out_of_range() {
        let mut adapter =
            TestTimeAdapter::new(Scripted { num_classes: 3 }, positive_only(2)).unwrap();
        let s = sample(vec![1.0, 0.0], vec![0.0, 2.0, 0.0]);
        assert_eq!(adapter.process(&s, 3).unwrap_err().code(), "DATASET_ERROR");
        assert_eq!(adapter.processed(), 0);
    }

    #[test]
    fn test_empty_stream() {
        let mut adapter =
            TestTimeAdapter::new(Scripted { num_classes: 3 }, positive_only(2)).unwrap();
        let err = adapter.run(Vec::new()).unwrap_err();
        assert_eq!(err.code(), "DATASET_ERROR");
    }

    #[test]
    fn test_update_counts() {
        let mut counts = UpdateCounts::default();
        counts.record(CacheUpdate::Gated);
        counts.record(CacheUpdate::Applied(InsertOutcome::Inserted));
        counts.record(CacheUpdate::Applied(InsertOutcome::Replaced { evicted_loss: 0.4 }));
        counts.record(CacheUpdate::Applied(InsertOutcome::Rejected));
        counts.record(CacheUpdate::Disabled);
        assert_eq!(
            counts,
            UpdateCounts {
                inserted: 1,
                replaced: 1,
                rejected: 1,
                gated: 1
            }
        );
    }
}

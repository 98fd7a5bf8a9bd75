//! Periodic telemetry for a dataset pass
//!
//! A [`TelemetryRecord`] is emitted for sample 0, every `interval` samples
//! after it, and once at stream end. Records carry cache byte sizes, average
//! lookup and per-sample latency, and the running accuracy. They never feed
//! back into cache state or predictions.

use std::fmt;
use std::time::Duration;

/// One telemetry snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    /// Zero-based index of the sample that triggered the record
    pub iteration: usize,
    /// `None` when the size computation failed and was skipped
    pub positive_bytes: Option<usize>,
    pub negative_bytes: Option<usize>,
    pub avg_lookup_secs: f64,
    pub avg_sample_secs: f64,
    /// Running accuracy in percent
    pub accuracy_pct: f64,
    /// True for the end-of-stream record
    pub is_final: bool,
}

fn write_bytes(f: &mut fmt::Formatter<'_>, label: &str, bytes: Option<usize>) -> fmt::Result {
    match bytes {
        Some(b) => writeln!(f, "{label} Cache Size: {b} bytes"),
        None => writeln!(f, "{label} Cache Size: unavailable"),
    }
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_final {
            writeln!(f, "---- Final Results ({} samples) ----", self.iteration + 1)?;
        } else {
            writeln!(f, "---- Iteration {} ----", self.iteration)?;
        }
        write_bytes(f, "Positive", self.positive_bytes)?;
        write_bytes(f, "Negative", self.negative_bytes)?;
        writeln!(
            f,
            "Average Cache Lookup Time: {:.6} seconds",
            self.avg_lookup_secs
        )?;
        writeln!(f, "Average Inference Time: {:.6} seconds", self.avg_sample_secs)?;
        writeln!(f, "Test accuracy: {:.2}.", self.accuracy_pct)
    }
}

/// Latency accumulator and cadence tracker
#[derive(Debug, Clone)]
pub struct Telemetry {
    interval: usize,
    total_lookup: Duration,
    lookups: usize,
    total_sample: Duration,
    samples: usize,
}

impl Telemetry {
    /// `interval` of zero is treated as one
    pub fn new(interval: usize) -> Self {
        Self {
            interval: interval.max(1),
            total_lookup: Duration::ZERO,
            lookups: 0,
            total_sample: Duration::ZERO,
            samples: 0,
        }
    }

    pub fn record_lookup(&mut self, elapsed: Duration) {
        self.total_lookup += elapsed;
        self.lookups += 1;
    }

    pub fn record_sample(&mut self, elapsed: Duration) {
        self.total_sample += elapsed;
        self.samples += 1;
    }

    /// Whether sample `iteration` (zero-based) should emit a record
    pub fn is_due(&self, iteration: usize) -> bool {
        iteration % self.interval == 0
    }

    pub fn avg_lookup_secs(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.total_lookup.as_secs_f64() / self.lookups as f64
        }
    }

    pub fn avg_sample_secs(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total_sample.as_secs_f64() / self.samples as f64
        }
    }

    pub fn snapshot(
        &self,
        iteration: usize,
        positive_bytes: Option<usize>,
        negative_bytes: Option<usize>,
        accuracy_pct: f64,
        is_final: bool,
    ) -> TelemetryRecord {
        TelemetryRecord {
            iteration,
            positive_bytes,
            negative_bytes,
            avg_lookup_secs: self.avg_lookup_secs(),
            avg_sample_secs: self.avg_sample_secs(),
            accuracy_pct,
            is_final,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence() {
        let t = Telemetry::new(1000);
        assert!(t.is_due(0));
        assert!(!t.is_due(999));
        assert!(t.is_due(1000));
        assert!(Telemetry::new(0).is_due(7));
    }

    #[test]
    fn test_averages() {
        let mut t = Telemetry::new(10);
        assert_eq!(t.avg_lookup_secs(), 0.0);
        t.record_lookup(Duration::from_millis(2));
        t.record_lookup(Duration::from_millis(4));
        t.record_sample(Duration::from_millis(10));
        assert!((t.avg_lookup_secs() - 0.003).abs() < 1e-9);
        assert!((t.avg_sample_secs() - 0.010).abs() < 1e-9);
    }

    #[test]
    fn test_record_display_fields() {
        let t = Telemetry::new(10);
        let text = t.snapshot(1000, Some(4096), None, 62.5, false).to_string();
        assert!(text.contains("---- Iteration 1000 ----"));
        assert!(text.contains("Positive Cache Size: 4096 bytes"));
        assert!(text.contains("Negative Cache Size: unavailable"));
        assert!(text.contains("Average Cache Lookup Time:"));
        assert!(text.contains("Average Inference Time:"));
        assert!(text.contains("Test accuracy: 62.50."));

        let final_text = t.snapshot(99, Some(0), Some(0), 50.0, true).to_string();
        assert!(final_text.contains("Final Results (100 samples)"));
    }
}

//! Configuration for cache hyperparameters and run settings
//!
//! Per-dataset cache hyperparameters come from a TOML file with a `[positive]`
//! and a `[negative]` table:
//!
//! ```toml
//! [positive]
//! enabled = true
//! shot_capacity = 3
//! alpha = 2.0
//! beta = 5.0
//!
//! [negative]
//! enabled = true
//! shot_capacity = 2
//! alpha = 0.117
//! beta = 1.0
//! entropy_threshold = { lower = 0.2, upper = 0.5 }
//! mask_threshold = { lower = 0.03, upper = 1.0 }
//! ```
//!
//! A disabled side may omit its hyperparameters. An enabled side must provide
//! all of them; a missing key is an [`AdaptError::InvalidConfig`], never a
//! silent default.
//!
//! Run-level settings (telemetry cadence, directories) follow the
//! environment-override pattern: sensible defaults, `TDA_*` variables on top.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants::{
    DEFAULT_DATA_ROOT, DEFAULT_LOG_DIR, DEFAULT_TELEMETRY_INTERVAL, MAX_TELEMETRY_INTERVAL,
};
use crate::errors::{AdaptError, Result};

/// Open interval `(lower, upper)` used for entropy gating and mask derivation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdWindow {
    pub lower: f32,
    pub upper: f32,
}

impl ThresholdWindow {
    pub fn new(lower: f32, upper: f32) -> Self {
        Self { lower, upper }
    }

    /// Strict containment: both bounds are excluded
    #[inline]
    pub fn contains(&self, value: f32) -> bool {
        self.lower < value && value < self.upper
    }

    fn validate(&self, field: &str) -> Result<()> {
        if !self.lower.is_finite() || !self.upper.is_finite() {
            return Err(AdaptError::invalid_config(field, "bounds must be finite"));
        }
        if self.lower >= self.upper {
            return Err(AdaptError::invalid_config(
                field,
                format!(
                    "lower bound {} must be below upper bound {}",
                    self.lower, self.upper
                ),
            ));
        }
        Ok(())
    }
}

/// Hyperparameters shared by both cache sides
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheParams {
    /// Maximum entries retained per class
    pub shot_capacity: usize,
    /// Scale of the cache logit contribution
    pub alpha: f32,
    /// Sharpness of the affinity kernel
    pub beta: f32,
}

impl CacheParams {
    fn validate(&self, side: &str) -> Result<()> {
        if self.shot_capacity == 0 {
            return Err(AdaptError::invalid_config(
                format!("{side}.shot_capacity"),
                "must be at least 1",
            ));
        }
        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(AdaptError::invalid_config(
                format!("{side}.alpha"),
                format!("must be a finite non-negative number, got {}", self.alpha),
            ));
        }
        if !self.beta.is_finite() || self.beta < 0.0 {
            return Err(AdaptError::invalid_config(
                format!("{side}.beta"),
                format!("must be a finite non-negative number, got {}", self.beta),
            ));
        }
        Ok(())
    }
}

/// Negative-cache hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NegativeParams {
    pub cache: CacheParams,
    /// Normalized-entropy window a sample must fall in to enter the cache
    pub entropy_threshold: ThresholdWindow,
    /// Probability window marking a class as suppressible
    pub mask_threshold: ThresholdWindow,
}

/// Fully resolved configuration for one dataset pass.
///
/// `None` on either side means that cache is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DatasetConfig {
    pub positive: Option<CacheParams>,
    pub negative: Option<NegativeParams>,
}

/// One side as written in the file, before required-key resolution
#[derive(Debug, Deserialize)]
struct RawSide {
    enabled: bool,
    shot_capacity: Option<i64>,
    alpha: Option<f32>,
    beta: Option<f32>,
    entropy_threshold: Option<ThresholdWindow>,
    mask_threshold: Option<ThresholdWindow>,
}

#[derive(Debug, Deserialize)]
struct RawDatasetConfig {
    positive: RawSide,
    negative: RawSide,
}

fn required<T>(value: Option<T>, field: String) -> Result<T> {
    value.ok_or_else(|| AdaptError::invalid_config(field, "missing required key"))
}

impl RawSide {
    fn resolve_params(&self, side: &str) -> Result<CacheParams> {
        let capacity = required(self.shot_capacity, format!("{side}.shot_capacity"))?;
        let shot_capacity = usize::try_from(capacity).map_err(|_| {
            AdaptError::invalid_config(
                format!("{side}.shot_capacity"),
                format!("must be positive, got {capacity}"),
            )
        })?;

        let params = CacheParams {
            shot_capacity,
            alpha: required(self.alpha, format!("{side}.alpha"))?,
            beta: required(self.beta, format!("{side}.beta"))?,
        };
        params.validate(side)?;
        Ok(params)
    }
}

impl DatasetConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawDatasetConfig = toml::from_str(content)
            .map_err(|e| AdaptError::invalid_config("<document>", e.message().to_string()))?;

        let positive = if raw.positive.enabled {
            if raw.positive.entropy_threshold.is_some() || raw.positive.mask_threshold.is_some() {
                warn!("positive cache ignores entropy_threshold and mask_threshold");
            }
            Some(raw.positive.resolve_params("positive")?)
        } else {
            None
        };

        let negative = if raw.negative.enabled {
            let cache = raw.negative.resolve_params("negative")?;
            let entropy_threshold = required(
                raw.negative.entropy_threshold,
                "negative.entropy_threshold".to_string(),
            )?;
            let mask_threshold = required(
                raw.negative.mask_threshold,
                "negative.mask_threshold".to_string(),
            )?;
            Some(NegativeParams {
                cache,
                entropy_threshold,
                mask_threshold,
            })
        } else {
            None
        };

        let config = Self { positive, negative };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Config file for `dataset` inside `config_dir`
    pub fn path_for(config_dir: &Path, dataset: &str) -> PathBuf {
        config_dir.join(format!("{dataset}.toml"))
    }

    /// Validate every enabled side
    pub fn validate(&self) -> Result<()> {
        if let Some(pos) = &self.positive {
            pos.validate("positive")?;
        }
        if let Some(neg) = &self.negative {
            neg.cache.validate("negative")?;
            neg.entropy_threshold.validate("negative.entropy_threshold")?;
            neg.mask_threshold.validate("negative.mask_threshold")?;
        }
        Ok(())
    }

    /// Log the resolved configuration
    pub fn log(&self, dataset: &str) {
        match &self.positive {
            Some(p) => info!(
                dataset,
                shot_capacity = p.shot_capacity,
                alpha = p.alpha,
                beta = p.beta,
                "positive cache enabled"
            ),
            None => info!(dataset, "positive cache disabled"),
        }
        match &self.negative {
            Some(n) => info!(
                dataset,
                shot_capacity = n.cache.shot_capacity,
                alpha = n.cache.alpha,
                beta = n.cache.beta,
                entropy_lower = n.entropy_threshold.lower,
                entropy_upper = n.entropy_threshold.upper,
                mask_lower = n.mask_threshold.lower,
                mask_upper = n.mask_threshold.upper,
                "negative cache enabled"
            ),
            None => info!(dataset, "negative cache disabled"),
        }
    }
}

/// Bound a requested telemetry interval to `1..=MAX_TELEMETRY_INTERVAL`
pub fn clamp_telemetry_interval(interval: usize) -> usize {
    interval.clamp(1, MAX_TELEMETRY_INTERVAL)
}

/// Settings for a whole run (all datasets)
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Emit a telemetry record every N samples (default: 1000)
    pub telemetry_interval: usize,

    /// Directory for per-dataset telemetry log files (default: .)
    pub log_dir: PathBuf,

    /// Root directory holding one sub-directory per dataset (default: ./dataset/)
    pub data_root: PathBuf,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            telemetry_interval: DEFAULT_TELEMETRY_INTERVAL,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
        }
    }
}

impl RunSettings {
    /// Load settings from environment variables with defaults
    #[allow(clippy::field_reassign_with_default)]
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(val) = env::var("TDA_TELEMETRY_INTERVAL") {
            match val.parse::<usize>() {
                Ok(n) => settings.telemetry_interval = clamp_telemetry_interval(n),
                Err(_) => warn!(value = %val, "ignoring unparsable TDA_TELEMETRY_INTERVAL"),
            }
        }

        if let Ok(val) = env::var("TDA_LOG_DIR") {
            settings.log_dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("TDA_DATA_ROOT") {
            settings.data_root = PathBuf::from(val);
        }

        settings
    }

    /// Log the current settings
    pub fn log(&self) {
        info!("Run settings:");
        info!("   Telemetry interval: every {} samples", self.telemetry_interval);
        info!("   Log dir: {:?}", self.log_dir);
        info!("   Data root: {:?}", self.data_root);
    }
}

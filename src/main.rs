//! tda-cache - test-time adaptation runner
//!
//! Usage:
//!   tda-cache --config configs --datasets I/A/V --data-root ./dataset/
//!
//! For every dataset: load `<config>/<dataset>.toml`, build the zero-shot
//! classifier from `<data-root>/<dataset>/prototypes.json`, stream
//! `<data-root>/<dataset>/features.jsonl` through fresh caches, and write a
//! telemetry log `logs_<dataset>_tda_<timestamp>.txt`.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use tda_cache::config::{clamp_telemetry_interval, DatasetConfig, RunSettings};
use tda_cache::dataset::{parse_dataset_list, ClassPrototypes, DatasetPaths, FeatureStream};
use tda_cache::{metrics, tracing_setup, RunReport, TestTimeAdapter};

#[derive(Parser)]
#[command(name = "tda-cache")]
#[command(about = "Training-free test-time adaptation with dual feature caches")]
#[command(version)]
struct Cli {
    /// Directory holding one <dataset>.toml hyperparameter file per dataset
    #[arg(long)]
    config: PathBuf,

    /// Datasets to process, separated by a slash (e.g. I/A/V/R/S)
    #[arg(long)]
    datasets: String,

    /// Root directory with one sub-directory per dataset [env: TDA_DATA_ROOT]
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Directory for telemetry log files [env: TDA_LOG_DIR]
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Samples between telemetry records [env: TDA_TELEMETRY_INTERVAL]
    #[arg(long)]
    telemetry_interval: Option<usize>,

    /// Write Prometheus metrics in text format to this file at exit
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Serialize)]
struct DatasetSummary<'a> {
    dataset: &'a str,
    #[serde(flatten)]
    report: &'a RunReport,
}

fn run_dataset(name: &str, config_dir: &Path, settings: &RunSettings) -> Result<RunReport> {
    let config_path = DatasetConfig::path_for(config_dir, name);
    let config = DatasetConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    config.log(name);

    let paths = DatasetPaths::new(&settings.data_root, name);
    let prototypes = ClassPrototypes::load(&paths.prototypes)?;
    info!(
        dataset = name,
        classes = prototypes.num_classes(),
        "Loaded class prototypes"
    );
    let classifier = prototypes.into_classifier()?;

    let log_path = settings.log_dir.join(format!(
        "logs_{name}_tda_{}.txt",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ));
    let log_file = File::create(&log_path)
        .with_context(|| format!("Failed to create telemetry log {}", log_path.display()))?;
    info!(dataset = name, log = %log_path.display(), "Writing telemetry log");

    let mut adapter = TestTimeAdapter::new(classifier, config)?
        .with_telemetry_interval(settings.telemetry_interval)
        .with_telemetry_sink(BufWriter::new(log_file));

    let stream = FeatureStream::open(&paths.features)?;
    let report = adapter.run(stream.pairs())?;
    Ok(report)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = tracing_setup::init_tracing(cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
    }
    if let Err(e) = metrics::register_metrics() {
        warn!(error = %e, "Failed to register metrics");
    }

    let mut settings = RunSettings::from_env();
    if let Some(root) = cli.data_root {
        settings.data_root = root;
    }
    if let Some(dir) = cli.log_dir {
        settings.log_dir = dir;
    }
    if let Some(n) = cli.telemetry_interval {
        settings.telemetry_interval = clamp_telemetry_interval(n);
    }
    settings.log();

    let datasets = parse_dataset_list(&cli.datasets);
    if datasets.is_empty() {
        anyhow::bail!("--datasets must name at least one dataset");
    }

    std::fs::create_dir_all(&settings.log_dir)
        .with_context(|| format!("Failed to create log dir {}", settings.log_dir.display()))?;

    for name in &datasets {
        info!(dataset = %name, "Processing dataset");
        let report = run_dataset(name, &cli.config, &settings)
            .with_context(|| format!("Adaptation failed for dataset '{name}'"))?;

        info!(
            dataset = %name,
            accuracy_pct = %format!("{:.2}", report.accuracy_pct()),
            "Test accuracy"
        );
        println!(
            "{}",
            serde_json::to_string(&DatasetSummary {
                dataset: name,
                report: &report,
            })?
        );
    }

    if let Some(path) = cli.metrics_out {
        let text = metrics::gather_text().context("Failed to encode metrics")?;
        std::fs::write(&path, text)
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
        info!(path = %path.display(), "Metrics written");
    }

    Ok(())
}

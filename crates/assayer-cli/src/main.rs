//! Assayer CLI: the `assayer` command.
//!
//! Thin front-end over `assayer-core`: `ingest` builds the canonical
//! index from an entry corpus, `validate` re-checks a built index
//! against policy anchors and invariants, `metrics` aggregates a built
//! index into tier statistics.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use assayer_core::{
    run, AnchorChecker, EntryRow, Index, Metrics, MetricsAggregator, PipelineConfig, PolicyConfig,
    RunReport,
};

#[derive(Parser)]
#[command(name = "assayer", version, about = "Evidence corpus ingestion, validation and metrics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest an entry corpus and build the canonical index.
    Ingest {
        /// Root directory containing entries.
        #[arg(long)]
        root: PathBuf,

        /// Directory of versioned schema descriptors.
        #[arg(long)]
        schemas: PathBuf,

        /// Policy configuration file(s), current first. Repeat to
        /// declare a mid-run policy transition.
        #[arg(long = "policy", required = true)]
        policy: Vec<PathBuf>,

        /// Total number of shards to stream the corpus through.
        #[arg(long, default_value_t = 1)]
        shard_count: usize,

        /// Output file for the canonical index (JSON).
        #[arg(long)]
        out: PathBuf,

        /// Optional output file for the anomaly report (JSON).
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Validate a previously built index against policy anchors and
    /// labeling invariants.
    Validate {
        /// Index file produced by `ingest`.
        #[arg(long)]
        index: PathBuf,

        /// Policy configuration file(s), current first.
        #[arg(long = "policy", required = true)]
        policy: Vec<PathBuf>,

        /// Optional output file for the anomaly report (JSON).
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Compute tier and gate metrics from a previously built index.
    Metrics {
        /// Index file produced by `ingest`.
        #[arg(long)]
        index: PathBuf,

        /// Policy configuration enabling tier-derivability checks.
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Output file for the metrics (JSON).
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Commands::Ingest {
            root,
            schemas,
            policy,
            shard_count,
            out,
            report,
        } => ingest(root, schemas, policy, shard_count, out, report),
        Commands::Validate { index, policy, report } => validate(index, policy, report),
        Commands::Metrics { index, policy, out } => metrics(index, policy, out),
    }
}

fn ingest(
    root: PathBuf,
    schemas: PathBuf,
    policy: Vec<PathBuf>,
    shard_count: usize,
    out: PathBuf,
    report_path: Option<PathBuf>,
) -> Result<()> {
    let output = run(&PipelineConfig {
        entries_root: root,
        schema_dir: schemas,
        policy_paths: policy,
        shard_count,
    })?;

    let rows: Vec<&EntryRow> = output.index.rows_sorted_by_id();
    write_json(&out, &rows).with_context(|| format!("failed to write index to {}", out.display()))?;
    info!(rows = rows.len(), out = %out.display(), "wrote canonical index");

    if let Some(path) = report_path {
        write_json(&path, &output.report)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!(out = %path.display(), "wrote anomaly report");
    }

    summarize(&output.metrics, &output.report);
    Ok(())
}

fn validate(index_path: PathBuf, policy: Vec<PathBuf>, report_path: Option<PathBuf>) -> Result<()> {
    let index = load_index(&index_path)?;
    let policies = load_policies(&policy)?;

    let anchors = AnchorChecker::new(&policies).check(index.rows());
    let aggregator = MetricsAggregator::with_thresholds(policies[0].tier_levels.thresholds);
    let (_, invariant_anomalies) = aggregator.aggregate(&index);

    let mut report = RunReport::default();
    report.extend(anchors.anomalies.iter().cloned());
    report.extend(invariant_anomalies);
    report.sort();

    match anchors.primary_fingerprint {
        Some(fingerprint) => info!(
            %fingerprint,
            groups = anchors.groups.len(),
            "primary policy fingerprint"
        ),
        None => warn!("index is empty, nothing anchored"),
    }
    if report.anomalies.is_empty() {
        info!(rows = index.len(), "index is clean");
    } else {
        for anomaly in &report.anomalies {
            warn!(
                entry_id = anomaly.entry_id.as_deref().unwrap_or("-"),
                category = ?anomaly.category,
                detail = %anomaly.detail,
                "anomaly"
            );
        }
        warn!(anomalies = report.anomalies.len(), "index has anomalies");
    }

    if let Some(path) = report_path {
        write_json(&path, &report)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }
    Ok(())
}

fn metrics(index_path: PathBuf, policy: Option<PathBuf>, out: PathBuf) -> Result<()> {
    let index = load_index(&index_path)?;
    let aggregator = match policy {
        Some(path) => {
            let config = PolicyConfig::from_yaml_file(&path)
                .with_context(|| format!("failed to load policy from {}", path.display()))?;
            MetricsAggregator::with_thresholds(config.tier_levels.thresholds)
        }
        None => MetricsAggregator::new(),
    };

    let (metrics, anomalies) = aggregator.aggregate(&index);
    write_json(&out, &metrics)
        .with_context(|| format!("failed to write metrics to {}", out.display()))?;
    info!(out = %out.display(), "wrote metrics");

    if !anomalies.is_empty() {
        warn!(count = anomalies.len(), "labeling invariant anomalies found");
    }
    Ok(())
}

fn load_index(path: &Path) -> Result<Index> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read index from {}", path.display()))?;
    let rows: Vec<EntryRow> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse index from {}", path.display()))?;
    info!(rows = rows.len(), index = %path.display(), "loaded index");
    Ok(Index::from_rows(rows))
}

fn load_policies(paths: &[PathBuf]) -> Result<Vec<PolicyConfig>> {
    paths
        .iter()
        .map(|path| {
            PolicyConfig::from_yaml_file(path)
                .with_context(|| format!("failed to load policy from {}", path.display()))
        })
        .collect()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn summarize(metrics: &Metrics, report: &RunReport) {
    info!(total = metrics.total_entries, "=== ingestion summary ===");
    for tier in &metrics.tier_distribution {
        info!(
            tier = %tier.tier,
            count = tier.count,
            proportion = %format!("{:.1}%", tier.proportion * 100.0),
            "tier"
        );
    }
    for gate in &metrics.gate_fail_rates {
        info!(
            gate = %gate.gate,
            fail_count = gate.fail_count,
            fail_rate = %format!("{:.1}%", gate.fail_rate * 100.0),
            "gate"
        );
    }
    if report.partial_failure {
        warn!(failed_shards = ?report.failed_shards, "run completed partially");
    }
    if !report.anomalies.is_empty() {
        warn!(anomalies = report.anomalies.len(), "anomalies recorded");
    }
}

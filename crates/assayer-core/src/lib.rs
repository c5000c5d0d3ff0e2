//! # assayer-core
//!
//! Evidence corpus ingestion, validation and tier-metrics engine.
//!
//! This crate turns a directory tree of per-entry evidence documents
//! into one canonical index plus aggregate tier statistics, answering:
//! - Is every record internally consistent?
//! - Was every record produced under a known, reproducible policy?
//! - How does the corpus break down by tier and gate?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: the same input tree yields the same index
//!    rows and the same anomaly report, independent of discovery order
//! 2. **No label computation**: tiers and gate outcomes are upstream
//!    decisions; the pipeline validates and summarizes, never rewrites
//! 3. **Partial success is normal**: per-entry problems become
//!    anomalies, never aborts; only a missing input source is fatal
//! 4. **Bounded memory**: entries stream through deterministic shards
//!    that are merged by a single writer
//!
//! ## Example
//!
//! ```rust,ignore
//! use assayer_core::{run, PipelineConfig};
//!
//! let output = run(&PipelineConfig {
//!     entries_root: "corpus/entries".into(),
//!     schema_dir: "schemas".into(),
//!     policy_paths: vec!["policy.yaml".into()],
//!     shard_count: 4,
//! })?;
//!
//! println!("{} rows, {} anomalies", output.index.len(), output.report.anomalies.len());
//! ```

pub mod entry;
pub mod index;
pub mod metrics;
pub mod policy;
pub mod report;
pub mod shard;
pub mod types;

// Re-export main types at crate root
pub use entry::{
    read_entry, DocKind, ParseFailure, RawEntry, SchemaError, SchemaRegistry, Severity, Violation,
};
pub use index::{EntryRow, Index, IndexBuilder, MergeOutput, ShardOutcome, ShardStatus};
pub use metrics::{Metrics, MetricsAggregator};
pub use policy::{
    AnchorChecker, AnchorReport, FingerprintGroup, PolicyConfig, PolicyError, PolicyFingerprint,
    TierThresholds,
};
pub use report::{Anomaly, AnomalyCategory, RunReport};
pub use shard::{Shard, ShardError};
pub use types::{
    EntryRecord, Gate, GateOutcome, GateResults, Label, Tier, TrustOutcome, MASK_SENTINEL,
};

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use entry::PRIMARY_DOC;

/// Schema version secondary documents are validated against; only the
/// primary document carries its own version tag.
const SECONDARY_SCHEMA_VERSION: &str = "v1";

/// Errors that abort a whole run. Everything per-entry is reported as
/// an anomaly instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("entries root {} does not exist", .0.display())]
    EntriesRootMissing(PathBuf),

    #[error("no entries found under {}", .0.display())]
    NoEntries(PathBuf),

    #[error("no policy configuration supplied")]
    NoPolicy,

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Shard(#[from] ShardError),
}

/// Inputs for one ingestion run, read once and treated as immutable.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of the entry directory tree.
    pub entries_root: PathBuf,

    /// Directory of versioned schema descriptors.
    pub schema_dir: PathBuf,

    /// Known policy states, current first. More than one declares a
    /// legitimate mid-run policy transition.
    pub policy_paths: Vec<PathBuf>,

    /// Number of shards to stream the corpus through.
    pub shard_count: usize,
}

/// Everything one run produces.
#[derive(Debug)]
pub struct RunOutput {
    pub index: Index,
    pub metrics: Metrics,
    pub anchors: AnchorReport,
    pub report: RunReport,
}

/// Run the full ingestion → validation → metrics pipeline.
///
/// Produces the largest valid canonical index it can, paired with a
/// complete anomaly report; partial success is the normal outcome for
/// large corpora with a few malformed entries.
pub fn run(config: &PipelineConfig) -> Result<RunOutput, PipelineError> {
    if config.policy_paths.is_empty() {
        return Err(PipelineError::NoPolicy);
    }
    let mut policies = Vec::with_capacity(config.policy_paths.len());
    for path in &config.policy_paths {
        policies.push(PolicyConfig::from_yaml_file(path)?);
    }

    let registry = SchemaRegistry::load_dir(&config.schema_dir)?;

    if !config.entries_root.exists() {
        return Err(PipelineError::EntriesRootMissing(config.entries_root.clone()));
    }
    let entry_dirs = discover_entries(&config.entries_root);
    if entry_dirs.is_empty() {
        return Err(PipelineError::NoEntries(config.entries_root.clone()));
    }
    info!(entries = entry_dirs.len(), root = %config.entries_root.display(), "discovered entries");

    // Map over shards, then reduce: each shard is independent, the
    // merge is the only single-writer step.
    let shard_count = config.shard_count;
    let mut outcomes = Vec::with_capacity(shard_count);
    for shard_index in 0..shard_count.max(1) {
        let shard = Shard::new(shard_index, shard_count)?;
        let members = shard.select(entry_dirs.clone());
        info!(
            shard_index,
            shard_count,
            entries = members.len(),
            "processing shard"
        );
        outcomes.push(process_shard(shard, &members, &registry, &config.entries_root));
    }

    let merged = IndexBuilder::merge(outcomes);
    let mut report = RunReport {
        anomalies: merged.anomalies,
        partial_failure: merged.partial_failure,
        failed_shards: merged.failed_shards,
    };

    let anchors = AnchorChecker::new(&policies).check(merged.index.rows());
    report.extend(anchors.anomalies.iter().cloned());

    let aggregator = MetricsAggregator::with_thresholds(policies[0].tier_levels.thresholds);
    let (metrics, invariant_anomalies) = aggregator.aggregate(&merged.index);
    report.extend(invariant_anomalies);

    report.sort();
    info!(
        rows = merged.index.len(),
        anomalies = report.anomalies.len(),
        "pipeline run complete"
    );

    Ok(RunOutput {
        index: merged.index,
        metrics,
        anchors,
        report,
    })
}

/// Find every entry directory under the corpus root, sorted so shard
/// assignment is independent of filesystem iteration order.
fn discover_entries(root: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(error) => {
                warn!(%error, "skipping unreadable path during discovery");
                None
            }
        })
        .filter(|entry| {
            entry.file_type().is_file() && entry.file_name().to_str() == Some(PRIMARY_DOC)
        })
        .filter_map(|entry| entry.path().parent().map(Path::to_path_buf))
        .collect();
    dirs.sort();
    dirs
}

/// Read and schema-validate one shard's entries.
///
/// Per-entry failures never escape: a bad primary document or a
/// blocking violation excludes that entry only. A blocking violation
/// in a *secondary* document degrades that block, matching the
/// reader's treatment of malformed secondary documents.
fn process_shard(
    shard: Shard,
    entry_dirs: &[PathBuf],
    registry: &SchemaRegistry,
    corpus_root: &Path,
) -> ShardOutcome {
    if !corpus_root.exists() {
        return ShardOutcome::failed(
            shard.index(),
            format!("entries root {} became unreadable", corpus_root.display()),
        );
    }

    let mut outcome = ShardOutcome::completed(shard.index());
    for dir in entry_dirs {
        let mut raw = match read_entry(dir, corpus_root) {
            Ok(raw) => raw,
            Err(failure) => {
                warn!(entry_dir = %dir.display(), %failure, "excluding unparsable entry");
                outcome
                    .anomalies
                    .push(Anomaly::parse_failure(dir_fallback_id(dir), failure.to_string()));
                continue;
            }
        };

        let violations = registry.validate(DocKind::Entry, &raw.schema_version, &raw.entry_doc);
        let blocking = violations.iter().any(Violation::is_blocking);
        for violation in &violations {
            outcome.anomalies.push(Anomaly::schema_violation(
                raw.id.clone(),
                format!("{}: {}", DocKind::Entry, violation),
            ));
        }
        if blocking {
            warn!(entry_id = %raw.id, "excluding entry with blocking schema violations");
            continue;
        }

        validate_secondary(registry, DocKind::Simulation, &mut raw.simulation_doc, &raw.id, &mut outcome.anomalies);
        validate_secondary(registry, DocKind::Citations, &mut raw.citations_doc, &raw.id, &mut outcome.anomalies);

        let entry_id = raw.id.clone();
        match raw.into_record() {
            Ok(record) => outcome.records.push(record),
            Err(failure) => {
                outcome
                    .anomalies
                    .push(Anomaly::parse_failure(entry_id, failure.to_string()));
            }
        }
    }
    outcome
}

/// Validate an optional secondary document in place; a blocking
/// violation drops the block, never the entry.
fn validate_secondary(
    registry: &SchemaRegistry,
    kind: DocKind,
    doc: &mut Option<serde_json::Value>,
    entry_id: &str,
    anomalies: &mut Vec<Anomaly>,
) {
    let Some(value) = doc.take() else { return };
    let violations = registry.validate(kind, SECONDARY_SCHEMA_VERSION, &value);
    for violation in &violations {
        anomalies.push(Anomaly::schema_violation(
            entry_id.to_string(),
            format!("{}: {}", kind, violation),
        ));
    }
    if violations.iter().any(Violation::is_blocking) {
        warn!(entry_id, kind = %kind, "dropping secondary document with blocking violations");
    } else {
        *doc = Some(value);
    }
}

fn dir_fallback_id(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::fs;

    const POLICY_YAML: &str = r#"
tier_levels:
  version: "1.2.0"
  thresholds:
    gold: 0.80
    silver: 0.60
    bronze: 0.40
    red: 0.20
simulation:
  version: "1.0.1-reml-grid"
  n_draws: 10000
journal_trust:
  snapshot_date: "2025-10-05"
  snapshots:
    - "2025-10-05"
"#;

    struct Fixture {
        _tmp: tempfile::TempDir,
        config: PipelineConfig,
        fingerprint: String,
    }

    fn entry_doc(id: &str, tier: &str, label: &str, fingerprint: &str) -> Value {
        json!({
            "@id": format!("assay:entry:{}", id),
            "schema_version": "v1",
            "tier": tier,
            "label": label,
            "gate_results": {
                "phi": "PASS",
                "r": "PASS",
                "j": 0.82,
                "k": "PASS",
                "l": "PASS"
            },
            "policy_fingerprint": fingerprint,
            "policy_refs": {
                "tier_levels": { "version": "1.2.0" },
                "simulation": { "version": "1.0.1-reml-grid" },
                "journal_trust": { "snapshot_date": "2025-10-05" }
            }
        })
    }

    fn simulation_doc(p: f64) -> Value {
        json!({
            "seed": 42,
            "n_draws": 10000,
            "p_effect_gt_delta": p,
            "mu_hat": 0.3,
            "mu_ci95": [0.1, 0.5],
            "i2": 0.2,
            "tau2": 0.01
        })
    }

    fn write_doc(dir: &Path, name: &str, doc: &Value) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), serde_json::to_string_pretty(doc).unwrap()).unwrap();
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();

        let schema_dir = root.join("schemas");
        fs::create_dir_all(&schema_dir).unwrap();
        fs::write(
            schema_dir.join("entry.v1.schema.json"),
            include_str!("../../../schemas/entry.v1.schema.json"),
        )
        .unwrap();
        fs::write(
            schema_dir.join("entry.v2.schema.json"),
            include_str!("../../../schemas/entry.v2.schema.json"),
        )
        .unwrap();
        fs::write(
            schema_dir.join("simulation.v1.schema.json"),
            include_str!("../../../schemas/simulation.v1.schema.json"),
        )
        .unwrap();
        fs::write(
            schema_dir.join("citations.v1.schema.json"),
            include_str!("../../../schemas/citations.v1.schema.json"),
        )
        .unwrap();

        let policy_path = root.join("policy.yaml");
        fs::write(&policy_path, POLICY_YAML).unwrap();
        let fingerprint = PolicyConfig::from_yaml(POLICY_YAML)
            .unwrap()
            .fingerprint()
            .to_string();

        let entries = root.join("entries");

        // Fully populated gold entry, nested two levels deep.
        let gold = entries.join("supplements/vitamin-d/mood");
        write_doc(&gold, PRIMARY_DOC, &{
            let mut doc = entry_doc("vitamin-d-mood", "gold", "PASS", &fingerprint);
            doc["gate_results"]["j"] = json!(0.91);
            doc
        });
        write_doc(&gold, entry::SIMULATION_DOC, &simulation_doc(0.86));
        write_doc(
            &gold,
            entry::CITATIONS_DOC,
            &json!({ "studies": [{ "study_id": "s1", "doi": "10.1/x", "year": 2022 }] }),
        );

        // Bronze entry with no simulation document.
        let bronze = entries.join("supplements/zinc/immunity");
        write_doc(
            &bronze,
            PRIMARY_DOC,
            &entry_doc("zinc-immunity", "bronze", "AMBER", &fingerprint),
        );

        // Masked black entry.
        let black = entries.join("herbs/kava/anxiety");
        write_doc(&black, PRIMARY_DOC, &{
            let mut doc = entry_doc("kava-anxiety", "black", "FAIL", &fingerprint);
            doc["gate_results"]["j"] = json!("BLACK");
            doc["gate_results"]["k"] = json!("FAIL");
            doc
        });
        write_doc(&black, entry::SIMULATION_DOC, &simulation_doc(0.12));

        Fixture {
            config: PipelineConfig {
                entries_root: entries,
                schema_dir,
                policy_paths: vec![policy_path],
                shard_count: 1,
            },
            fingerprint,
            _tmp: tmp,
        }
    }

    #[test]
    fn test_full_pipeline_happy_path() {
        let fixture = fixture();
        let output = run(&fixture.config).unwrap();

        assert_eq!(output.index.len(), 3);
        assert_eq!(output.metrics.total_entries, 3);
        assert_eq!(
            output.anchors.primary_fingerprint.as_deref(),
            Some(fixture.fingerprint.as_str())
        );
        assert_eq!(output.anchors.groups.len(), 1);
        assert!(output.report.is_empty(), "{:?}", output.report);

        // The bronze entry has no simulation block: absent, not zero.
        let bronze = output
            .index
            .rows()
            .iter()
            .find(|r| r.id == "zinc-immunity")
            .unwrap();
        assert_eq!(bronze.p_effect_gt_delta, None);
        assert_eq!(output.metrics.trust_masked, 1);
        assert_eq!(output.metrics.trust_scored, 2);
    }

    #[test]
    fn test_idempotent_over_unchanged_tree() {
        let fixture = fixture();
        let first = run(&fixture.config).unwrap();
        let second = run(&fixture.config).unwrap();

        let rows = |output: &RunOutput| -> Vec<EntryRow> {
            output.index.rows_sorted_by_id().into_iter().cloned().collect()
        };
        assert_eq!(rows(&first), rows(&second));
        assert_eq!(first.report, second.report);
        assert_eq!(first.metrics, second.metrics);
    }

    #[test]
    fn test_shard_counts_agree() {
        let fixture = fixture();
        let whole = run(&fixture.config).unwrap();

        let mut sharded_config = fixture.config.clone();
        sharded_config.shard_count = 3;
        let sharded = run(&sharded_config).unwrap();

        let ids = |output: &RunOutput| -> Vec<String> {
            output
                .index
                .rows_sorted_by_id()
                .iter()
                .map(|r| r.id.clone())
                .collect()
        };
        assert_eq!(ids(&whole), ids(&sharded));
        assert_eq!(whole.metrics.tier_distribution, sharded.metrics.tier_distribution);
    }

    #[test]
    fn test_parse_failure_is_local_not_fatal() {
        let fixture = fixture();
        let broken = fixture.config.entries_root.join("broken/entry");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join(PRIMARY_DOC), "{not json").unwrap();

        let output = run(&fixture.config).unwrap();
        assert_eq!(output.index.len(), 3);
        assert_eq!(output.report.count(AnomalyCategory::ParseFailure), 1);
    }

    #[test]
    fn test_blocking_violation_excludes_entry() {
        let fixture = fixture();
        let invalid = fixture.config.entries_root.join("invalid/entry");
        let mut doc = entry_doc("no-tier", "gold", "PASS", &fixture.fingerprint);
        doc.as_object_mut().unwrap().remove("tier");
        write_doc(&invalid, PRIMARY_DOC, &doc);

        let output = run(&fixture.config).unwrap();
        assert_eq!(output.index.len(), 3);
        assert!(output.report.count(AnomalyCategory::SchemaViolation) >= 1);
    }

    #[test]
    fn test_blocking_violation_in_secondary_degrades_block() {
        let fixture = fixture();
        let degraded = fixture.config.entries_root.join("degraded/entry");
        write_doc(
            &degraded,
            PRIMARY_DOC,
            &entry_doc("degraded", "red", "AMBER", &fixture.fingerprint),
        );
        // Probability out of range: blocking against the simulation
        // descriptor, so the block is dropped but the entry survives.
        write_doc(&degraded, entry::SIMULATION_DOC, &json!({ "p_effect_gt_delta": 3.0 }));

        let output = run(&fixture.config).unwrap();
        let row = output
            .index
            .rows()
            .iter()
            .find(|r| r.id == "degraded")
            .unwrap();
        assert_eq!(row.p_effect_gt_delta, None);
        assert!(output.report.count(AnomalyCategory::SchemaViolation) >= 1);
    }

    #[test]
    fn test_duplicate_identifier_first_wins() {
        let fixture = fixture();
        // Same @id under a second path, different tier.
        let twin = fixture.config.entries_root.join("alt-path/vitamin-d");
        write_doc(&twin, PRIMARY_DOC, &{
            let mut doc = entry_doc("vitamin-d-mood", "silver", "PASS", &fixture.fingerprint);
            doc["gate_results"]["j"] = json!(0.5);
            doc
        });

        let output = run(&fixture.config).unwrap();
        let matches: Vec<&EntryRow> = output
            .index
            .rows()
            .iter()
            .filter(|r| r.id == "vitamin-d-mood")
            .collect();
        assert_eq!(matches.len(), 1);
        assert_eq!(output.report.count(AnomalyCategory::DuplicateId), 1);
        // First encountered wins; discovery sorts paths, and
        // "alt-path" sorts before "supplements".
        assert_eq!(matches[0].tier, Tier::Silver);
    }

    #[test]
    fn test_monotone_violation_surfaces() {
        let fixture = fixture();
        let bad = fixture.config.entries_root.join("bad/monotone");
        write_doc(&bad, PRIMARY_DOC, &{
            let mut doc = entry_doc("unsafe-gold", "gold", "PASS", &fixture.fingerprint);
            doc["gate_results"]["k"] = json!("FAIL");
            doc
        });

        let output = run(&fixture.config).unwrap();
        assert_eq!(output.metrics.monotone_violations, vec!["unsafe-gold".to_string()]);
        assert_eq!(output.report.count(AnomalyCategory::MonotoneViolation), 1);
        // Tier recorded as-is.
        let row = output.index.rows().iter().find(|r| r.id == "unsafe-gold").unwrap();
        assert_eq!(row.tier, Tier::Gold);
    }

    #[test]
    fn test_fatal_when_schema_dir_missing() {
        let fixture = fixture();
        let mut config = fixture.config.clone();
        config.schema_dir = PathBuf::from("/nonexistent/schemas");
        assert!(matches!(run(&config), Err(PipelineError::Schema(_))));
    }

    #[test]
    fn test_fatal_when_policy_missing() {
        let fixture = fixture();
        let mut config = fixture.config.clone();
        config.policy_paths = vec![PathBuf::from("/nonexistent/policy.yaml")];
        assert!(matches!(run(&config), Err(PipelineError::Policy(_))));
    }

    #[test]
    fn test_fatal_when_entries_root_missing() {
        let fixture = fixture();
        let mut config = fixture.config.clone();
        config.entries_root = PathBuf::from("/nonexistent/entries");
        assert!(matches!(
            run(&config),
            Err(PipelineError::EntriesRootMissing(_))
        ));
    }

    #[test]
    fn test_fatal_when_no_entries_found() {
        let fixture = fixture();
        let empty = fixture.config.entries_root.parent().unwrap().join("empty");
        fs::create_dir_all(&empty).unwrap();
        let mut config = fixture.config.clone();
        config.entries_root = empty;
        assert!(matches!(run(&config), Err(PipelineError::NoEntries(_))));
    }

    #[test]
    fn test_invalid_shard_count_rejected() {
        let fixture = fixture();
        let mut config = fixture.config.clone();
        config.shard_count = 0;
        assert!(matches!(run(&config), Err(PipelineError::Shard(_))));
    }

    #[test]
    fn test_mixed_schema_versions_coexist() {
        let fixture = fixture();
        let v2 = fixture.config.entries_root.join("v2/entry");
        write_doc(&v2, PRIMARY_DOC, &{
            let mut doc = entry_doc("ashwagandha-stress", "silver", "PASS", &fixture.fingerprint);
            doc["schema_version"] = json!("v2");
            doc["intervention_type"] = json!("supplement");
            doc
        });

        let output = run(&fixture.config).unwrap();
        assert_eq!(output.index.len(), 4);
        // No false blocking violations for a correct v2 entry.
        assert_eq!(output.report.count(AnomalyCategory::SchemaViolation), 0);
        let row = output
            .index
            .rows()
            .iter()
            .find(|r| r.id == "ashwagandha-stress")
            .unwrap();
        assert_eq!(row.intervention_type.as_deref(), Some("supplement"));
    }
}

//! The canonical index: one row per accepted entry.
//!
//! Built fresh each run by folding validated records, append-only
//! while building, read-only once finished. Duplicate identifiers are
//! first-wins-with-warning: the same entry may legitimately appear
//! under two snapshot paths during a policy transition, so a duplicate
//! is an anomaly, not a fatal error.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::report::Anomaly;
use crate::types::{EntryRecord, GateOutcome, Label, Tier, TrustOutcome};

/// One row of the canonical index. The column set is stable; fields
/// sourced from an absent secondary document stay `None` and serialize
/// as nulls, never zeros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRow {
    pub id: String,
    pub entry_path: String,
    pub schema_version: String,
    pub tier: Tier,
    pub label: Label,
    pub gate_phi: GateOutcome,
    pub gate_r: GateOutcome,
    pub gate_j: TrustOutcome,
    pub gate_k: GateOutcome,
    pub gate_l: GateOutcome,
    pub policy_fingerprint: String,
    pub tier_levels_version: String,
    pub simulation_version: String,
    pub journal_snapshot: String,
    pub intervention_type: Option<String>,
    pub seed: Option<u64>,
    pub n_draws: Option<u64>,
    pub p_effect_gt_delta: Option<f64>,
    pub mu_hat: Option<f64>,
    pub mu_ci95_lower: Option<f64>,
    pub mu_ci95_upper: Option<f64>,
    pub i2: Option<f64>,
    pub tau2: Option<f64>,
    pub n_studies: Option<usize>,
}

impl EntryRow {
    pub fn from_record(record: &EntryRecord) -> Self {
        let simulation = record.simulation.as_ref();
        Self {
            id: record.id.clone(),
            entry_path: record.entry_path.clone(),
            schema_version: record.schema_version.clone(),
            tier: record.tier,
            label: record.label,
            gate_phi: record.gates.plausibility,
            gate_r: record.gates.robustness,
            gate_j: record.gates.journal_trust,
            gate_k: record.gates.safety,
            gate_l: record.gates.legality,
            policy_fingerprint: record.policy_fingerprint.clone(),
            tier_levels_version: record.policy_refs.tier_levels_version.clone(),
            simulation_version: record.policy_refs.simulation_version.clone(),
            journal_snapshot: record.policy_refs.journal_snapshot.clone(),
            intervention_type: record.intervention_type.clone(),
            seed: simulation.and_then(|s| s.seed),
            n_draws: simulation.and_then(|s| s.n_draws),
            p_effect_gt_delta: simulation.and_then(|s| s.p_effect_gt_delta),
            mu_hat: simulation.and_then(|s| s.mu_hat),
            mu_ci95_lower: simulation.and_then(|s| s.mu_ci95.map(|ci| ci.0)),
            mu_ci95_upper: simulation.and_then(|s| s.mu_ci95.map(|ci| ci.1)),
            i2: simulation.and_then(|s| s.i2),
            tau2: simulation.and_then(|s| s.tau2),
            n_studies: record.citations.as_ref().map(|c| c.n_studies),
        }
    }
}

/// The canonical index, consumed read-only by the metrics aggregator
/// and by downstream reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Index {
    rows: Vec<EntryRow>,
}

impl Index {
    /// Wrap rows loaded from a serialized index.
    pub fn from_rows(rows: Vec<EntryRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[EntryRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows sorted by entry identifier, for display and serialization.
    /// In-memory row order is not semantically meaningful.
    pub fn rows_sorted_by_id(&self) -> Vec<&EntryRow> {
        let mut rows: Vec<&EntryRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }
}

/// Whether a shard's read-validate sequence completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardStatus {
    Completed,
    /// The shard failed catastrophically; its entries are missing from
    /// the merged index but other shards' results remain valid.
    Failed { detail: String },
}

/// Everything one shard produced.
#[derive(Debug)]
pub struct ShardOutcome {
    pub shard_index: usize,
    pub status: ShardStatus,
    pub records: Vec<EntryRecord>,
    pub anomalies: Vec<Anomaly>,
}

impl ShardOutcome {
    pub fn completed(shard_index: usize) -> Self {
        Self {
            shard_index,
            status: ShardStatus::Completed,
            records: Vec::new(),
            anomalies: Vec::new(),
        }
    }

    pub fn failed(shard_index: usize, detail: impl Into<String>) -> Self {
        Self {
            shard_index,
            status: ShardStatus::Failed { detail: detail.into() },
            records: Vec::new(),
            anomalies: Vec::new(),
        }
    }
}

/// Result of merging all shard outcomes into one index.
#[derive(Debug)]
pub struct MergeOutput {
    pub index: Index,
    pub anomalies: Vec<Anomaly>,
    /// True when at least one shard failed; "zero rows from shard N"
    /// then means "shard failed", not "shard was empty".
    pub partial_failure: bool,
    pub failed_shards: Vec<usize>,
}

/// Folds validated records into the canonical index.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    rows: Vec<EntryRow>,
    seen: HashSet<String>,
    anomalies: Vec<Anomaly>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Returns false (recording an anomaly) when the
    /// identifier was already present; the first occurrence wins.
    pub fn push(&mut self, record: &EntryRecord) -> bool {
        if !self.seen.insert(record.id.clone()) {
            warn!(entry_id = %record.id, "duplicate entry identifier, keeping first occurrence");
            self.anomalies.push(Anomaly::duplicate_id(
                record.id.clone(),
                format!(
                    "duplicate entry identifier (second occurrence at '{}' dropped)",
                    record.entry_path
                ),
            ));
            return false;
        }
        self.rows.push(EntryRow::from_record(record));
        true
    }

    pub fn finish(self) -> (Index, Vec<Anomaly>) {
        (Index { rows: self.rows }, self.anomalies)
    }

    /// Merge shard outcomes into one index.
    ///
    /// This is the single-writer step: duplicate detection spans shard
    /// boundaries, so the fold must not run concurrently.
    pub fn merge(outcomes: Vec<ShardOutcome>) -> MergeOutput {
        let mut builder = IndexBuilder::new();
        let mut anomalies = Vec::new();
        let mut failed_shards = Vec::new();

        for outcome in outcomes {
            anomalies.extend(outcome.anomalies);
            match outcome.status {
                ShardStatus::Completed => {
                    for record in &outcome.records {
                        builder.push(record);
                    }
                }
                ShardStatus::Failed { detail } => {
                    warn!(shard_index = outcome.shard_index, %detail, "shard failed");
                    anomalies.push(Anomaly::shard_failure(outcome.shard_index, detail));
                    failed_shards.push(outcome.shard_index);
                }
            }
        }

        let (index, duplicate_anomalies) = builder.finish();
        anomalies.extend(duplicate_anomalies);
        info!(rows = index.len(), "merged shard outcomes into canonical index");

        MergeOutput {
            index,
            anomalies,
            partial_failure: !failed_shards.is_empty(),
            failed_shards,
        }
    }
}

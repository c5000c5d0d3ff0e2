//! Anomaly reporting for ingestion runs.
//!
//! Every per-entry problem the pipeline finds is surfaced as an
//! [`Anomaly`] rather than aborting the run. The collected
//! [`RunReport`] is the second half of every run's output, next to the
//! canonical index, and is meant for direct inclusion in a generated
//! summary by an external report-assembly step.

use serde::{Deserialize, Serialize};

/// Category of a reported anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyCategory {
    /// Primary document unreadable or malformed; entry excluded.
    ParseFailure,
    /// Schema violation (blocking violations also exclude the entry).
    SchemaViolation,
    /// Fingerprint mismatch, minority fingerprint group, or unknown
    /// snapshot reference.
    PolicyAnomaly,
    /// Duplicate entry identifier; first occurrence kept.
    DuplicateId,
    /// Safety-monotone invariant violated upstream.
    MonotoneViolation,
    /// Journal-trust masking invariant violated upstream.
    MaskingViolation,
    /// Recorded tier not derivable from gates and effect probability.
    TierConsistency,
    /// Recorded label does not match the tier-label mapping.
    LabelConsistency,
    /// A whole shard failed catastrophically.
    ShardFailure,
}

/// One reported anomaly: entry identifier (when entry-scoped), category
/// and human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    /// The affected entry, or `None` for run- or group-scoped anomalies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,

    pub category: AnomalyCategory,

    pub detail: String,
}

impl Anomaly {
    pub fn parse_failure(entry_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            entry_id: Some(entry_id.into()),
            category: AnomalyCategory::ParseFailure,
            detail: detail.into(),
        }
    }

    pub fn schema_violation(entry_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            entry_id: Some(entry_id.into()),
            category: AnomalyCategory::SchemaViolation,
            detail: detail.into(),
        }
    }

    pub fn policy(entry_id: Option<String>, detail: impl Into<String>) -> Self {
        Self {
            entry_id,
            category: AnomalyCategory::PolicyAnomaly,
            detail: detail.into(),
        }
    }

    pub fn duplicate_id(entry_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            entry_id: Some(entry_id.into()),
            category: AnomalyCategory::DuplicateId,
            detail: detail.into(),
        }
    }

    pub fn monotone_violation(entry_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            entry_id: Some(entry_id.into()),
            category: AnomalyCategory::MonotoneViolation,
            detail: detail.into(),
        }
    }

    pub fn masking_violation(entry_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            entry_id: Some(entry_id.into()),
            category: AnomalyCategory::MaskingViolation,
            detail: detail.into(),
        }
    }

    pub fn tier_consistency(entry_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            entry_id: Some(entry_id.into()),
            category: AnomalyCategory::TierConsistency,
            detail: detail.into(),
        }
    }

    pub fn label_consistency(entry_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            entry_id: Some(entry_id.into()),
            category: AnomalyCategory::LabelConsistency,
            detail: detail.into(),
        }
    }

    pub fn shard_failure(shard_index: usize, detail: impl Into<String>) -> Self {
        Self {
            entry_id: None,
            category: AnomalyCategory::ShardFailure,
            detail: format!("shard {}: {}", shard_index, detail.into()),
        }
    }
}

/// The complete anomaly report for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub anomalies: Vec<Anomaly>,

    /// Set when at least one shard failed; the index then covers only
    /// the shards that completed.
    pub partial_failure: bool,

    /// Indices of shards that failed catastrophically.
    pub failed_shards: Vec<usize>,
}

impl RunReport {
    pub fn push(&mut self, anomaly: Anomaly) {
        self.anomalies.push(anomaly);
    }

    pub fn extend(&mut self, anomalies: impl IntoIterator<Item = Anomaly>) {
        self.anomalies.extend(anomalies);
    }

    /// Number of anomalies in the given category.
    pub fn count(&self, category: AnomalyCategory) -> usize {
        self.anomalies.iter().filter(|a| a.category == category).count()
    }

    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty() && !self.partial_failure
    }

    /// Sort anomalies for deterministic reporting: by entry identifier
    /// (run-scoped anomalies first), then category, then detail.
    pub fn sort(&mut self) {
        self.anomalies
            .sort_by(|a, b| (&a.entry_id, a.category, &a.detail).cmp(&(&b.entry_id, b.category, &b.detail)));
        self.failed_shards.sort_unstable();
    }
}

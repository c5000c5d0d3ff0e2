//! Tier-level metrics over the canonical index.
//!
//! Strictly read-only reporting: tier and gate labels are upstream
//! decisions, so invariant violations (safety-monotone, journal-trust
//! masking, tier derivability) are surfaced as anomalies and the
//! offending entries are never reclassified.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::index::{EntryRow, Index};
use crate::policy::TierThresholds;
use crate::report::Anomaly;
use crate::types::{Gate, Label, Tier, TrustOutcome};

/// Bucket edges for the journal-trust score histogram. The last
/// bucket is closed on both ends.
pub const TRUST_BUCKET_EDGES: [f64; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];

/// Percentiles reported for the effect-probability distribution.
const EFFECT_PERCENTILES: [u8; 7] = [0, 10, 25, 50, 75, 90, 100];

/// Count and proportion for one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierCount {
    pub tier: Tier,
    pub label: Label,
    pub count: usize,
    pub proportion: f64,
}

/// Independent fail statistics for one gate. For the journal-trust
/// gate, "fail" means the masking sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateFailRate {
    pub gate: String,
    pub evaluated: usize,
    pub fail_count: usize,
    pub fail_rate: f64,
}

/// One histogram bucket of journal-trust scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustBucket {
    pub lo: f64,
    pub hi: f64,
    pub count: usize,
}

/// One effect-probability percentile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectPercentile {
    pub percentile: String,
    pub value: f64,
}

/// Label totals across all accepted entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCounts {
    pub pass: usize,
    pub amber: usize,
    pub fail: usize,
}

/// The aggregate statistics for one run: a flat, serializable
/// structure with stable field names, handed to downstream plotting
/// and report assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_entries: usize,
    pub tier_distribution: Vec<TierCount>,
    pub label_counts: LabelCounts,
    pub gate_fail_rates: Vec<GateFailRate>,
    pub trust_buckets: Vec<TrustBucket>,
    /// Entries whose journal-trust gate carries the masking sentinel;
    /// excluded from the score buckets.
    pub trust_masked: usize,
    /// Entries contributing a journal-trust score to the buckets.
    pub trust_scored: usize,
    pub effect_percentiles: Vec<EffectPercentile>,
    /// Identifiers of entries violating the safety-monotone invariant.
    pub monotone_violations: Vec<String>,
    /// Identifiers of entries violating the masking invariant.
    pub masking_violations: Vec<String>,
}

/// Computes [`Metrics`] from a finished index.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    thresholds: Option<TierThresholds>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable tier-derivability checking against the published
    /// thresholds. Without thresholds only the threshold-free checks
    /// run.
    pub fn with_thresholds(thresholds: TierThresholds) -> Self {
        Self {
            thresholds: Some(thresholds),
        }
    }

    /// Aggregate the index into metrics plus invariant anomalies.
    pub fn aggregate(&self, index: &Index) -> (Metrics, Vec<Anomaly>) {
        let rows = index.rows();
        let total = rows.len();
        let mut anomalies = Vec::new();

        // Deterministic anomaly order regardless of index row order.
        let mut sorted_rows: Vec<&EntryRow> = rows.iter().collect();
        sorted_rows.sort_by(|a, b| a.id.cmp(&b.id));

        let tier_distribution = tier_distribution(rows, total);
        let label_counts = label_counts(rows);
        let gate_fail_rates = gate_fail_rates(rows, total);
        let (trust_buckets, trust_scored, trust_masked) = trust_buckets(rows);
        let effect_percentiles = effect_percentiles(rows);

        let mut monotone_violations = Vec::new();
        let mut masking_violations = Vec::new();

        for row in &sorted_rows {
            if row.gate_phi.is_fail() || row.gate_k.is_fail() {
                if !row.tier.is_lowest() {
                    let failing = if row.gate_phi.is_fail() { "phi" } else { "k" };
                    monotone_violations.push(row.id.clone());
                    anomalies.push(Anomaly::monotone_violation(
                        row.id.clone(),
                        format!(
                            "gate {} is FAIL but recorded tier is '{}' (expected '{}')",
                            failing,
                            row.tier,
                            Tier::Black
                        ),
                    ));
                }
            } else if row.gate_j.is_masked() {
                if !row.tier.is_lowest() {
                    masking_violations.push(row.id.clone());
                    anomalies.push(Anomaly::masking_violation(
                        row.id.clone(),
                        format!(
                            "journal-trust gate is masked but recorded tier is '{}' (expected '{}')",
                            row.tier,
                            Tier::Black
                        ),
                    ));
                }
            } else if let (Some(thresholds), Some(p)) = (&self.thresholds, row.p_effect_gt_delta) {
                // Overrides are clean here, so the recorded tier must
                // fall out of the published cut points alone.
                let expected = thresholds.tier_for(p);
                if expected != row.tier {
                    anomalies.push(Anomaly::tier_consistency(
                        row.id.clone(),
                        format!(
                            "recorded tier '{}' is not derivable from effect probability {} (expected '{}')",
                            row.tier, p, expected
                        ),
                    ));
                }
            }

            if row.label != row.tier.label() {
                anomalies.push(Anomaly::label_consistency(
                    row.id.clone(),
                    format!(
                        "recorded label '{}' does not match tier '{}' (expected '{}')",
                        row.label,
                        row.tier,
                        row.tier.label()
                    ),
                ));
            }
        }

        info!(
            total,
            anomalies = anomalies.len(),
            "aggregated index into metrics"
        );

        let metrics = Metrics {
            total_entries: total,
            tier_distribution,
            label_counts,
            gate_fail_rates,
            trust_buckets,
            trust_masked,
            trust_scored,
            effect_percentiles,
            monotone_violations,
            masking_violations,
        };
        (metrics, anomalies)
    }
}

fn tier_distribution(rows: &[EntryRow], total: usize) -> Vec<TierCount> {
    Tier::ORDERED
        .iter()
        .map(|&tier| {
            let count = rows.iter().filter(|r| r.tier == tier).count();
            TierCount {
                tier,
                label: tier.label(),
                count,
                proportion: proportion(count, total),
            }
        })
        .collect()
}

fn label_counts(rows: &[EntryRow]) -> LabelCounts {
    let mut counts = LabelCounts::default();
    for row in rows {
        match row.label {
            Label::Pass => counts.pass += 1,
            Label::Amber => counts.amber += 1,
            Label::Fail => counts.fail += 1,
        }
    }
    counts
}

fn gate_fail_rates(rows: &[EntryRow], total: usize) -> Vec<GateFailRate> {
    Gate::ALL
        .iter()
        .map(|gate| {
            let fail_count = match gate {
                Gate::Plausibility => rows.iter().filter(|r| r.gate_phi.is_fail()).count(),
                Gate::Robustness => rows.iter().filter(|r| r.gate_r.is_fail()).count(),
                Gate::JournalTrust => rows.iter().filter(|r| r.gate_j.is_masked()).count(),
                Gate::Safety => rows.iter().filter(|r| r.gate_k.is_fail()).count(),
                Gate::Legality => rows.iter().filter(|r| r.gate_l.is_fail()).count(),
            };
            GateFailRate {
                gate: gate.key().to_string(),
                evaluated: total,
                fail_count,
                fail_rate: proportion(fail_count, total),
            }
        })
        .collect()
}

fn trust_buckets(rows: &[EntryRow]) -> (Vec<TrustBucket>, usize, usize) {
    let mut buckets: Vec<TrustBucket> = TRUST_BUCKET_EDGES
        .windows(2)
        .map(|edge| TrustBucket {
            lo: edge[0],
            hi: edge[1],
            count: 0,
        })
        .collect();

    let mut scored = 0;
    let mut masked = 0;
    for row in rows {
        match row.gate_j {
            TrustOutcome::Masked => masked += 1,
            TrustOutcome::Score(score) => {
                scored += 1;
                for bucket in buckets.iter_mut() {
                    let last = bucket.hi >= 1.0;
                    if score >= bucket.lo && (score < bucket.hi || (last && score <= bucket.hi)) {
                        bucket.count += 1;
                        break;
                    }
                }
            }
        }
    }
    (buckets, scored, masked)
}

fn effect_percentiles(rows: &[EntryRow]) -> Vec<EffectPercentile> {
    let mut values: Vec<f64> = rows.iter().filter_map(|r| r.p_effect_gt_delta).collect();
    if values.is_empty() {
        return Vec::new();
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    EFFECT_PERCENTILES
        .iter()
        .map(|&q| EffectPercentile {
            percentile: format!("p{}", q),
            value: percentile(&values, f64::from(q)),
        })
        .collect()
}

/// Linear-interpolation percentile over sorted values.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
    }
}

fn proportion(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

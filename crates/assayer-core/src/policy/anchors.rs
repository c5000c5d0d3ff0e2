//! Policy anchor checking.
//!
//! Confirms that every indexed entry was produced under a known,
//! reproducible policy configuration. A corpus spanning two successive
//! policy versions (a mid-run threshold update) is reported as
//! fingerprint groups with one anomaly per minority group rather than
//! failing the whole run. A fingerprint that cannot be reproduced from
//! any known policy state is a hard anomaly and is never silently
//! grouped.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::index::EntryRow;
use crate::report::Anomaly;

use super::config::{PolicyConfig, PolicyFingerprint};

/// Entries sharing one observed policy fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FingerprintGroup {
    pub fingerprint: String,
    pub entry_ids: Vec<String>,
}

impl FingerprintGroup {
    pub fn len(&self) -> usize {
        self.entry_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_ids.is_empty()
    }
}

/// Outcome of the anchor check.
#[derive(Debug, Clone, Serialize)]
pub struct AnchorReport {
    /// Fingerprint of the largest observed group (ties break toward
    /// the lexicographically first fingerprint), if any rows exist.
    pub primary_fingerprint: Option<String>,

    /// All observed groups, largest first.
    pub groups: Vec<FingerprintGroup>,

    pub anomalies: Vec<Anomaly>,
}

/// Checks index rows against the known policy states.
pub struct AnchorChecker {
    expected: Vec<PolicyFingerprint>,
    snapshots: BTreeSet<String>,
}

impl AnchorChecker {
    /// Build a checker from the known policy states. Passing two
    /// configs declares a legitimate mid-run policy transition.
    pub fn new(known_states: &[PolicyConfig]) -> Self {
        let expected: Vec<PolicyFingerprint> =
            known_states.iter().map(PolicyConfig::fingerprint).collect();
        let snapshots: BTreeSet<String> = known_states
            .iter()
            .flat_map(|config| config.available_snapshots())
            .map(String::from)
            .collect();
        Self { expected, snapshots }
    }

    /// Check all rows. Never drops or mutates a row; provenance
    /// problems surface as anomalies on retained entries.
    pub fn check(&self, rows: &[EntryRow]) -> AnchorReport {
        let mut by_fingerprint: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for row in rows {
            by_fingerprint
                .entry(row.policy_fingerprint.as_str())
                .or_default()
                .push(row.id.as_str());
        }

        // Largest group first; BTreeMap iteration makes the tie-break
        // toward the lexicographically first fingerprint deterministic.
        let mut primary: Option<&str> = None;
        for (fingerprint, ids) in &by_fingerprint {
            match primary {
                Some(current) if by_fingerprint[current].len() >= ids.len() => {}
                _ => primary = Some(*fingerprint),
            }
        }

        let mut anomalies = Vec::new();
        let total = rows.len();

        if let Some(primary) = primary {
            for (fingerprint, ids) in &by_fingerprint {
                if *fingerprint != primary {
                    warn!(
                        fingerprint = *fingerprint,
                        entries = ids.len(),
                        "minority policy fingerprint group"
                    );
                    anomalies.push(Anomaly::policy(
                        None,
                        format!(
                            "fingerprint group {} covers {} of {} entries (primary group {} has {})",
                            fingerprint,
                            ids.len(),
                            total,
                            primary,
                            by_fingerprint[primary].len()
                        ),
                    ));
                }
            }
        }

        // Per-row provenance checks, in identifier order for
        // deterministic reporting.
        let mut sorted_rows: Vec<&EntryRow> = rows.iter().collect();
        sorted_rows.sort_by(|a, b| a.id.cmp(&b.id));

        for row in sorted_rows {
            if !self.snapshots.contains(&row.journal_snapshot) {
                anomalies.push(Anomaly::policy(
                    Some(row.id.clone()),
                    format!(
                        "references journal-trust snapshot '{}' not among the {} available snapshots",
                        row.journal_snapshot,
                        self.snapshots.len()
                    ),
                ));
            }

            if !PolicyFingerprint::is_wellformed(&row.policy_fingerprint) {
                anomalies.push(Anomaly::policy(
                    Some(row.id.clone()),
                    format!(
                        "declared policy fingerprint '{}' is not a sha256 fingerprint",
                        row.policy_fingerprint
                    ),
                ));
            } else if !self
                .expected
                .iter()
                .any(|expected| expected.as_str() == row.policy_fingerprint)
            {
                anomalies.push(Anomaly::policy(
                    Some(row.id.clone()),
                    format!(
                        "declared policy fingerprint {} cannot be reproduced from any known policy configuration",
                        row.policy_fingerprint
                    ),
                ));
            }
        }

        let mut groups: Vec<FingerprintGroup> = by_fingerprint
            .into_iter()
            .map(|(fingerprint, mut ids)| {
                ids.sort_unstable();
                FingerprintGroup {
                    fingerprint: fingerprint.to_string(),
                    entry_ids: ids.into_iter().map(String::from).collect(),
                }
            })
            .collect();
        groups.sort_by(|a, b| b.len().cmp(&a.len()).then(a.fingerprint.cmp(&b.fingerprint)));

        info!(
            groups = groups.len(),
            anomalies = anomalies.len(),
            "policy anchor check complete"
        );

        AnchorReport {
            primary_fingerprint: primary.map(String::from),
            groups,
            anomalies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::AnomalyCategory;
    use crate::types::{GateOutcome, Label, Tier, TrustOutcome};

    fn policy() -> PolicyConfig {
        PolicyConfig::from_yaml(
            r#"
tier_levels:
  version: "1.2.0"
  thresholds:
    gold: 0.80
    silver: 0.60
    bronze: 0.40
    red: 0.20
simulation:
  version: "1.0.1"
journal_trust:
  snapshot_date: "2025-10-05"
"#,
        )
        .unwrap()
    }

    fn row(id: &str, fingerprint: &str) -> EntryRow {
        EntryRow {
            id: id.to_string(),
            entry_path: id.to_string(),
            schema_version: "v1".to_string(),
            tier: Tier::Silver,
            label: Label::Pass,
            gate_phi: GateOutcome::Pass,
            gate_r: GateOutcome::Pass,
            gate_j: TrustOutcome::Score(0.8),
            gate_k: GateOutcome::Pass,
            gate_l: GateOutcome::Pass,
            policy_fingerprint: fingerprint.to_string(),
            tier_levels_version: "1.2.0".to_string(),
            simulation_version: "1.0.1".to_string(),
            journal_snapshot: "2025-10-05".to_string(),
            intervention_type: None,
            seed: None,
            n_draws: None,
            p_effect_gt_delta: Some(0.7),
            mu_hat: None,
            mu_ci95_lower: None,
            mu_ci95_upper: None,
            i2: None,
            tau2: None,
            n_studies: None,
        }
    }

    #[test]
    fn test_single_fingerprint_is_fully_anchored() {
        let config = policy();
        let fp = config.fingerprint();
        let rows: Vec<EntryRow> = (0..10).map(|i| row(&format!("e{}", i), fp.as_str())).collect();

        let report = AnchorChecker::new(&[config]).check(&rows);
        assert_eq!(report.primary_fingerprint.as_deref(), Some(fp.as_str()));
        assert_eq!(report.groups.len(), 1);
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn test_minority_group_reported_not_fatal() {
        let current = policy();
        let mut prior = policy();
        prior.journal_trust.snapshot_date = "2025-07-01".to_string();

        let fp_a = current.fingerprint();
        let fp_b = prior.fingerprint();
        let mut rows: Vec<EntryRow> =
            (0..8).map(|i| row(&format!("a{}", i), fp_a.as_str())).collect();
        rows.extend((0..2).map(|i| {
            let mut r = row(&format!("b{}", i), fp_b.as_str());
            r.journal_snapshot = "2025-07-01".to_string();
            r
        }));

        let report = AnchorChecker::new(&[current, prior]).check(&rows);
        assert_eq!(report.primary_fingerprint.as_deref(), Some(fp_a.as_str()));
        assert_eq!(report.groups.len(), 2);
        assert_eq!(report.groups[0].len(), 8);
        assert_eq!(report.groups[1].len(), 2);

        // Exactly one anomaly: the minority group. Both states are
        // known, so no unanchored-fingerprint anomalies.
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.anomalies[0].category, AnomalyCategory::PolicyAnomaly);
        assert!(report.anomalies[0].detail.contains("2 of 10"));
    }

    #[test]
    fn test_unreproducible_fingerprint_is_hard_anomaly() {
        let config = policy();
        let rows = vec![row("mystery", &format!("sha256:{}", "00".repeat(32)))];

        let report = AnchorChecker::new(&[config]).check(&rows);
        assert!(report
            .anomalies
            .iter()
            .any(|a| a.entry_id.as_deref() == Some("mystery")
                && a.detail.contains("cannot be reproduced")));
    }

    #[test]
    fn test_malformed_fingerprint_reported() {
        let config = policy();
        let rows = vec![row("garbled", "not-a-fingerprint")];

        let report = AnchorChecker::new(&[config]).check(&rows);
        assert!(report
            .anomalies
            .iter()
            .any(|a| a.detail.contains("not a sha256 fingerprint")));
    }

    #[test]
    fn test_unknown_snapshot_reported() {
        let config = policy();
        let fp = config.fingerprint();
        let mut r = row("stale", fp.as_str());
        r.journal_snapshot = "2019-01-01".to_string();

        let report = AnchorChecker::new(&[config]).check(&[r]);
        assert!(report
            .anomalies
            .iter()
            .any(|a| a.entry_id.as_deref() == Some("stale")
                && a.detail.contains("2019-01-01")));
    }

    #[test]
    fn test_empty_index() {
        let report = AnchorChecker::new(&[policy()]).check(&[]);
        assert!(report.primary_fingerprint.is_none());
        assert!(report.groups.is_empty());
        assert!(report.anomalies.is_empty());
    }
}

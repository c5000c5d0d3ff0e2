//! Policy configuration parsing and fingerprinting.
//!
//! A policy configuration names the exact thresholds, simulation
//! settings and journal-trust snapshot a corpus was evaluated under.
//! Its fingerprint is a sha256 digest over the canonically serialized
//! sections, matching the computation in the upstream engine:
//! sorted-key compact JSON per section, joined with NUL separators,
//! then the snapshot identifier.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::Tier;

lazy_static! {
    static ref FINGERPRINT_PATTERN: Regex =
        Regex::new(r"^sha256:[0-9a-f]{64}$").unwrap();
}

/// Date format used by journal-trust snapshot identifiers.
const SNAPSHOT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors that can occur when loading a policy configuration.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("failed to read policy file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse policy YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("policy validation failed: {0}")]
    ValidationError(String),
}

/// A fixed-length hash identifying one exact policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyFingerprint(String);

impl PolicyFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a string has the `sha256:<64 hex>` shape.
    pub fn is_wellformed(s: &str) -> bool {
        FINGERPRINT_PATTERN.is_match(s)
    }
}

impl fmt::Display for PolicyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered probability cut points for tier assignment, strictly
/// descending. An effect probability at or above a cut point earns at
/// least that tier; below every cut point is the lowest tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub gold: f64,
    pub silver: f64,
    pub bronze: f64,
    pub red: f64,
}

impl TierThresholds {
    /// Tier earned by an effect probability, before any override.
    pub fn tier_for(&self, p: f64) -> Tier {
        if p >= self.gold {
            Tier::Gold
        } else if p >= self.silver {
            Tier::Silver
        } else if p >= self.bronze {
            Tier::Bronze
        } else if p >= self.red {
            Tier::Red
        } else {
            Tier::Black
        }
    }

    fn validate(&self) -> Result<(), PolicyError> {
        let cuts = [self.gold, self.silver, self.bronze, self.red];
        if cuts.iter().any(|c| !(0.0..=1.0).contains(c) || !c.is_finite()) {
            return Err(PolicyError::ValidationError(
                "tier thresholds must lie in [0, 1]".to_string(),
            ));
        }
        if cuts.windows(2).any(|pair| pair[0] <= pair[1]) {
            return Err(PolicyError::ValidationError(
                "tier thresholds must be strictly descending (gold > silver > bronze > red)"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Tier-threshold section of the policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierLevels {
    pub version: String,
    pub thresholds: TierThresholds,
}

/// Simulation section of the policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationPolicy {
    pub version: String,

    #[serde(default)]
    pub n_draws: Option<u64>,

    #[serde(default)]
    pub seed: Option<u64>,
}

/// Journal-trust section of the policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalTrustPolicy {
    /// Snapshot this policy state pins.
    pub snapshot_date: String,

    /// All snapshot dates available to the run. The pinned date is
    /// always treated as available even if the list omits it.
    #[serde(default)]
    pub snapshots: Vec<String>,
}

/// One immutable policy configuration, read once at run start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub tier_levels: TierLevels,
    pub simulation: SimulationPolicy,
    pub journal_trust: JournalTrustPolicy,
}

impl PolicyConfig {
    /// Parse a policy configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, PolicyError> {
        let config: PolicyConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a policy configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    fn validate(&self) -> Result<(), PolicyError> {
        if self.tier_levels.version.is_empty() {
            return Err(PolicyError::ValidationError(
                "tier_levels.version must not be empty".to_string(),
            ));
        }
        if self.simulation.version.is_empty() {
            return Err(PolicyError::ValidationError(
                "simulation.version must not be empty".to_string(),
            ));
        }
        self.tier_levels.thresholds.validate()?;

        for date in std::iter::once(&self.journal_trust.snapshot_date)
            .chain(self.journal_trust.snapshots.iter())
        {
            NaiveDate::parse_from_str(date, SNAPSHOT_DATE_FORMAT).map_err(|_| {
                PolicyError::ValidationError(format!(
                    "journal_trust snapshot '{}' is not a YYYY-MM-DD date",
                    date
                ))
            })?;
        }
        Ok(())
    }

    /// All snapshot dates this policy state makes available.
    pub fn available_snapshots(&self) -> BTreeSet<&str> {
        self.journal_trust
            .snapshots
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.journal_trust.snapshot_date.as_str()))
            .collect()
    }

    /// Compute this configuration's policy fingerprint.
    pub fn fingerprint(&self) -> PolicyFingerprint {
        let mut hasher = Sha256::new();
        for section in [
            canonical_json(&self.tier_levels),
            canonical_json(&self.simulation),
        ] {
            hasher.update(section.as_bytes());
            hasher.update([0]);
        }
        hasher.update(self.journal_trust.snapshot_date.as_bytes());
        PolicyFingerprint(format!("sha256:{:x}", hasher.finalize()))
    }
}

/// Canonical serialization: compact JSON with sorted keys
/// (`serde_json::Value` objects keep keys in sorted order).
fn canonical_json<T: Serialize>(section: &T) -> String {
    serde_json::to_value(section)
        .expect("policy sections serialize to JSON")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_POLICY: &str = r#"
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
    - "2025-07-01"
    - "2025-10-05"
"#;

    #[test]
    fn test_parse_valid_policy() {
        let policy = PolicyConfig::from_yaml(VALID_POLICY).unwrap();
        assert_eq!(policy.tier_levels.version, "1.2.0");
        assert_eq!(policy.simulation.n_draws, Some(10000));
        assert_eq!(policy.available_snapshots().len(), 2);
    }

    #[test]
    fn test_snapshot_date_always_available() {
        let yaml = VALID_POLICY.replace("  snapshots:\n    - \"2025-07-01\"\n    - \"2025-10-05\"\n", "");
        let policy = PolicyConfig::from_yaml(&yaml).unwrap();
        assert!(policy.available_snapshots().contains("2025-10-05"));
    }

    #[test]
    fn test_non_descending_thresholds_rejected() {
        let yaml = VALID_POLICY.replace("silver: 0.60", "silver: 0.90");
        assert!(matches!(
            PolicyConfig::from_yaml(&yaml),
            Err(PolicyError::ValidationError(_))
        ));
    }

    #[test]
    fn test_bad_snapshot_date_rejected() {
        let yaml = VALID_POLICY.replace("2025-10-05", "20251005");
        assert!(matches!(
            PolicyConfig::from_yaml(&yaml),
            Err(PolicyError::ValidationError(_))
        ));
    }

    #[test]
    fn test_tier_for_thresholds() {
        let policy = PolicyConfig::from_yaml(VALID_POLICY).unwrap();
        let t = &policy.tier_levels.thresholds;
        assert_eq!(t.tier_for(0.95), Tier::Gold);
        assert_eq!(t.tier_for(0.80), Tier::Gold);
        assert_eq!(t.tier_for(0.65), Tier::Silver);
        assert_eq!(t.tier_for(0.45), Tier::Bronze);
        assert_eq!(t.tier_for(0.25), Tier::Red);
        assert_eq!(t.tier_for(0.05), Tier::Black);
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = PolicyConfig::from_yaml(VALID_POLICY).unwrap();
        let b = PolicyConfig::from_yaml(VALID_POLICY).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(PolicyFingerprint::is_wellformed(a.fingerprint().as_str()));
    }

    #[test]
    fn test_fingerprint_tracks_every_section() {
        let base = PolicyConfig::from_yaml(VALID_POLICY).unwrap();

        let mut thresholds = base.clone();
        thresholds.tier_levels.thresholds.gold = 0.85;
        assert_ne!(base.fingerprint(), thresholds.fingerprint());

        let mut simulation = base.clone();
        simulation.simulation.version = "1.0.2".to_string();
        assert_ne!(base.fingerprint(), simulation.fingerprint());

        let mut snapshot = base.clone();
        snapshot.journal_trust.snapshot_date = "2025-07-01".to_string();
        assert_ne!(base.fingerprint(), snapshot.fingerprint());
    }

    #[test]
    fn test_fingerprint_wellformedness() {
        assert!(PolicyFingerprint::is_wellformed(&format!(
            "sha256:{}",
            "ab".repeat(32)
        )));
        assert!(!PolicyFingerprint::is_wellformed("sha256:xyz"));
        assert!(!PolicyFingerprint::is_wellformed("md5:abcd"));
    }
}

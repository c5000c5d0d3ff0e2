//! Core domain types shared across the pipeline.
//!
//! Tiers, gates and labels are *read* from upstream documents, never
//! computed here: the pipeline validates and summarizes decisions an
//! external evaluation protocol has already made.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Prefix carried by the `@id` field of every primary entry document.
pub const ENTRY_ID_PREFIX: &str = "assay:entry:";

/// Sentinel value of the journal-trust gate meaning "source is untrusted".
pub const MASK_SENTINEL: &str = "BLACK";

/// One of the five ordered evidence-quality tiers, highest first.
///
/// `Black` is the lowest/unsafe tier; the safety-monotone override and
/// the journal-trust masking rule both force it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Gold,
    Silver,
    Bronze,
    Red,
    Black,
}

impl Tier {
    /// All tiers in the fixed reporting order (highest evidence first).
    pub const ORDERED: [Tier; 5] = [Tier::Gold, Tier::Silver, Tier::Bronze, Tier::Red, Tier::Black];

    /// The label this tier maps to under the published tier-label rules.
    pub fn label(self) -> Label {
        match self {
            Tier::Gold | Tier::Silver => Label::Pass,
            Tier::Bronze | Tier::Red => Label::Amber,
            Tier::Black => Label::Fail,
        }
    }

    /// Whether this is the lowest tier.
    pub fn is_lowest(self) -> bool {
        self == Tier::Black
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Gold => "gold",
            Tier::Silver => "silver",
            Tier::Bronze => "bronze",
            Tier::Red => "red",
            Tier::Black => "black",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gold" => Ok(Tier::Gold),
            "silver" => Ok(Tier::Silver),
            "bronze" => Ok(Tier::Bronze),
            "red" => Ok(Tier::Red),
            "black" => Ok(Tier::Black),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// Coarse pass/amber/fail label derived from the tier by the upstream
/// protocol. Recorded labels are checked against [`Tier::label`] but
/// never rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Pass,
    Amber,
    Fail,
}

impl Label {
    pub fn as_str(self) -> &'static str {
        match self {
            Label::Pass => "PASS",
            Label::Amber => "AMBER",
            Label::Fail => "FAIL",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASS" => Ok(Label::Pass),
            "AMBER" => Ok(Label::Amber),
            "FAIL" => Ok(Label::Fail),
            other => Err(format!("unknown label '{}'", other)),
        }
    }
}

/// Outcome of one of the four boolean gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateOutcome {
    Pass,
    Fail,
}

impl GateOutcome {
    pub fn is_fail(self) -> bool {
        self == GateOutcome::Fail
    }
}

impl FromStr for GateOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASS" => Ok(GateOutcome::Pass),
            "FAIL" => Ok(GateOutcome::Fail),
            other => Err(format!("unknown gate outcome '{}'", other)),
        }
    }
}

/// Outcome of the journal-trust gate: a continuous score in [0, 1] or
/// the masking sentinel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrustOutcome {
    Score(f64),
    Masked,
}

impl TrustOutcome {
    pub fn is_masked(self) -> bool {
        matches!(self, TrustOutcome::Masked)
    }

    pub fn score(self) -> Option<f64> {
        match self {
            TrustOutcome::Score(v) => Some(v),
            TrustOutcome::Masked => None,
        }
    }

    /// Parse from the raw JSON value found under `gate_results.j`.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n
                .as_f64()
                .filter(|v| (0.0..=1.0).contains(v))
                .map(TrustOutcome::Score),
            serde_json::Value::String(s) if s == MASK_SENTINEL => Some(TrustOutcome::Masked),
            _ => None,
        }
    }
}

impl Serialize for TrustOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TrustOutcome::Score(v) => serializer.serialize_f64(*v),
            TrustOutcome::Masked => serializer.serialize_str(MASK_SENTINEL),
        }
    }
}

impl<'de> Deserialize<'de> for TrustOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        TrustOutcome::from_value(&value).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "expected a score in [0, 1] or \"{}\", got {}",
                MASK_SENTINEL, value
            ))
        })
    }
}

/// The five independent gates, in reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Plausibility,
    Robustness,
    JournalTrust,
    Safety,
    Legality,
}

impl Gate {
    pub const ALL: [Gate; 5] = [
        Gate::Plausibility,
        Gate::Robustness,
        Gate::JournalTrust,
        Gate::Safety,
        Gate::Legality,
    ];

    /// Short key used in documents and serialized metrics.
    pub fn key(self) -> &'static str {
        match self {
            Gate::Plausibility => "phi",
            Gate::Robustness => "r",
            Gate::JournalTrust => "j",
            Gate::Safety => "k",
            Gate::Legality => "l",
        }
    }
}

/// Per-gate outcomes for one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResults {
    /// Natural-plausibility gate (`phi`). FAIL forces the lowest tier.
    pub plausibility: GateOutcome,

    /// Robustness gate (`r`).
    pub robustness: GateOutcome,

    /// Journal-trust gate (`j`): score or masking sentinel.
    pub journal_trust: TrustOutcome,

    /// Safety gate (`k`). FAIL forces the lowest tier.
    pub safety: GateOutcome,

    /// Legality gate (`l`).
    pub legality: GateOutcome,
}

impl GateResults {
    /// Whether a monotone-override gate failed.
    pub fn forces_lowest_tier(&self) -> bool {
        self.plausibility.is_fail() || self.safety.is_fail()
    }
}

/// Version identifiers and snapshot date an entry was evaluated under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRefs {
    pub tier_levels_version: String,
    pub simulation_version: String,
    pub journal_snapshot: String,
}

/// Simulation-derived statistics for one entry. The whole block is
/// absent when the simulation document was missing or malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationBlock {
    pub seed: Option<u64>,
    pub n_draws: Option<u64>,
    pub p_effect_gt_delta: Option<f64>,
    pub mu_hat: Option<f64>,
    pub mu_ci95: Option<(f64, f64)>,
    pub i2: Option<f64>,
    pub tau2: Option<f64>,
}

/// Citation summary for one entry. Absent when the citations document
/// was missing or malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationsBlock {
    pub n_studies: usize,
    pub dois: Vec<String>,
    pub years: Vec<i32>,
}

/// One fully parsed, schema-valid evidence entry.
///
/// Optional blocks are presence-tagged so downstream statistics can
/// distinguish "no score available" from a zero score.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRecord {
    pub id: String,
    pub entry_path: String,
    pub schema_version: String,
    pub tier: Tier,
    pub label: Label,
    pub gates: GateResults,
    pub policy_fingerprint: String,
    pub policy_refs: PolicyRefs,
    pub intervention_type: Option<String>,
    pub simulation: Option<SimulationBlock>,
    pub citations: Option<CitationsBlock>,
}

impl EntryRecord {
    /// The effect probability, when the simulation block carries one.
    pub fn effect_probability(&self) -> Option<f64> {
        self.simulation.as_ref().and_then(|s| s.p_effect_gt_delta)
    }
}

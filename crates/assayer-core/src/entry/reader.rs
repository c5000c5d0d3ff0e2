//! Entry document reading.
//!
//! Contract: given an entry's directory, produce either a populated
//! record or a structured parse failure, never a panic. A malformed
//! or missing secondary document degrades the record to a partial
//! state; a malformed primary document makes the entry unusable.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{
    CitationsBlock, EntryRecord, GateOutcome, GateResults, Label, PolicyRefs, SimulationBlock,
    Tier, TrustOutcome, ENTRY_ID_PREFIX,
};

/// Primary claim document. Its presence marks an entry directory.
pub const PRIMARY_DOC: &str = "entry.jsonld";

/// Secondary simulation/statistics document.
pub const SIMULATION_DOC: &str = "simulation.json";

/// Secondary citations document.
pub const CITATIONS_DOC: &str = "citations.json";

/// A primary document could not be turned into a usable record.
///
/// The entry is excluded from the index and tallied; the run goes on.
#[derive(Error, Debug)]
#[error("{}: {detail}", entry_dir.display())]
pub struct ParseFailure {
    pub entry_dir: PathBuf,
    pub detail: String,
}

/// One entry's documents, parsed but not yet schema-validated.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub entry_dir: PathBuf,
    /// Path relative to the corpus root, kept as an index column.
    pub entry_path: String,
    pub id: String,
    /// Declared schema version of the primary document; empty when the
    /// document does not declare one (the registry rejects that).
    pub schema_version: String,
    pub entry_doc: Value,
    pub simulation_doc: Option<Value>,
    pub citations_doc: Option<Value>,
}

/// Read one entry's documents.
///
/// The primary document is required and must carry a usable `@id`;
/// secondary documents are optional and dropped (with a log line) when
/// missing or malformed.
pub fn read_entry(entry_dir: &Path, corpus_root: &Path) -> Result<RawEntry, ParseFailure> {
    let failure = |detail: String| ParseFailure {
        entry_dir: entry_dir.to_path_buf(),
        detail,
    };

    let primary_path = entry_dir.join(PRIMARY_DOC);
    let raw = fs::read_to_string(&primary_path)
        .map_err(|e| failure(format!("failed to read {}: {}", PRIMARY_DOC, e)))?;
    let entry_doc: Value = serde_json::from_str(&raw)
        .map_err(|e| failure(format!("failed to parse {}: {}", PRIMARY_DOC, e)))?;

    let id = entry_doc
        .get("@id")
        .and_then(Value::as_str)
        .map(|s| s.strip_prefix(ENTRY_ID_PREFIX).unwrap_or(s).to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| failure(format!("{} carries no usable @id", PRIMARY_DOC)))?;

    let schema_version = entry_doc
        .get("schema_version")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let entry_path = entry_dir
        .strip_prefix(corpus_root)
        .unwrap_or(entry_dir)
        .display()
        .to_string();

    Ok(RawEntry {
        entry_dir: entry_dir.to_path_buf(),
        entry_path,
        id,
        schema_version,
        entry_doc,
        simulation_doc: load_secondary(entry_dir, SIMULATION_DOC),
        citations_doc: load_secondary(entry_dir, CITATIONS_DOC),
    })
}

/// Load an optional secondary document, degrading to `None` on any
/// failure so the entry itself survives.
fn load_secondary(entry_dir: &Path, name: &str) -> Option<Value> {
    let path = entry_dir.join(name);
    if !path.exists() {
        debug!(entry_dir = %entry_dir.display(), doc = name, "secondary document absent");
        return None;
    }

    let parsed = fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()));

    match parsed {
        Ok(doc) => Some(doc),
        Err(detail) => {
            warn!(
                entry_dir = %entry_dir.display(),
                doc = name,
                %detail,
                "dropping malformed secondary document"
            );
            None
        }
    }
}

impl RawEntry {
    /// Convert schema-validated documents into a typed record.
    ///
    /// Blocking schema violations are caught before this point, so a
    /// conversion failure here still reports as a parse failure rather
    /// than panicking.
    pub fn into_record(self) -> Result<EntryRecord, ParseFailure> {
        let entry_dir = self.entry_dir.clone();
        let failure = |detail: String| ParseFailure {
            entry_dir: entry_dir.clone(),
            detail,
        };

        let doc = &self.entry_doc;

        let tier: Tier = required_str(doc, "/tier")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| failure("missing or invalid tier".to_string()))?;
        let label: Label = required_str(doc, "/label")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| failure("missing or invalid label".to_string()))?;

        let gates = GateResults {
            plausibility: gate_outcome(doc, "phi").ok_or_else(|| failure("missing or invalid gate phi".to_string()))?,
            robustness: gate_outcome(doc, "r").ok_or_else(|| failure("missing or invalid gate r".to_string()))?,
            journal_trust: doc
                .pointer("/gate_results/j")
                .and_then(TrustOutcome::from_value)
                .ok_or_else(|| failure("missing or invalid gate j".to_string()))?,
            safety: gate_outcome(doc, "k").ok_or_else(|| failure("missing or invalid gate k".to_string()))?,
            legality: gate_outcome(doc, "l").ok_or_else(|| failure("missing or invalid gate l".to_string()))?,
        };

        let policy_fingerprint = required_str(doc, "/policy_fingerprint")
            .ok_or_else(|| failure("missing policy_fingerprint".to_string()))?
            .to_string();

        let policy_refs = PolicyRefs {
            tier_levels_version: required_str(doc, "/policy_refs/tier_levels/version")
                .unwrap_or_default()
                .to_string(),
            simulation_version: required_str(doc, "/policy_refs/simulation/version")
                .unwrap_or_default()
                .to_string(),
            journal_snapshot: required_str(doc, "/policy_refs/journal_trust/snapshot_date")
                .unwrap_or_default()
                .to_string(),
        };

        let intervention_type = doc
            .get("intervention_type")
            .and_then(Value::as_str)
            .map(String::from);

        Ok(EntryRecord {
            id: self.id,
            entry_path: self.entry_path,
            schema_version: self.schema_version,
            tier,
            label,
            gates,
            policy_fingerprint,
            policy_refs,
            intervention_type,
            simulation: self.simulation_doc.as_ref().map(simulation_block),
            citations: self.citations_doc.as_ref().map(citations_block),
        })
    }
}

fn required_str<'a>(doc: &'a Value, pointer: &str) -> Option<&'a str> {
    doc.pointer(pointer).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn gate_outcome(doc: &Value, gate: &str) -> Option<GateOutcome> {
    doc.pointer(&format!("/gate_results/{}", gate))
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

fn simulation_block(doc: &Value) -> SimulationBlock {
    SimulationBlock {
        seed: doc.get("seed").and_then(Value::as_u64),
        n_draws: doc.get("n_draws").and_then(Value::as_u64),
        p_effect_gt_delta: doc.get("p_effect_gt_delta").and_then(Value::as_f64),
        mu_hat: doc.get("mu_hat").and_then(Value::as_f64),
        mu_ci95: doc
            .get("mu_ci95")
            .and_then(Value::as_array)
            .and_then(|bounds| match bounds.as_slice() {
                [lo, hi] => Some((lo.as_f64()?, hi.as_f64()?)),
                _ => None,
            }),
        i2: doc.get("i2").and_then(Value::as_f64),
        tau2: doc.get("tau2").and_then(Value::as_f64),
    }
}

fn citations_block(doc: &Value) -> CitationsBlock {
    let studies = doc
        .get("studies")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    CitationsBlock {
        n_studies: studies.len(),
        dois: studies
            .iter()
            .filter_map(|s| s.get("doi").and_then(Value::as_str))
            .filter(|doi| !doi.is_empty())
            .map(String::from)
            .collect(),
        years: studies
            .iter()
            .filter_map(|s| s.get("year").and_then(Value::as_i64))
            .map(|y| y as i32)
            .collect(),
    }
}

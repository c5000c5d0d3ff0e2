//! Versioned document schema validation.
//!
//! Descriptors live one per document kind/version in a schema
//! directory (`<kind>.<version>.schema.json`) so that older and newer
//! entries can coexist in one run, each validated against its own
//! declared version. A missing or unknown declared version is a
//! blocking violation, never a silent skip.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from schema registry loading. All of these are fatal to the
/// run: without descriptors no meaningful validation can happen.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("failed to read schema directory {dir}: {source}")]
    DirUnreadable {
        dir: String,
        source: std::io::Error,
    },

    #[error("failed to read schema descriptor {file}: {detail}")]
    DescriptorUnreadable { file: String, detail: String },

    #[error("invalid schema descriptor {file}: {detail}")]
    InvalidDescriptor { file: String, detail: String },

    #[error("schema directory {0} contains no descriptors")]
    Empty(String),
}

/// The three document kinds an entry can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocKind {
    Entry,
    Simulation,
    Citations,
}

impl DocKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "entry" => Some(DocKind::Entry),
            "simulation" => Some(DocKind::Simulation),
            "citations" => Some(DocKind::Citations),
            _ => None,
        }
    }
}

impl fmt::Display for DocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocKind::Entry => "entry",
            DocKind::Simulation => "simulation",
            DocKind::Citations => "citations",
        })
    }
}

/// Whether a violation excludes the entry or is merely recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Wrong type, missing required field, enum value outside the
    /// declared set, unknown declared version. Excludes the entry.
    Blocking,
    /// Unknown extra field or deprecated field. Entry is retained.
    Advisory,
}

/// One schema violation: which field, what was wrong, how severe.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Violation {
    /// Machine-readable path to the offending field ("" = document root).
    pub path: String,
    pub detail: String,
    pub severity: Severity,
}

impl Violation {
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Blocking => "blocking",
            Severity::Advisory => "advisory",
        };
        write!(f, "{} violation at '{}': {}", severity, self.path, self.detail)
    }
}

/// A compiled shape contract for one document kind/version.
pub struct SchemaDescriptor {
    pub kind: DocKind,
    pub version: String,
    validator: jsonschema::Validator,
    /// Fields tolerated but flagged as advisory when present.
    deprecated: Vec<String>,
}

impl SchemaDescriptor {
    /// Validate a document, returning all violations found.
    pub fn validate(&self, doc: &Value) -> Vec<Violation> {
        let mut violations: Vec<Violation> = self
            .validator
            .iter_errors(doc)
            .map(|error| {
                // Unknown extras (additionalProperties) are tolerated;
                // every other schema failure is blocking.
                let severity = if error.schema_path.to_string().contains("additionalProperties") {
                    Severity::Advisory
                } else {
                    Severity::Blocking
                };
                Violation {
                    path: error.instance_path.to_string(),
                    detail: error.to_string(),
                    severity,
                }
            })
            .collect();

        if let Some(object) = doc.as_object() {
            for field in &self.deprecated {
                if object.contains_key(field) {
                    violations.push(Violation {
                        path: format!("/{}", field),
                        detail: format!(
                            "field '{}' is deprecated in {} schema {}",
                            field, self.kind, self.version
                        ),
                        severity: Severity::Advisory,
                    });
                }
            }
        }

        violations
    }
}

/// All loaded descriptors, keyed by document kind and version.
pub struct SchemaRegistry {
    descriptors: HashMap<(DocKind, String), SchemaDescriptor>,
}

impl SchemaRegistry {
    /// Load every descriptor from a schema directory.
    ///
    /// Descriptor files are named `<kind>.<version>.schema.json`; other
    /// files are ignored. An unreadable directory, an unparsable
    /// descriptor, or an empty directory is fatal.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|source| SchemaError::DirUnreadable {
            dir: dir.display().to_string(),
            source,
        })?;

        let mut descriptors = HashMap::new();
        for entry in entries {
            let entry = entry.map_err(|source| SchemaError::DirUnreadable {
                dir: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((kind, version)) = parse_descriptor_name(name) else {
                debug!(file = name, "skipping non-descriptor file");
                continue;
            };

            let raw = fs::read_to_string(&path).map_err(|e| SchemaError::DescriptorUnreadable {
                file: name.to_string(),
                detail: e.to_string(),
            })?;
            let schema_value: Value =
                serde_json::from_str(&raw).map_err(|e| SchemaError::InvalidDescriptor {
                    file: name.to_string(),
                    detail: e.to_string(),
                })?;

            let deprecated = schema_value
                .get("x-deprecated")
                .and_then(Value::as_array)
                .map(|fields| {
                    fields
                        .iter()
                        .filter_map(|f| f.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();

            let validator = jsonschema::options().build(&schema_value).map_err(|e| {
                SchemaError::InvalidDescriptor {
                    file: name.to_string(),
                    detail: e.to_string(),
                }
            })?;

            descriptors.insert(
                (kind, version.clone()),
                SchemaDescriptor {
                    kind,
                    version,
                    validator,
                    deprecated,
                },
            );
        }

        if descriptors.is_empty() {
            return Err(SchemaError::Empty(dir.display().to_string()));
        }
        info!(count = descriptors.len(), dir = %dir.display(), "loaded schema descriptors");
        Ok(Self { descriptors })
    }

    /// Validate a document against the descriptor for its declared
    /// version. An unknown version yields a single blocking violation.
    pub fn validate(&self, kind: DocKind, version: &str, doc: &Value) -> Vec<Violation> {
        match self.descriptors.get(&(kind, version.to_string())) {
            Some(descriptor) => descriptor.validate(doc),
            None => vec![Violation {
                path: "/schema_version".to_string(),
                detail: if version.is_empty() {
                    format!("document declares no schema version for kind '{}'", kind)
                } else {
                    format!("no '{}' descriptor for declared version '{}'", kind, version)
                },
                severity: Severity::Blocking,
            }],
        }
    }

    pub fn has(&self, kind: DocKind, version: &str) -> bool {
        self.descriptors.contains_key(&(kind, version.to_string()))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

fn parse_descriptor_name(name: &str) -> Option<(DocKind, String)> {
    let stem = name.strip_suffix(".schema.json")?;
    let (kind, version) = stem.split_once('.')?;
    let kind = DocKind::from_name(kind)?;
    if version.is_empty() {
        return None;
    }
    Some((kind, version.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    const ENTRY_V1: &str = include_str!("../../../../schemas/entry.v1.schema.json");
    const ENTRY_V2: &str = include_str!("../../../../schemas/entry.v2.schema.json");
    const SIMULATION_V1: &str = include_str!("../../../../schemas/simulation.v1.schema.json");
    const CITATIONS_V1: &str = include_str!("../../../../schemas/citations.v1.schema.json");

    fn schema_dir() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("schemas");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("entry.v1.schema.json"), ENTRY_V1).unwrap();
        fs::write(dir.join("entry.v2.schema.json"), ENTRY_V2).unwrap();
        fs::write(dir.join("simulation.v1.schema.json"), SIMULATION_V1).unwrap();
        fs::write(dir.join("citations.v1.schema.json"), CITATIONS_V1).unwrap();
        fs::write(dir.join("README.md"), "not a descriptor").unwrap();
        (tmp, dir)
    }

    fn valid_entry(version: &str) -> Value {
        json!({
            "@id": "assay:entry:magnesium-sleep",
            "schema_version": version,
            "tier": "bronze",
            "label": "AMBER",
            "gate_results": {
                "phi": "PASS",
                "r": "FAIL",
                "j": 0.41,
                "k": "PASS",
                "l": "PASS"
            },
            "policy_fingerprint": format!("sha256:{}", "0f".repeat(32)),
            "policy_refs": {
                "tier_levels": { "version": "1.2.0" },
                "simulation": { "version": "1.0.1" },
                "journal_trust": { "snapshot_date": "2025-10-05" }
            }
        })
    }

    #[test]
    fn test_load_dir_skips_non_descriptors() {
        let (_tmp, dir) = schema_dir();
        let registry = SchemaRegistry::load_dir(&dir).unwrap();
        assert_eq!(registry.len(), 4);
        assert!(registry.has(DocKind::Entry, "v1"));
        assert!(registry.has(DocKind::Entry, "v2"));
        assert!(!registry.has(DocKind::Simulation, "v2"));
    }

    #[test]
    fn test_missing_dir_is_fatal() {
        assert!(matches!(
            SchemaRegistry::load_dir("/nonexistent/schemas"),
            Err(SchemaError::DirUnreadable { .. })
        ));
    }

    #[test]
    fn test_empty_dir_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            SchemaRegistry::load_dir(tmp.path()),
            Err(SchemaError::Empty(_))
        ));
    }

    #[test]
    fn test_malformed_descriptor_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("entry.v1.schema.json"), "{oops").unwrap();
        assert!(matches!(
            SchemaRegistry::load_dir(tmp.path()),
            Err(SchemaError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_valid_document_has_no_violations() {
        let (_tmp, dir) = schema_dir();
        let registry = SchemaRegistry::load_dir(&dir).unwrap();
        let violations = registry.validate(DocKind::Entry, "v1", &valid_entry("v1"));
        assert!(violations.is_empty(), "{:?}", violations);
    }

    #[test]
    fn test_missing_required_field_blocks() {
        let (_tmp, dir) = schema_dir();
        let registry = SchemaRegistry::load_dir(&dir).unwrap();
        let mut doc = valid_entry("v1");
        doc.as_object_mut().unwrap().remove("tier");

        let violations = registry.validate(DocKind::Entry, "v1", &doc);
        assert!(violations.iter().any(Violation::is_blocking));
    }

    #[test]
    fn test_enum_outside_declared_set_blocks() {
        let (_tmp, dir) = schema_dir();
        let registry = SchemaRegistry::load_dir(&dir).unwrap();
        let mut doc = valid_entry("v1");
        doc["tier"] = json!("platinum");

        let violations = registry.validate(DocKind::Entry, "v1", &doc);
        assert!(violations.iter().any(Violation::is_blocking));
    }

    #[test]
    fn test_unknown_extra_field_is_advisory() {
        let (_tmp, dir) = schema_dir();
        let registry = SchemaRegistry::load_dir(&dir).unwrap();
        let mut doc = valid_entry("v1");
        doc["vendor_extension"] = json!("x");

        let violations = registry.validate(DocKind::Entry, "v1", &doc);
        assert!(!violations.is_empty());
        assert!(violations.iter().all(|v| !v.is_blocking()));
    }

    #[test]
    fn test_unknown_version_blocks() {
        let (_tmp, dir) = schema_dir();
        let registry = SchemaRegistry::load_dir(&dir).unwrap();
        let violations = registry.validate(DocKind::Entry, "v9", &valid_entry("v9"));
        assert_eq!(violations.len(), 1);
        assert!(violations[0].is_blocking());
        assert_eq!(violations[0].path, "/schema_version");
    }

    #[test]
    fn test_missing_version_blocks() {
        let (_tmp, dir) = schema_dir();
        let registry = SchemaRegistry::load_dir(&dir).unwrap();
        let violations = registry.validate(DocKind::Entry, "", &valid_entry(""));
        assert_eq!(violations.len(), 1);
        assert!(violations[0].is_blocking());
    }

    #[test]
    fn test_versions_validate_independently() {
        let (_tmp, dir) = schema_dir();
        let registry = SchemaRegistry::load_dir(&dir).unwrap();

        // v2 adds intervention_type; a correct v2 document must not
        // produce blocking violations against its own descriptor.
        let mut v2 = valid_entry("v2");
        v2["intervention_type"] = json!("supplement");
        let violations = registry.validate(DocKind::Entry, "v2", &v2);
        assert!(violations.iter().all(|v| !v.is_blocking()), "{:?}", violations);

        let violations = registry.validate(DocKind::Entry, "v1", &valid_entry("v1"));
        assert!(violations.is_empty());
    }

    #[test]
    fn test_deprecated_field_is_advisory_in_v2() {
        let (_tmp, dir) = schema_dir();
        let registry = SchemaRegistry::load_dir(&dir).unwrap();
        let mut doc = valid_entry("v2");
        doc["summary"] = json!("free-text summary");

        let violations = registry.validate(DocKind::Entry, "v2", &doc);
        assert!(violations.iter().any(|v| v.severity == Severity::Advisory
            && v.detail.contains("deprecated")));
        assert!(violations.iter().all(|v| !v.is_blocking()));
    }

    #[test]
    fn test_simulation_probability_out_of_range_blocks() {
        let (_tmp, dir) = schema_dir();
        let registry = SchemaRegistry::load_dir(&dir).unwrap();
        let doc = json!({ "p_effect_gt_delta": 1.7 });

        let violations = registry.validate(DocKind::Simulation, "v1", &doc);
        assert!(violations.iter().any(Violation::is_blocking));
    }
}

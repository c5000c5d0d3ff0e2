//! Per-entry document parsing and schema validation.
//!
//! Each entry directory exposes up to three documents at fixed names:
//! a primary claim document, a simulation document and a citations
//! document. The reader isolates per-document failures; the schema
//! registry validates parsed documents against versioned descriptors.

mod reader;
mod schema;

pub use reader::{read_entry, ParseFailure, RawEntry, CITATIONS_DOC, PRIMARY_DOC, SIMULATION_DOC};
pub use schema::{DocKind, SchemaDescriptor, SchemaError, SchemaRegistry, Severity, Violation};

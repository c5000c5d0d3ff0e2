//! Policy configuration and provenance anchoring.
//!
//! The policy configuration is read once at run start, treated as
//! immutable for the duration of a run, and passed explicitly into
//! every component that needs it.

mod anchors;
mod config;

pub use anchors::{AnchorChecker, AnchorReport, FingerprintGroup};
pub use config::{
    JournalTrustPolicy, PolicyConfig, PolicyError, PolicyFingerprint, SimulationPolicy,
    TierLevels, TierThresholds,
};

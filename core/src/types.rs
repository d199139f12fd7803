//! Shared primitive types used across the entire simulation.

/// Absolute sub-step counter, counted from the start of the simulation.
/// One step = one week or one month depending on the configured granularity.
pub type StepIndex = usize;

/// A calendar year (chrono convention, may be negative in principle).
pub type Year = i32;

/// The canonical run identifier.
pub type RunId = String;

/// Generate a fresh run identifier with a human-readable prefix.
pub fn generate_run_id(prefix: &str) -> RunId {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

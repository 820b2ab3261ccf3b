//! Audio delay correlation and drift diagnosis engine.
//!
//! Measures how far secondary sources are offset from a reference source,
//! classifies whether that offset is constant, drifting, or stepping, and
//! normalizes a job's delays with a global shift so none is negative.

pub mod analysis;
pub mod config;
pub mod logging;
pub mod models;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

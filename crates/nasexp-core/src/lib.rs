//! nasexp-core: shared library for the nasexp NAS exporter.
//!
//! Provides:
//! - `collector`: probes, discovery caches and the metric collection engine
//! - `metrics`: metric samples and the text exposition writer
//! - `status`: observable metadata about the last collection cycle
//! - `annotations`: start/end notification correlation and dashboard annotations

pub mod annotations;
pub mod collector;
pub mod metrics;
pub mod status;

/// Crate version, embedded in the build info metric and the daemon's `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

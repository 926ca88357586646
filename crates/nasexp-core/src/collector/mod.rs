//! Metric collection for NAS hosts.
//!
//! Probes read kernel counters, run vendor tools and talk to the UPS daemon.
//! The engine runs all of them in parallel once per scrape and renders the
//! results as text exposition.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       MetricsEngine                          │
//! │  ┌──────────────────────┐   ┌─────────────────────────────┐  │
//! │  │  EnvironmentCache    │   │  Probes (one thread each)   │  │
//! │  │  - hostname, tools   │──▶│  - /proc, /sys/class/net    │  │
//! │  │  - devices, ifaces   │   │  - getsysinfo, hal_app      │  │
//! │  │  - enclosures        │   │  - dmsetup, nvme            │  │
//! │  │  - dm-cache targets  │   │  - upsd, ping               │  │
//! │  └──────────┬───────────┘   └──────────────┬──────────────┘  │
//! │             └──────────────┬───────────────┘                 │
//! │                            │                                 │
//! │              ┌─────────────▼─────────────┐                   │
//! │              │ FileSystem / CommandRunner│ (traits)          │
//! │              └─────────────┬─────────────┘                   │
//! └────────────────────────────┼─────────────────────────────────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!              │               │               │
//!       ┌──────▼──────┐ ┌──────▼──────┐ ┌──────▼──────┐
//!       │ RealFs /    │ │ MockFs /    │ │  Scenarios  │
//!       │ RealCommands│ │ MockCommands│ │ (Fixtures)  │
//!       └─────────────┘ └─────────────┘ └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use nasexp_core::collector::{Exporter, ExporterConfig, MetricsEngine};
//! use nasexp_core::collector::mock::{MockCommands, MockFs};
//!
//! let config = ExporterConfig::default().with_ups_address(None);
//! let engine = MetricsEngine::new(MockFs::typical_nas(), MockCommands::typical_nas(), &config);
//!
//! let mut out = Vec::new();
//! let failure = engine.write_metrics(&mut out).unwrap();
//! assert!(failure.is_none());
//! assert!(String::from_utf8(out).unwrap().contains("node_load1{node=\"nas01\"}"));
//! ```

pub mod cache;
pub mod engine;
pub mod environment;
pub mod mock;
pub mod nvme;
pub mod ping;
pub mod probe;
pub mod procfs;
pub mod sysinfo;
pub mod system;
pub mod traits;
pub mod ups;
pub mod volume;

pub use engine::{Exporter, ExporterConfig, MetricsEngine, default_probes};
pub use environment::{EnvironmentCache, EnvironmentSnapshot};
pub use probe::{CollectError, Probe, ProbeContext, ProbeFailure};
pub use traits::{CommandRunner, ExecError, FileSystem, RealCommands, RealFs};
pub use ups::UpsStatusMap;

//! The metric collection engine: one fan-out cycle per scrape.
//!
//! A cycle refreshes the environment snapshot when its TTL has run out, runs
//! every registered probe on its own scoped thread and drains their results
//! through a channel on the calling thread, which is the only writer to the
//! sink. Cycles are serialized by a mutex around the engine state.

use std::io::{self, Write};
use std::sync::mpsc;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::collector::cache::{DmCacheProbe, FlashcacheProbe};
use crate::collector::environment::{DEFAULT_ENVIRONMENT_TTL, EnvironmentCache};
use crate::collector::nvme::NvmeProbe;
use crate::collector::ping::PingProbe;
use crate::collector::probe::{CollectError, Probe, ProbeContext, ProbeFailure};
use crate::collector::sysinfo::{EnclosureFanProbe, HdTempProbe, SysFanProbe, SysTempProbe};
use crate::collector::system::{
    BuildInfoProbe, CpuProbe, DiskProbe, LoadProbe, MemoryProbe, NetworkProbe, UptimeProbe,
};
use crate::collector::traits::{CommandRunner, FileSystem};
use crate::collector::ups::{DEFAULT_NUT_ADDRESS, UpsProbe, UpsStatusMap};
use crate::collector::volume::{DEFAULT_VOLUME_TTL, VolumeProbe};
use crate::metrics::{MetricSample, write_failure, write_samples};
use crate::status::{ExporterStatus, now_millis};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Host pinged for the external round-trip metric. `None` disables it.
    pub ping_target: Option<String>,
    pub environment_ttl: Duration,
    pub volume_ttl: Duration,
    /// upsd address. `None` disables the UPS probe.
    pub ups_address: Option<String>,
    /// Overrides the discovered hostname in the `node` label.
    pub hostname: Option<String>,
    pub ups_status_map: UpsStatusMap,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            ping_target: None,
            environment_ttl: DEFAULT_ENVIRONMENT_TTL,
            volume_ttl: DEFAULT_VOLUME_TTL,
            ups_address: Some(DEFAULT_NUT_ADDRESS.to_string()),
            hostname: None,
            ups_status_map: UpsStatusMap::default(),
        }
    }
}

impl ExporterConfig {
    pub fn with_ping_target(mut self, target: impl Into<String>) -> Self {
        self.ping_target = Some(target.into());
        self
    }

    pub fn with_environment_ttl(mut self, ttl: Duration) -> Self {
        self.environment_ttl = ttl;
        self
    }

    pub fn with_volume_ttl(mut self, ttl: Duration) -> Self {
        self.volume_ttl = ttl;
        self
    }

    pub fn with_ups_address(mut self, address: Option<String>) -> Self {
        self.ups_address = address;
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Maps an additional `ups.status` string to a value.
    pub fn with_ups_status(mut self, status: impl Into<String>, value: f64) -> Self {
        self.ups_status_map = self.ups_status_map.with_status(status, value);
        self
    }
}

/// What the HTTP layer needs from a metrics source.
pub trait Exporter: Send + Sync {
    /// Runs one collection cycle and writes the exposition text to `sink`.
    ///
    /// Probe failures are written inline; the last one is returned. An error
    /// from the sink aborts the cycle.
    fn write_metrics(&self, sink: &mut dyn Write) -> io::Result<Option<ProbeFailure>>;

    /// Releases held connections. Idempotent.
    fn close(&self);

    fn status(&self) -> ExporterStatus;
}

/// The standard probe set, in registry order.
pub fn default_probes(config: &ExporterConfig) -> Vec<Box<dyn Probe>> {
    vec![
        Box::new(UptimeProbe),
        Box::new(LoadProbe),
        Box::new(MemoryProbe),
        Box::new(CpuProbe),
        Box::new(
            UpsProbe::new(config.ups_address.as_deref())
                .with_status_map(config.ups_status_map.clone()),
        ),
        Box::new(SysTempProbe),
        Box::new(HdTempProbe::new()),
        Box::new(SysFanProbe),
        Box::new(EnclosureFanProbe),
        Box::new(FlashcacheProbe),
        Box::new(DmCacheProbe),
        Box::new(NetworkProbe),
        Box::new(DiskProbe),
        Box::new(NvmeProbe),
        Box::new(VolumeProbe::new(config.volume_ttl)),
        Box::new(PingProbe::new(config.ping_target.clone())),
        Box::new(BuildInfoProbe),
    ]
}

struct EngineState {
    environment: EnvironmentCache,
    probes: Vec<Box<dyn Probe>>,
}

type ProbeResult = (&'static str, Result<Vec<MetricSample>, CollectError>);

/// Runs the probe registry against the host capabilities `F` and `C`.
pub struct MetricsEngine<F: FileSystem, C: CommandRunner> {
    fs: F,
    commands: C,
    hostname_override: Option<String>,
    state: Mutex<EngineState>,
    status: Mutex<ExporterStatus>,
}

impl<F: FileSystem, C: CommandRunner> MetricsEngine<F, C> {
    /// Creates an engine with the standard probe set.
    pub fn new(fs: F, commands: C, config: &ExporterConfig) -> Self {
        Self::with_probes(fs, commands, config, default_probes(config))
    }

    /// Creates an engine with an explicit probe registry.
    pub fn with_probes(
        fs: F,
        commands: C,
        config: &ExporterConfig,
        probes: Vec<Box<dyn Probe>>,
    ) -> Self {
        Self {
            fs,
            commands,
            hostname_override: config.hostname.clone(),
            state: Mutex::new(EngineState {
                environment: EnvironmentCache::new(config.environment_ttl),
                probes,
            }),
            status: Mutex::new(ExporterStatus::new(now_millis())),
        }
    }

    fn collect_cycle(&self, sink: &mut dyn Write) -> io::Result<Option<ProbeFailure>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let EngineState {
            environment,
            probes,
        } = &mut *state;

        let started = Instant::now();
        let fetch_time = now_millis();

        if environment.refresh_if_stale(
            started,
            &self.fs,
            &self.commands,
            self.hostname_override.as_deref(),
        ) {
            let ctx = ProbeContext {
                fs: &self.fs,
                commands: &self.commands,
                env: environment.snapshot(),
            };
            for probe in probes.iter_mut() {
                probe.on_environment_refresh(&ctx);
            }
        }

        let ctx = ProbeContext {
            fs: &self.fs,
            commands: &self.commands,
            env: environment.snapshot(),
        };
        let hostname = ctx.env.hostname.as_str();

        let mut metric_count = 0;
        let mut last_failure = None;
        let (tx, rx) = mpsc::channel::<ProbeResult>();

        thread::scope(|s| -> io::Result<()> {
            for probe in probes.iter_mut() {
                let tx = tx.clone();
                s.spawn(move || {
                    let result = probe.collect(&ctx);
                    // The receiver is gone only when the sink failed.
                    let _ = tx.send((probe.name(), result));
                });
            }
            drop(tx);

            for (probe, result) in rx {
                match result {
                    Ok(samples) => {
                        write_samples(sink, hostname, &samples)?;
                        metric_count += samples.len();
                    }
                    Err(error) => {
                        warn!(probe, error = %error, "probe failed");
                        write_failure(sink, probe, &error)?;
                        last_failure = Some(ProbeFailure { probe, error });
                    }
                }
            }
            Ok(())
        })?;

        let duration = started.elapsed();
        debug!(
            metrics = metric_count,
            duration_ms = duration.as_millis() as u64,
            "collection cycle finished"
        );

        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.last_fetch = Some(fetch_time);
        status.fetch_duration_ms = duration.as_millis() as u64;
        status.metric_count = metric_count;
        let env = environment.snapshot();
        status.devices = env.devices.clone();
        status.interfaces = env.interfaces.clone();
        status.enclosures = env.enclosures.iter().map(|e| e.name.clone()).collect();
        status.dm_caches = env.dm_cache_clients.iter().map(|c| c.name.clone()).collect();
        for probe in probes.iter() {
            probe.describe(&mut status);
        }

        Ok(last_failure)
    }
}

impl<F: FileSystem, C: CommandRunner> Exporter for MetricsEngine<F, C> {
    fn write_metrics(&self, sink: &mut dyn Write) -> io::Result<Option<ProbeFailure>> {
        self.collect_cycle(sink)
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for probe in state.probes.iter_mut() {
            probe.close();
        }
    }

    fn status(&self) -> ExporterStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

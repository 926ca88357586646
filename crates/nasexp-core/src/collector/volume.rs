//! Storage volume sizes reported by `getsysinfo vol_*`.
//!
//! The volume list is rebuilt only when the environment is rediscovered.
//! Free space is resampled on its own, shorter TTL; total size is captured
//! at discovery.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::collector::environment::TOOL_GETSYSINFO;
use crate::collector::probe::{CollectError, Probe, ProbeContext};
use crate::metrics::MetricSample;
use crate::status::ExporterStatus;

/// Default lifetime of a sampled free size.
pub const DEFAULT_VOLUME_TTL: Duration = Duration::from_secs(60);

/// Indices probed past the reported count before giving up on gaps.
const MAX_INDEX_GAP: u32 = 16;

/// Upper bound on the volume count accepted from `sysvolnum`.
const MAX_VOLUMES: u32 = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeRecord {
    pub index: u32,
    pub description: String,
    pub filesystem: String,
    pub status: String,
    pub total_size_bytes: f64,
    /// `None` until first sampled.
    pub free_size_bytes: Option<f64>,
}

/// Extracts the volume name from `vol_desc` output.
///
/// `[Volume DataVol1, Pool 1]` yields `DataVol1`; single-disk volumes yield
/// `None`; anything else is returned as-is.
pub fn parse_vol_desc(desc: &str) -> Option<String> {
    if desc.starts_with("[Single Disk Volume:") {
        return None;
    }
    match desc.strip_prefix("[Volume") {
        Some(rest) => {
            let name = rest
                .trim()
                .split(',')
                .next()
                .unwrap_or_default()
                .trim_end_matches(']')
                .trim();
            (!name.is_empty()).then(|| name.to_string())
        }
        None => Some(desc.to_string()),
    }
}

/// Parses sizes like `1.5 TB` into bytes. Units are powers of 1024.
pub fn parse_vol_size(s: &str) -> Result<f64, CollectError> {
    let mut fields = s.split_whitespace();
    let invalid = || CollectError::Parse(format!("invalid volume size: {:?}", s));

    let size: f64 = fields
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(invalid)?;
    let factor = match fields.next().ok_or_else(invalid)? {
        "TB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "GB" => 1024.0 * 1024.0 * 1024.0,
        "MB" => 1024.0 * 1024.0,
        "KB" => 1024.0,
        "B" => 1.0,
        _ => return Err(invalid()),
    };
    Ok(size * factor)
}

/// Volume probe. Owns the volume list and its free-size TTL.
pub struct VolumeProbe {
    ttl: Duration,
    volumes: Vec<VolumeRecord>,
    last_fetch: Option<Instant>,
}

impl VolumeProbe {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            volumes: Vec::new(),
            last_fetch: None,
        }
    }

    pub fn volumes(&self) -> &[VolumeRecord] {
        &self.volumes
    }

    fn discover(ctx: &ProbeContext<'_>) -> Vec<VolumeRecord> {
        let Some(getsysinfo) = ctx.env.tool_path(TOOL_GETSYSINFO) else {
            return Vec::new();
        };
        let run = |args: &[&str]| ctx.commands.run(getsysinfo, args);

        let count: u32 = match run(&["sysvolnum"]) {
            Ok(out) => out.trim().parse().unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "failed to read volume count");
                0
            }
        };
        if count > MAX_VOLUMES {
            warn!(count, max = MAX_VOLUMES, "volume count out of range, clamping");
        }
        let count = count.min(MAX_VOLUMES);

        let mut volumes = Vec::with_capacity(count as usize);
        let mut found = 0;
        let mut index = 0;
        // Indices can be sparse; a failing vol_desc does not count as found.
        while found < count && index < count.saturating_add(MAX_INDEX_GAP) {
            let idx = index.to_string();
            index += 1;

            let desc = match run(&["vol_desc", &idx]) {
                Ok(desc) => desc,
                Err(e) => {
                    debug!(index = %idx, error = %e, "no volume at index");
                    continue;
                }
            };
            found += 1;
            let Some(description) = parse_vol_desc(&desc) else {
                continue;
            };

            let filesystem = match run(&["vol_fs", &idx]) {
                Ok(fs) if fs == "Unknown" => {
                    debug!(volume = %description, "ignoring volume with unknown filesystem");
                    continue;
                }
                Ok(fs) => fs,
                Err(e) => {
                    warn!(volume = %description, error = %e, "failed to read volume filesystem");
                    continue;
                }
            };
            let total_size_bytes = match run(&["vol_totalsize", &idx])
                .map_err(CollectError::from)
                .and_then(|s| parse_vol_size(&s))
            {
                Ok(size) => size,
                Err(e) => {
                    warn!(volume = %description, error = %e, "failed to read volume size");
                    continue;
                }
            };
            let status = match run(&["vol_status", &idx]) {
                Ok(status) => status,
                Err(e) => {
                    warn!(volume = %description, error = %e, "failed to read volume status");
                    continue;
                }
            };

            volumes.push(VolumeRecord {
                index: index - 1,
                description,
                filesystem,
                status,
                total_size_bytes,
                free_size_bytes: None,
            });
        }
        volumes
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.last_fetch.is_none_or(|last| now >= last + self.ttl)
    }

    /// Collects with an explicit clock, for TTL tests.
    pub fn collect_at(
        &mut self,
        ctx: &ProbeContext<'_>,
        now: Instant,
    ) -> Result<Vec<MetricSample>, CollectError> {
        let Some(getsysinfo) = ctx.env.tool_path(TOOL_GETSYSINFO) else {
            return Ok(Vec::new());
        };

        let expired = self.is_expired(now);
        if expired {
            self.last_fetch = Some(now);
        }

        let mut samples = Vec::with_capacity(self.volumes.len() * 2);
        for volume in &mut self.volumes {
            if expired || volume.free_size_bytes.is_none() {
                let out = ctx
                    .commands
                    .run(getsysinfo, &["vol_freesize", &volume.index.to_string()])?;
                volume.free_size_bytes = Some(parse_vol_size(&out)?);
            }

            let labelled = |name: &str, value: f64| {
                MetricSample::new(name, value)
                    .with_label("volume", volume.description.as_str())
                    .with_label("filesystem", volume.filesystem.as_str())
                    .with_label("status", volume.status.as_str())
            };
            samples.push(labelled(
                "node_volume_avail_bytes",
                volume.free_size_bytes.unwrap_or(f64::NAN),
            ));
            samples.push(labelled("node_volume_size_bytes", volume.total_size_bytes));
        }
        Ok(samples)
    }
}

impl Probe for VolumeProbe {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn on_environment_refresh(&mut self, ctx: &ProbeContext<'_>) {
        let mut volumes = Self::discover(ctx);
        // Keep sampled free sizes so rediscovery does not force a resample.
        for volume in &mut volumes {
            volume.free_size_bytes = self
                .volumes
                .iter()
                .find(|old| old.index == volume.index && old.description == volume.description)
                .and_then(|old| old.free_size_bytes);
        }
        info!(
            volumes = ?volumes.iter().map(|v| v.description.as_str()).collect::<Vec<_>>(),
            "volumes discovered"
        );
        self.volumes = volumes;
    }

    fn collect(&mut self, ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        self.collect_at(ctx, Instant::now())
    }

    fn describe(&self, status: &mut ExporterStatus) {
        status.volumes = self.volumes.iter().map(|v| v.description.clone()).collect();
    }
}

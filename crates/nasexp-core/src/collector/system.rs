//! Probes over kernel-provided host counters: `/proc` and `/sys/class/net`.

use std::path::{Path, PathBuf};

use crate::collector::probe::{CollectError, Probe, ProbeContext};
use crate::collector::procfs::parser::{
    DISKSTATS_SECTOR_SIZE, parse_cpu_stat, parse_diskstats, parse_loadavg, parse_meminfo,
    parse_uptime,
};
use crate::collector::traits::FileSystem;
use crate::metrics::MetricSample;

const PROC_UPTIME: &str = "/proc/uptime";
const PROC_LOADAVG: &str = "/proc/loadavg";
const PROC_MEMINFO: &str = "/proc/meminfo";
const PROC_STAT: &str = "/proc/stat";
const PROC_DISKSTATS: &str = "/proc/diskstats";
const NET_DIR: &str = "/sys/class/net";

/// Kernel clock ticks per second as exposed in `/proc/stat`.
const USER_HZ: f64 = 100.0;

fn read(fs: &dyn FileSystem, path: &str) -> Result<String, CollectError> {
    Ok(fs.read_to_string(Path::new(path))?)
}

pub struct UptimeProbe;

impl Probe for UptimeProbe {
    fn name(&self) -> &'static str {
        "uptime"
    }

    fn collect(&mut self, ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        let uptime = parse_uptime(&read(ctx.fs, PROC_UPTIME)?)?;
        Ok(vec![
            MetricSample::new("node_time_seconds", uptime)
                .with_help("System uptime measured in seconds")
                .counter(),
        ])
    }
}

pub struct LoadProbe;

impl Probe for LoadProbe {
    fn name(&self) -> &'static str {
        "load"
    }

    fn collect(&mut self, ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        let load = parse_loadavg(&read(ctx.fs, PROC_LOADAVG)?)?;
        Ok(vec![
            MetricSample::new("node_load1", load.load1),
            MetricSample::new("node_load5", load.load5),
            MetricSample::new("node_load15", load.load15),
        ])
    }
}

fn sectors_to_bytes(sectors: u64) -> f64 {
    sectors as f64 * DISKSTATS_SECTOR_SIZE as f64
}

pub struct MemoryProbe;

impl Probe for MemoryProbe {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn collect(&mut self, ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        let info = parse_meminfo(&read(ctx.fs, PROC_MEMINFO)?)?;
        let bytes = |kb: u64| kb as f64 * 1024.0;

        let mut samples = vec![
            MetricSample::new("node_memory_MemTotal_bytes", bytes(info.mem_total)),
            MetricSample::new("node_memory_MemFree_bytes", bytes(info.mem_free)),
            MetricSample::new("node_memory_Buffers_bytes", bytes(info.buffers)),
            MetricSample::new("node_memory_Cached_bytes", bytes(info.cached)),
            MetricSample::new("node_memory_Active_bytes", bytes(info.active)),
            MetricSample::new("node_memory_Inactive_bytes", bytes(info.inactive)),
            MetricSample::new("node_memory_SwapTotal_bytes", bytes(info.swap_total)),
            MetricSample::new("node_memory_SwapFree_bytes", bytes(info.swap_free)),
        ];
        if let Some(available) = info.mem_available {
            samples.push(MetricSample::new(
                "node_memory_MemAvailable_bytes",
                bytes(available),
            ));
        }
        Ok(samples)
    }
}

pub struct CpuProbe;

impl Probe for CpuProbe {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn collect(&mut self, ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        let cpus = parse_cpu_stat(&read(ctx.fs, PROC_STAT)?)?;
        let (total, per_cpu) = cpus
            .split_first()
            .ok_or_else(|| CollectError::Parse("no cpu lines in stat".to_string()))?;

        let mut samples: Vec<MetricSample> = total
            .modes()
            .into_iter()
            .map(|(mode, ticks)| {
                MetricSample::new("node_cpu_seconds_total", ticks as f64 / USER_HZ)
                    .with_label("mode", mode)
                    .with_help("Seconds the CPUs spent in each mode")
                    .counter()
            })
            .collect();
        samples.push(MetricSample::new("node_cpu_count", per_cpu.len() as f64));
        Ok(samples)
    }
}

/// Per-interface byte counters for the discovered `eth*` interfaces.
pub struct NetworkProbe;

impl NetworkProbe {
    fn counter(
        fs: &dyn FileSystem,
        iface: &str,
        direction: &str,
    ) -> Result<f64, CollectError> {
        let path = PathBuf::from(NET_DIR)
            .join(iface)
            .join("statistics")
            .join(format!("{}_bytes", direction));
        let content = fs.read_to_string(&path)?;
        content.trim().parse().map_err(|_| {
            CollectError::Parse(format!("invalid counter in {}: {:?}", path.display(), content))
        })
    }
}

impl Probe for NetworkProbe {
    fn name(&self) -> &'static str {
        "network"
    }

    fn collect(&mut self, ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        let mut samples = Vec::with_capacity(ctx.env.interfaces.len() * 2);
        for iface in &ctx.env.interfaces {
            samples.push(
                MetricSample::new(
                    "node_network_receive_bytes_total",
                    Self::counter(ctx.fs, iface, "rx")?,
                )
                .with_label("device", iface.as_str())
                .with_help("Total number of bytes received")
                .counter(),
            );
            samples.push(
                MetricSample::new(
                    "node_network_transmit_bytes_total",
                    Self::counter(ctx.fs, iface, "tx")?,
                )
                .with_label("device", iface.as_str())
                .with_help("Total number of bytes transmitted")
                .counter(),
            );
        }
        Ok(samples)
    }
}

/// Block I/O counters for the discovered whole-disk devices.
pub struct DiskProbe;

impl Probe for DiskProbe {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn collect(&mut self, ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        if ctx.env.devices.is_empty() {
            return Ok(Vec::new());
        }
        let disks = parse_diskstats(&read(ctx.fs, PROC_DISKSTATS)?)?;

        let mut samples = Vec::new();
        for disk in disks
            .iter()
            .filter(|d| ctx.env.devices.contains(&d.device))
        {
            let sample = |name: &str, value: f64, help: &str| {
                MetricSample::new(name, value)
                    .with_label("device", disk.device.as_str())
                    .with_help(help)
                    .counter()
            };
            samples.extend([
                sample(
                    "node_disk_read_bytes_total",
                    sectors_to_bytes(disk.read_sectors),
                    "Total number of bytes read",
                ),
                sample(
                    "node_disk_written_bytes_total",
                    sectors_to_bytes(disk.write_sectors),
                    "Total number of bytes written",
                ),
                sample(
                    "node_disk_read_ops_total",
                    disk.reads as f64,
                    "Total number of read operations",
                ),
                sample(
                    "node_disk_write_ops_total",
                    disk.writes as f64,
                    "Total number of write operations",
                ),
                sample(
                    "node_disk_read_time_msec",
                    disk.read_time as f64,
                    "Milliseconds spent reading",
                ),
                sample(
                    "node_disk_write_time_msec",
                    disk.write_time as f64,
                    "Milliseconds spent writing",
                ),
                sample(
                    "node_disk_iotime_msec",
                    disk.io_time as f64,
                    "Milliseconds spent doing I/Os",
                ),
                MetricSample::new("node_disk_iops_in_progress", disk.io_in_progress as f64)
                    .with_label("device", disk.device.as_str())
                    .with_help("I/Os currently in progress")
                    .gauge(),
            ]);
        }
        Ok(samples)
    }
}

/// Constant `1` carrying the exporter version as a label.
pub struct BuildInfoProbe;

impl Probe for BuildInfoProbe {
    fn name(&self) -> &'static str {
        "build_info"
    }

    fn collect(&mut self, _ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        Ok(vec![
            MetricSample::new("nasexp_build_info", 1.0)
                .with_label("version", crate::VERSION)
                .with_help("Information about the nasexp build")
                .gauge(),
        ])
    }
}

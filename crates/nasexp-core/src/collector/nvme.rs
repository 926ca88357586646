//! NVMe health from `nvme smart-log`.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::collector::environment::TOOL_NVME;
use crate::collector::probe::{CollectError, Probe, ProbeContext};
use crate::metrics::{MetricKind, MetricSample};

static TEMPERATURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^temperature\s*:\s*(\d+)\s*C").expect("valid regex"));
static AVAILABLE_SPARE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^available_spare\s*:\s*(\d+)%").expect("valid regex"));
static SPARE_THRESHOLD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^available_spare_threshold\s*:\s*(\d+)%").expect("valid regex")
});
static PERCENTAGE_USED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^percentage_used\s*:\s*(\d+)%").expect("valid regex"));
static POWER_ON_HOURS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^power_on_hours\s*:\s*([\d,]+)").expect("valid regex"));
static POWER_CYCLES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^power_cycles\s*:\s*([\d,]+)").expect("valid regex"));
static UNSAFE_SHUTDOWNS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^unsafe_shutdowns\s*:\s*([\d,]+)").expect("valid regex"));
static MEDIA_ERRORS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^media_errors\s*:\s*([\d,]+)").expect("valid regex"));

/// Parsed `nvme smart-log` fields. Percentages are stored as ratios.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NvmeSmartLog {
    pub temperature_celsius: Option<f64>,
    pub available_spare: Option<f64>,
    pub available_spare_threshold: Option<f64>,
    pub percentage_used: Option<f64>,
    pub power_on_hours: Option<f64>,
    pub power_cycles: Option<f64>,
    pub unsafe_shutdowns: Option<f64>,
    pub media_errors: Option<f64>,
}

/// First capture of `re` as a number, with thousands separators removed.
fn capture(re: &Regex, output: &str) -> Option<f64> {
    let raw = re.captures(output)?.get(1)?.as_str().replace(',', "");
    raw.parse().ok()
}

fn capture_ratio(re: &Regex, output: &str) -> Option<f64> {
    capture(re, output).map(|v| v / 100.0)
}

pub fn parse_smart_log(output: &str) -> Result<NvmeSmartLog, CollectError> {
    let log = NvmeSmartLog {
        temperature_celsius: capture(&TEMPERATURE_RE, output),
        available_spare: capture_ratio(&AVAILABLE_SPARE_RE, output),
        available_spare_threshold: capture_ratio(&SPARE_THRESHOLD_RE, output),
        percentage_used: capture_ratio(&PERCENTAGE_USED_RE, output),
        power_on_hours: capture(&POWER_ON_HOURS_RE, output),
        power_cycles: capture(&POWER_CYCLES_RE, output),
        unsafe_shutdowns: capture(&UNSAFE_SHUTDOWNS_RE, output),
        media_errors: capture(&MEDIA_ERRORS_RE, output),
    };
    if log == NvmeSmartLog::default() {
        return Err(CollectError::Parse("no SMART fields in nvme output".to_string()));
    }
    Ok(log)
}

impl NvmeSmartLog {
    fn samples(&self, device: &str) -> Vec<MetricSample> {
        use MetricKind::{Counter, Gauge};

        let fields = [
            (
                "node_nvme_temperature_celsius",
                self.temperature_celsius,
                Gauge,
                "Current temperature of the NVMe device in Celsius",
            ),
            (
                "node_nvme_available_spare_ratio",
                self.available_spare,
                Gauge,
                "Normalized percentage of remaining spare capacity available",
            ),
            (
                "node_nvme_available_spare_threshold_ratio",
                self.available_spare_threshold,
                Gauge,
                "Threshold at which spare capacity is considered critically low",
            ),
            (
                "node_nvme_percentage_used_ratio",
                self.percentage_used,
                Gauge,
                "Vendor-specific estimate of the percentage of NVMe subsystem life used",
            ),
            (
                "node_nvme_power_on_hours_total",
                self.power_on_hours,
                Counter,
                "Total number of power-on hours",
            ),
            (
                "node_nvme_power_cycles_total",
                self.power_cycles,
                Counter,
                "Total number of power cycles",
            ),
            (
                "node_nvme_unsafe_shutdowns_total",
                self.unsafe_shutdowns,
                Counter,
                "Total number of unsafe shutdowns",
            ),
            (
                "node_nvme_media_errors_total",
                self.media_errors,
                Counter,
                "Total number of unrecovered data integrity errors",
            ),
        ];

        fields
            .into_iter()
            .filter_map(|(name, value, kind, help)| {
                Some(
                    MetricSample::new(name, value?)
                        .with_label("device", device)
                        .with_help(help)
                        .with_kind(kind),
                )
            })
            .collect()
    }
}

/// SMART health for each discovered NVMe namespace.
///
/// A device whose log cannot be read is skipped; the others still report.
pub struct NvmeProbe;

impl Probe for NvmeProbe {
    fn name(&self) -> &'static str {
        "nvme"
    }

    fn collect(&mut self, ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        let Some(nvme) = ctx.env.tool_path(TOOL_NVME) else {
            return Ok(Vec::new());
        };

        let mut samples = Vec::with_capacity(ctx.env.nvme_devices.len() * 8);
        for device in &ctx.env.nvme_devices {
            let dev_path = format!("/dev/{}", device);
            let log = ctx
                .commands
                .run(nvme, &["smart-log", &dev_path])
                .map_err(CollectError::from)
                .and_then(|out| parse_smart_log(&out));
            match log {
                Ok(log) => samples.extend(log.samples(device)),
                Err(e) => warn!(device = %device, error = %e, "failed to read NVMe SMART log"),
            }
        }
        Ok(samples)
    }
}

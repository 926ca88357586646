//! Vendor sensor probes backed by `getsysinfo` and `hal_app`.
//!
//! All of these are optional: when the tool is not installed the probe
//! yields no samples and no error.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::collector::environment::{TOOL_GETSYSINFO, TOOL_HAL_APP};
use crate::collector::probe::{CollectError, Probe, ProbeContext};
use crate::metrics::MetricSample;

static FAN_RPM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)fan = (\d+) rpm").expect("valid regex"));

/// Parses the leading number of outputs like `45 C/113 F` or `768 RPM`.
fn leading_number(output: &str) -> Option<f64> {
    output.split_whitespace().next()?.parse().ok()
}

fn leading_number_or_err(output: &str, what: &str) -> Result<f64, CollectError> {
    leading_number(output)
        .ok_or_else(|| CollectError::Parse(format!("unexpected {} output: {:?}", what, output)))
}

/// CPU and system board temperatures.
pub struct SysTempProbe;

impl Probe for SysTempProbe {
    fn name(&self) -> &'static str {
        "sysinfo_temp"
    }

    fn collect(&mut self, ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        let mut samples = Vec::with_capacity(2);
        for sensor in ["cputmp", "systmp"] {
            let Some(result) = ctx.run_tool(TOOL_GETSYSINFO, &[sensor]) else {
                return Ok(Vec::new());
            };
            let output = result?;
            // Some models report "--" for sensors they lack.
            if let Some(value) = leading_number(&output) {
                samples.push(MetricSample::new(format!("node_{}_C", sensor), value));
            }
        }
        Ok(samples)
    }
}

/// Per-bay disk temperature with SMART summary.
///
/// Bays that stop reporting are dropped from later polls: the polled count
/// shrinks to the highest bay that answered, until the next discovery.
#[derive(Default)]
pub struct HdTempProbe {
    polled: u32,
}

impl HdTempProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Probe for HdTempProbe {
    fn name(&self) -> &'static str {
        "sysinfo_hd"
    }

    fn on_environment_refresh(&mut self, ctx: &ProbeContext<'_>) {
        self.polled = ctx.env.hd_count;
    }

    fn collect(&mut self, ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        let Some(getsysinfo) = ctx.env.tool_path(TOOL_GETSYSINFO) else {
            return Ok(Vec::new());
        };

        let mut samples = Vec::with_capacity(self.polled as usize);
        let mut highest = 0;
        for hd in 1..=self.polled {
            let hd_str = hd.to_string();
            let temp = ctx.commands.run(getsysinfo, &["hdtmp", &hd_str])?;
            if temp.starts_with("--") {
                continue;
            }
            let smart = ctx.commands.run(getsysinfo, &["hdsmart", &hd_str])?;
            let value = leading_number_or_err(&temp, "hdtmp")?;

            samples.push(
                MetricSample::new("node_hdtmp_C", value)
                    .with_label("hd", hd_str)
                    .with_label("smart", smart),
            );
            highest = hd;
        }

        if highest != self.polled {
            debug!(from = self.polled, to = highest, "shrinking polled disk count");
            self.polled = highest;
        }
        Ok(samples)
    }
}

/// System fans reported by `getsysinfo sysfan N`.
pub struct SysFanProbe;

impl Probe for SysFanProbe {
    fn name(&self) -> &'static str {
        "sysinfo_fan"
    }

    fn collect(&mut self, ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        let Some(getsysinfo) = ctx.env.tool_path(TOOL_GETSYSINFO) else {
            return Ok(Vec::new());
        };

        let mut samples = Vec::with_capacity(ctx.env.fan_count as usize);
        for fan in 1..=ctx.env.fan_count {
            let fan_str = fan.to_string();
            let output = ctx.commands.run(getsysinfo, &["sysfan", &fan_str])?;
            samples.push(
                MetricSample::new("node_sysfan_RPM", leading_number_or_err(&output, "sysfan")?)
                    .with_label("fan", fan_str)
                    .with_label("type", "System"),
            );
        }
        Ok(samples)
    }
}

/// Enclosure fans via `hal_app --se_sys_get_fan`.
pub struct EnclosureFanProbe;

impl Probe for EnclosureFanProbe {
    fn name(&self) -> &'static str {
        "enclosure_fan"
    }

    fn collect(&mut self, ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        let Some(hal_app) = ctx.env.tool_path(TOOL_HAL_APP) else {
            return Ok(Vec::new());
        };

        let mut samples = Vec::new();
        for enc in &ctx.env.enclosures {
            for index in 0..enc.fan_count {
                let selector = format!("enc_sys_id={},obj_index={}", enc.id, index);
                let output = ctx.commands.run(hal_app, &["--se_sys_get_fan", &selector])?;
                let Some(rpm) = FAN_RPM_RE.captures(&output).and_then(|c| c[1].parse().ok())
                else {
                    continue;
                };
                samples.push(
                    MetricSample::new("node_sysfan_RPM", rpm)
                        .with_label("fan", (index + 1).to_string())
                        .with_label("type", enc.name.as_str()),
                );
            }
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::environment::EnvironmentSnapshot;
    use crate::collector::mock::{MockCommands, MockFs};

    struct Fixture {
        fs: MockFs,
        cmds: MockCommands,
        env: EnvironmentSnapshot,
    }

    impl Fixture {
        fn new(cmds: MockCommands) -> Self {
            let fs = MockFs::typical_nas();
            let env = EnvironmentSnapshot::discover(&fs, &cmds, None);
            Self { fs, cmds, env }
        }

        fn ctx(&self) -> ProbeContext<'_> {
            ProbeContext {
                fs: &self.fs,
                commands: &self.cmds,
                env: &self.env,
            }
        }
    }

    #[test]
    fn test_sys_temps() {
        let fx = Fixture::new(MockCommands::typical_nas());
        let samples = SysTempProbe.collect(&fx.ctx()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].name, "node_cputmp_C");
        assert_eq!(samples[0].value, 45.0);
        assert_eq!(samples[1].name, "node_systmp_C");
    }

    #[test]
    fn test_sys_temp_unreadable_sensor_skipped() {
        let cmds = MockCommands::typical_nas();
        cmds.set_output("getsysinfo", &["systmp"], "--");
        let fx = Fixture::new(cmds);
        let samples = SysTempProbe.collect(&fx.ctx()).unwrap();
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn test_absent_tool_yields_nothing() {
        let fx = Fixture::new(MockCommands::new());
        assert!(SysTempProbe.collect(&fx.ctx()).unwrap().is_empty());
        assert!(SysFanProbe.collect(&fx.ctx()).unwrap().is_empty());
        assert!(EnclosureFanProbe.collect(&fx.ctx()).unwrap().is_empty());
        let mut hd = HdTempProbe::new();
        hd.on_environment_refresh(&fx.ctx());
        assert!(hd.collect(&fx.ctx()).unwrap().is_empty());
    }

    #[test]
    fn test_hd_temps_with_smart() {
        let fx = Fixture::new(MockCommands::typical_nas());
        let mut probe = HdTempProbe::new();
        probe.on_environment_refresh(&fx.ctx());

        let samples = probe.collect(&fx.ctx()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].label("hd"), Some("2"));
        assert_eq!(samples[1].label("smart"), Some("GOOD"));
        assert_eq!(samples[1].value, 35.0);
    }

    #[test]
    fn test_hd_polled_count_shrinks() {
        let cmds = MockCommands::typical_nas();
        cmds.set_output("getsysinfo", &["hdtmp", "2"], "--");
        let fx = Fixture::new(cmds);
        let mut probe = HdTempProbe::new();
        probe.on_environment_refresh(&fx.ctx());

        assert_eq!(probe.collect(&fx.ctx()).unwrap().len(), 1);
        assert_eq!(probe.polled, 1);

        fx.cmds.clear_invocations();
        probe.collect(&fx.ctx()).unwrap();
        assert_eq!(fx.cmds.count("getsysinfo hdtmp 2"), 0);

        probe.on_environment_refresh(&fx.ctx());
        assert_eq!(probe.polled, 2);
    }

    #[test]
    fn test_hd_command_failure_is_error() {
        let cmds = MockCommands::typical_nas();
        cmds.set_failure("getsysinfo", &["hdsmart", "1"], 1, "bay busy");
        let fx = Fixture::new(cmds);
        let mut probe = HdTempProbe::new();
        probe.on_environment_refresh(&fx.ctx());
        assert!(matches!(
            probe.collect(&fx.ctx()),
            Err(CollectError::Exec(_))
        ));
    }

    #[test]
    fn test_sys_fans() {
        let fx = Fixture::new(MockCommands::typical_nas());
        let samples = SysFanProbe.collect(&fx.ctx()).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 768.0);
        assert_eq!(samples[0].label("type"), Some("System"));
    }

    #[test]
    fn test_enclosure_fans() {
        let fx = Fixture::new(MockCommands::typical_nas());
        let samples = EnclosureFanProbe.collect(&fx.ctx()).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 1020.0);
        assert_eq!(samples[0].label("fan"), Some("1"));
        assert_eq!(samples[0].label("type"), Some("TS-453D"));
    }
}

//! External round-trip time via a single ICMP echo.

use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;

use crate::collector::probe::{CollectError, Probe, ProbeContext};
use crate::collector::traits::ExecError;
use crate::metrics::MetricSample;

static LOSS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+)% packet loss").expect("valid regex"));
static RTT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:rtt|round-trip) min/avg/max(?:/mdev)? = [\d.]+/([\d.]+)/").expect("valid regex")
});
static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"PING \S+ \(([^)]+)\)").expect("valid regex"));

/// Sends one echo request and returns the tool's stdout.
///
/// Output is returned even when the tool exits non-zero: `ping` exits 1 on
/// packet loss and the summary still has to be read.
pub trait Pinger: Send {
    fn ping(&self, target: &str) -> Result<String, ExecError>;
}

/// Runs the system `ping` with one packet and a 2 second deadline.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPinger;

impl Pinger for SystemPinger {
    fn ping(&self, target: &str) -> Result<String, ExecError> {
        let output = Command::new("ping")
            .args(["-c", "1", "-W", "2", target])
            .output()
            .map_err(|source| ExecError::Spawn {
                program: "ping".to_string(),
                source,
            })?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PingResult {
    /// Packet loss in percent.
    pub loss_percent: f64,
    /// Average round trip in milliseconds, when any reply arrived.
    pub rtt_avg_ms: Option<f64>,
    /// Resolved address of the target.
    pub address: Option<String>,
}

impl PingResult {
    /// Round trip to report: NaN under any packet loss.
    pub fn roundtrip_ms(&self) -> f64 {
        if self.loss_percent > 0.0 {
            return f64::NAN;
        }
        self.rtt_avg_ms.unwrap_or(f64::NAN)
    }
}

pub fn parse_ping_output(output: &str) -> Result<PingResult, CollectError> {
    let loss_percent = LOSS_RE
        .captures(output)
        .and_then(|c| c.get(1)?.as_str().parse().ok())
        .ok_or_else(|| CollectError::Parse("no packet loss summary in ping output".to_string()))?;
    let rtt_avg_ms = RTT_RE
        .captures(output)
        .and_then(|c| c.get(1)?.as_str().parse().ok());
    if loss_percent == 0.0 && rtt_avg_ms.is_none() {
        return Err(CollectError::Parse(
            "no round-trip summary in ping output".to_string(),
        ));
    }
    let address = ADDRESS_RE
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    Ok(PingResult {
        loss_percent,
        rtt_avg_ms,
        address,
    })
}

pub struct PingProbe {
    target: Option<String>,
    pinger: Box<dyn Pinger>,
}

impl PingProbe {
    pub fn new(target: Option<String>) -> Self {
        Self::with_pinger(target, Box::new(SystemPinger))
    }

    pub fn with_pinger(target: Option<String>, pinger: Box<dyn Pinger>) -> Self {
        Self {
            target: target.filter(|t| !t.is_empty()),
            pinger,
        }
    }
}

impl Probe for PingProbe {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn collect(&mut self, _ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        let Some(target) = &self.target else {
            return Ok(Vec::new());
        };
        let result = parse_ping_output(&self.pinger.ping(target)?)?;
        let mut sample = MetricSample::new(
            "node_network_external_roundtrip_time_ms",
            result.roundtrip_ms(),
        )
        .with_label("target", target.as_str())
        .with_help("Round trip time of one echo request to the external target in milliseconds")
        .gauge()
        .with_timestamp_ms(chrono::Utc::now().timestamp_millis());
        if let Some(address) = result.address {
            sample = sample.with_label("address", address);
        }
        Ok(vec![sample])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::environment::EnvironmentSnapshot;
    use crate::collector::mock::{MockCommands, MockFs};

    const IPUTILS_OK: &str = "\
PING example.com (93.184.216.34) 56(84) bytes of data.
64 bytes from 93.184.216.34: icmp_seq=1 ttl=56 time=11.4 ms

--- example.com ping statistics ---
1 packets transmitted, 1 received, 0% packet loss, time 0ms
rtt min/avg/max/mdev = 11.432/11.432/11.432/0.000 ms
";

    const BUSYBOX_OK: &str = "\
PING 8.8.8.8 (8.8.8.8): 56 data bytes
64 bytes from 8.8.8.8: seq=0 ttl=117 time=9.871 ms

--- 8.8.8.8 ping statistics ---
1 packets transmitted, 1 packets received, 0% packet loss
round-trip min/avg/max = 9.871/9.871/9.871 ms
";

    const TOTAL_LOSS: &str = "\
PING 10.0.0.99 (10.0.0.99) 56(84) bytes of data.

--- 10.0.0.99 ping statistics ---
1 packets transmitted, 0 received, 100% packet loss, time 0ms
";

    struct FixedPinger(&'static str);

    impl Pinger for FixedPinger {
        fn ping(&self, _target: &str) -> Result<String, ExecError> {
            Ok(self.0.to_string())
        }
    }

    fn collect(probe: &mut PingProbe) -> Result<Vec<MetricSample>, CollectError> {
        let fs = MockFs::new();
        let cmds = MockCommands::new();
        let env = EnvironmentSnapshot::default();
        probe.collect(&ProbeContext {
            fs: &fs,
            commands: &cmds,
            env: &env,
        })
    }

    #[test]
    fn test_parse_iputils_and_busybox() {
        let r = parse_ping_output(IPUTILS_OK).unwrap();
        assert_eq!(r.loss_percent, 0.0);
        assert_eq!(r.rtt_avg_ms, Some(11.432));
        assert_eq!(r.address.as_deref(), Some("93.184.216.34"));

        let r = parse_ping_output(BUSYBOX_OK).unwrap();
        assert_eq!(r.rtt_avg_ms, Some(9.871));
        assert_eq!(r.address.as_deref(), Some("8.8.8.8"));

        assert!(parse_ping_output("ping: unknown host nowhere").is_err());
    }

    #[test]
    fn test_total_loss_is_nan() {
        let mut probe =
            PingProbe::with_pinger(Some("10.0.0.99".to_string()), Box::new(FixedPinger(TOTAL_LOSS)));
        let samples = collect(&mut probe).unwrap();
        assert_eq!(samples.len(), 1);
        assert!(samples[0].value.is_nan());
        assert_eq!(samples[0].label("target"), Some("10.0.0.99"));
    }

    #[test]
    fn test_roundtrip_sample() {
        let mut probe =
            PingProbe::with_pinger(Some("example.com".to_string()), Box::new(FixedPinger(IPUTILS_OK)));
        let samples = collect(&mut probe).unwrap();
        assert_eq!(samples[0].name, "node_network_external_roundtrip_time_ms");
        assert_eq!(samples[0].value, 11.432);
        assert_eq!(samples[0].label("address"), Some("93.184.216.34"));
        assert!(samples[0].timestamp_ms.is_some());
    }

    #[test]
    fn test_no_target() {
        let mut probe = PingProbe::with_pinger(None, Box::new(FixedPinger(IPUTILS_OK)));
        assert!(collect(&mut probe).unwrap().is_empty());

        let mut probe = PingProbe::with_pinger(Some(String::new()), Box::new(FixedPinger(IPUTILS_OK)));
        assert!(collect(&mut probe).unwrap().is_empty());
    }
}

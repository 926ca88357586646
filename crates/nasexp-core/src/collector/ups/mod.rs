//! UPS metrics from a Network UPS Tools daemon.
//!
//! The probe keeps one upsd session open across cycles. Connection attempts
//! are capped; once the cap is hit the probe stays quiet (reporting the last
//! connection error) until a cooldown has passed, then starts counting again.
//! A reset or broken connection mid-cycle tears the session down and the
//! cycle is retried once on a fresh connection.

pub mod nut;

use std::collections::HashMap;
use std::io;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::collector::probe::{CollectError, Probe, ProbeContext};
use crate::metrics::MetricSample;
use crate::status::ExporterStatus;

pub use nut::{DEFAULT_NUT_ADDRESS, NutConnector, NutSession, TcpNutConnector, UpsInfo};

pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_CONNECT_COOLDOWN: Duration = Duration::from_secs(60 * 60);

/// Value reported for a status string with no mapping.
pub const UNKNOWN_STATUS_VALUE: f64 = 99.0;

/// A UPS variable value.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl UpsValue {
    /// Interprets a raw value according to its NUT type words.
    pub fn parse(raw: &str, var_type: &str) -> Self {
        if var_type.split_whitespace().any(|t| t == "NUMBER") {
            if let Ok(i) = raw.parse() {
                return UpsValue::Integer(i);
            }
            if let Ok(f) = raw.parse() {
                return UpsValue::Float(f);
            }
        }
        UpsValue::Text(raw.to_string())
    }

    /// Numeric projection. Text values have none and are not exported.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            UpsValue::Integer(i) => Some(*i as f64),
            UpsValue::Float(f) => Some(*f),
            UpsValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            UpsValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsVariable {
    pub name: String,
    pub value: UpsValue,
    pub description: String,
}

/// Fetches all variables of one UPS with their types and descriptions.
pub fn fetch_variables(session: &mut dyn NutSession, ups: &str) -> io::Result<Vec<UpsVariable>> {
    let raw = session.list_vars(ups)?;
    let mut vars = Vec::with_capacity(raw.len());
    for (name, value) in raw {
        let var_type = session.var_type(ups, &name)?;
        let description = session.var_description(ups, &name)?;
        vars.push(UpsVariable {
            value: UpsValue::parse(&value, &var_type),
            name,
            description,
        });
    }
    Ok(vars)
}

/// Maps `ups.status` strings to numeric values.
#[derive(Debug, Clone)]
pub struct UpsStatusMap {
    values: HashMap<String, f64>,
}

impl Default for UpsStatusMap {
    fn default() -> Self {
        let mut values = HashMap::new();
        values.insert("OL".to_string(), 0.0);
        values.insert("OL CHRG".to_string(), 1.0);
        for on_battery in ["OB", "LB", "HB", "DISCHRG"] {
            values.insert(on_battery.to_string(), 2.0);
        }
        values.insert("OFF".to_string(), 3.0);
        values.insert("RB".to_string(), 999.0);
        Self { values }
    }
}

impl UpsStatusMap {
    /// Adds or overrides the value for a status string.
    pub fn with_status(mut self, status: impl Into<String>, value: f64) -> Self {
        self.values.insert(status.into(), value);
        self
    }

    pub fn value(&self, status: &str) -> f64 {
        self.values
            .get(status)
            .copied()
            .unwrap_or(UNKNOWN_STATUS_VALUE)
    }
}

fn is_reset(err: &CollectError) -> bool {
    matches!(
        err,
        CollectError::Io(e) if matches!(e.kind(), io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe)
    )
}

fn is_dead_connection(err: &CollectError) -> bool {
    is_reset(err)
        || matches!(
            err,
            CollectError::Io(e) if matches!(e.kind(), io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionAborted)
        )
}

pub struct UpsProbe {
    connector: Option<Box<dyn NutConnector>>,
    session: Option<Box<dyn NutSession>>,
    ups_list: Option<Vec<String>>,
    status_map: UpsStatusMap,
    max_attempts: u32,
    cooldown: Duration,
    attempts: u32,
    last_connect_error: Option<String>,
    last_attempt_at: Option<Instant>,
}

impl UpsProbe {
    /// A probe talking to upsd at `address`, or an inert probe for `None`.
    pub fn new(address: Option<&str>) -> Self {
        let connector =
            address.map(|a| Box::new(TcpNutConnector::new(a)) as Box<dyn NutConnector>);
        Self::with_connector(connector)
    }

    pub fn with_connector(connector: Option<Box<dyn NutConnector>>) -> Self {
        Self {
            connector,
            session: None,
            ups_list: None,
            status_map: UpsStatusMap::default(),
            max_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            cooldown: DEFAULT_CONNECT_COOLDOWN,
            attempts: 0,
            last_connect_error: None,
            last_attempt_at: None,
        }
    }

    pub fn with_status_map(mut self, status_map: UpsStatusMap) -> Self {
        self.status_map = status_map;
        self
    }

    pub fn with_retry_policy(mut self, max_attempts: u32, cooldown: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.cooldown = cooldown;
        self
    }

    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.logout();
        }
        self.ups_list = None;
    }

    fn ensure_connected(&mut self, now: Instant) -> Result<(), CollectError> {
        if self.session.is_some() {
            return Ok(());
        }
        let Some(connector) = &self.connector else {
            return Ok(());
        };

        if self.attempts >= self.max_attempts
            && self
                .last_attempt_at
                .is_some_and(|at| now.duration_since(at) >= self.cooldown)
        {
            info!("UPS connection cooldown elapsed, retrying");
            self.attempts = 0;
        }

        if self.attempts < self.max_attempts {
            self.attempts += 1;
            self.last_attempt_at = Some(now);
            debug!(attempt = self.attempts, "connecting to UPS daemon");
            match connector.connect() {
                Ok(session) => {
                    info!(attempt = self.attempts, "connected to UPS daemon");
                    self.session = Some(session);
                    self.attempts = 0;
                    self.last_connect_error = None;
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt = self.attempts, error = %e, "UPS connection failed");
                    self.last_connect_error = Some(e.to_string());
                }
            }
        }

        let reason = self
            .last_connect_error
            .as_deref()
            .unwrap_or("not connected");
        Err(CollectError::Connection(format!(
            "{} (attempt {})",
            reason, self.attempts
        )))
    }

    fn try_collect(&mut self, now: Instant) -> Result<Vec<MetricSample>, CollectError> {
        self.ensure_connected(now)?;
        let Some(session) = self.session.as_mut() else {
            return Ok(Vec::new());
        };

        if self.ups_list.is_none() {
            let list = session.list_ups()?;
            self.ups_list = Some(list.into_iter().map(|u| u.name).collect());
        }
        let Some(ups_list) = self.ups_list.as_ref() else {
            return Ok(Vec::new());
        };

        let mut samples = Vec::new();
        for ups in ups_list {
            let vars = fetch_variables(session.as_mut(), ups)?;
            samples.extend(ups_samples(ups, &vars, &self.status_map));
        }
        Ok(samples)
    }

    /// Collects with an explicit clock, for retry policy tests.
    pub fn collect_at(&mut self, now: Instant) -> Result<Vec<MetricSample>, CollectError> {
        let result = match self.try_collect(now) {
            Err(e) if is_reset(&e) => {
                warn!(error = %e, "UPS connection reset, reconnecting");
                self.teardown();
                self.try_collect(now)
            }
            other => other,
        };
        if let Err(e) = &result
            && is_dead_connection(e)
        {
            self.teardown();
        }
        result
    }
}

/// Builds the samples for one UPS: one per numeric variable plus a status gauge.
fn ups_samples(ups: &str, vars: &[UpsVariable], status_map: &UpsStatusMap) -> Vec<MetricSample> {
    let mut samples = Vec::with_capacity(vars.len() + 1);
    let mut status = "";
    let mut status_help = "";
    let mut firmware = "";

    for var in vars {
        match var.name.as_str() {
            "ups.status" => {
                status = var.value.as_str().unwrap_or_default();
                status_help = &var.description;
                continue;
            }
            "ups.firmware" => {
                firmware = var.value.as_str().unwrap_or_default();
                continue;
            }
            _ => {}
        }

        let Some(value) = var.value.as_f64() else {
            continue;
        };
        samples.push(
            MetricSample::new(format!("ups_{}", var.name.replace('.', "_")), value)
                .with_label("ups", ups)
                .with_help(var.description.as_str()),
        );
    }

    samples.push(
        MetricSample::new("ups_ups_status", status_map.value(status))
            .with_label("status", status)
            .with_label("firmware", firmware)
            .with_label("ups", ups)
            .with_help(status_help),
    );
    samples
}

impl Probe for UpsProbe {
    fn name(&self) -> &'static str {
        "ups"
    }

    fn collect(&mut self, _ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        self.collect_at(Instant::now())
    }

    fn describe(&self, status: &mut ExporterStatus) {
        status.ups = self.ups_list.clone().unwrap_or_default();
    }

    fn close(&mut self) {
        if self.session.is_some() {
            info!("closing UPS connection");
        }
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeState {
        refuse: bool,
        connects: u32,
        logouts: u32,
        /// Fail this many `list_ups` calls with the given error kind.
        fail_list: Vec<io::ErrorKind>,
        ups: Vec<(String, Vec<(String, String, String, String)>)>,
    }

    #[derive(Clone, Default)]
    struct FakeUpsd(Arc<Mutex<FakeState>>);

    struct FakeSession(Arc<Mutex<FakeState>>);

    impl NutConnector for FakeUpsd {
        fn connect(&self) -> io::Result<Box<dyn NutSession>> {
            let mut state = self.0.lock().unwrap();
            state.connects += 1;
            if state.refuse {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ));
            }
            Ok(Box::new(FakeSession(self.0.clone())))
        }
    }

    impl FakeSession {
        fn var(&self, ups: &str, var: &str) -> (String, String, String, String) {
            let state = self.0.lock().unwrap();
            state
                .ups
                .iter()
                .find(|(name, _)| name == ups)
                .and_then(|(_, vars)| vars.iter().find(|v| v.0 == var))
                .cloned()
                .unwrap()
        }
    }

    impl NutSession for FakeSession {
        fn list_ups(&mut self) -> io::Result<Vec<UpsInfo>> {
            let mut state = self.0.lock().unwrap();
            if !state.fail_list.is_empty() {
                let kind = state.fail_list.remove(0);
                return Err(io::Error::new(kind, "socket error"));
            }
            Ok(state
                .ups
                .iter()
                .map(|(name, _)| UpsInfo {
                    name: name.clone(),
                    description: String::new(),
                })
                .collect())
        }

        fn list_vars(&mut self, ups: &str) -> io::Result<Vec<(String, String)>> {
            let state = self.0.lock().unwrap();
            let (_, vars) = state.ups.iter().find(|(name, _)| name == ups).unwrap();
            Ok(vars
                .iter()
                .map(|(n, v, _, _)| (n.clone(), v.clone()))
                .collect())
        }

        fn var_type(&mut self, ups: &str, var: &str) -> io::Result<String> {
            Ok(self.var(ups, var).2)
        }

        fn var_description(&mut self, ups: &str, var: &str) -> io::Result<String> {
            Ok(self.var(ups, var).3)
        }

        fn logout(&mut self) -> io::Result<()> {
            self.0.lock().unwrap().logouts += 1;
            Ok(())
        }
    }

    fn var(name: &str, value: &str, ty: &str, desc: &str) -> (String, String, String, String) {
        (
            name.to_string(),
            value.to_string(),
            ty.to_string(),
            desc.to_string(),
        )
    }

    fn typical_upsd() -> FakeUpsd {
        let upsd = FakeUpsd::default();
        upsd.0.lock().unwrap().ups = vec![(
            "ups1".to_string(),
            vec![
                var("battery.charge", "100", "NUMBER", "Battery charge (percent)"),
                var("input.voltage", "229.5", "NUMBER", "Input voltage (V)"),
                var("ups.status", "OL CHRG", "STRING:32", "UPS status"),
                var("ups.firmware", "1.2", "STRING:32", "UPS firmware"),
                var("device.model", "Back-UPS 700", "STRING:32", "Device model"),
            ],
        )];
        upsd
    }

    fn probe(upsd: &FakeUpsd) -> UpsProbe {
        UpsProbe::with_connector(Some(Box::new(upsd.clone())))
    }

    #[test]
    fn test_status_mapping() {
        let map = UpsStatusMap::default();
        assert_eq!(map.value("OL"), 0.0);
        assert_eq!(map.value("OL CHRG"), 1.0);
        for s in ["OB", "LB", "HB", "DISCHRG"] {
            assert_eq!(map.value(s), 2.0);
        }
        assert_eq!(map.value("OFF"), 3.0);
        assert_eq!(map.value("RB"), 999.0);
        assert_eq!(map.value("CHRG"), 99.0);
        assert_eq!(map.value(""), 99.0);

        let map = map.with_status("CHRG", 1.0);
        assert_eq!(map.value("CHRG"), 1.0);
    }

    #[test]
    fn test_value_parsing() {
        assert_eq!(UpsValue::parse("100", "NUMBER"), UpsValue::Integer(100));
        assert_eq!(UpsValue::parse("229.5", "RW NUMBER"), UpsValue::Float(229.5));
        assert_eq!(
            UpsValue::parse("n/a", "NUMBER"),
            UpsValue::Text("n/a".to_string())
        );
        assert_eq!(
            UpsValue::parse("100", "STRING:32"),
            UpsValue::Text("100".to_string())
        );
        assert_eq!(UpsValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(UpsValue::Text("x".to_string()).as_f64(), None);
    }

    #[test]
    fn test_samples_from_variables() {
        let upsd = typical_upsd();
        let samples = probe(&upsd).collect_at(Instant::now()).unwrap();

        let names: Vec<_> = samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["ups_battery_charge", "ups_input_voltage", "ups_ups_status"]
        );
        assert_eq!(samples[0].label("ups"), Some("ups1"));
        assert_eq!(samples[0].help.as_deref(), Some("Battery charge (percent)"));
        assert_eq!(samples[1].value, 229.5);

        let status = &samples[2];
        assert_eq!(status.value, 1.0);
        assert_eq!(
            status.labels,
            vec![
                ("status".to_string(), "OL CHRG".to_string()),
                ("firmware".to_string(), "1.2".to_string()),
                ("ups".to_string(), "ups1".to_string()),
            ]
        );
    }

    #[test]
    fn test_no_ups_configured_or_listed() {
        let mut inert = UpsProbe::new(None);
        assert!(inert.collect_at(Instant::now()).unwrap().is_empty());

        let upsd = FakeUpsd::default();
        let mut p = probe(&upsd);
        assert!(p.collect_at(Instant::now()).unwrap().is_empty());

        let mut status = ExporterStatus::default();
        p.describe(&mut status);
        assert!(status.ups.is_empty());
    }

    #[test]
    fn test_connection_attempts_capped_with_cooldown() {
        let upsd = typical_upsd();
        upsd.0.lock().unwrap().refuse = true;
        let mut p = probe(&upsd).with_retry_policy(10, Duration::from_secs(3600));
        let start = Instant::now();

        let mut last_err = String::new();
        for i in 0..15 {
            let err = p.collect_at(start + Duration::from_secs(i)).unwrap_err();
            assert!(matches!(err, CollectError::Connection(_)));
            last_err = err.to_string();
        }
        assert_eq!(upsd.0.lock().unwrap().connects, 10);
        assert!(last_err.contains("connection refused (attempt 10)"));

        // Cooldown counts from the last real attempt.
        let _ = p.collect_at(start + Duration::from_secs(9 + 3599));
        assert_eq!(upsd.0.lock().unwrap().connects, 10);

        upsd.0.lock().unwrap().refuse = false;
        let samples = p.collect_at(start + Duration::from_secs(9 + 3600)).unwrap();
        assert_eq!(upsd.0.lock().unwrap().connects, 11);
        assert_eq!(samples.len(), 3);
    }

    #[test]
    fn test_reset_reconnects_and_retries_once() {
        let upsd = typical_upsd();
        let mut p = probe(&upsd);
        p.collect_at(Instant::now()).unwrap();
        p.ups_list = None;

        upsd.0.lock().unwrap().fail_list = vec![io::ErrorKind::ConnectionReset];
        let samples = p.collect_at(Instant::now()).unwrap();
        assert_eq!(samples.len(), 3);

        let state = upsd.0.lock().unwrap();
        assert_eq!(state.connects, 2);
        assert_eq!(state.logouts, 1);
    }

    #[test]
    fn test_repeated_reset_reports_error() {
        let upsd = typical_upsd();
        upsd.0.lock().unwrap().fail_list =
            vec![io::ErrorKind::BrokenPipe, io::ErrorKind::BrokenPipe];
        let mut p = probe(&upsd);

        let err = p.collect_at(Instant::now()).unwrap_err();
        assert!(matches!(err, CollectError::Io(_)));
        assert_eq!(upsd.0.lock().unwrap().connects, 2);
    }

    #[test]
    fn test_other_io_error_keeps_session() {
        let upsd = typical_upsd();
        upsd.0.lock().unwrap().fail_list = vec![io::ErrorKind::Other];
        let mut p = probe(&upsd);

        assert!(p.collect_at(Instant::now()).is_err());
        assert!(p.collect_at(Instant::now()).is_ok());
        assert_eq!(upsd.0.lock().unwrap().connects, 1);
    }

    #[test]
    fn test_describe_and_close() {
        let upsd = typical_upsd();
        let mut p = probe(&upsd);
        p.collect_at(Instant::now()).unwrap();

        let mut status = ExporterStatus::default();
        p.describe(&mut status);
        assert_eq!(status.ups, vec!["ups1"]);

        p.close();
        p.close();
        assert_eq!(upsd.0.lock().unwrap().logouts, 1);
    }
}

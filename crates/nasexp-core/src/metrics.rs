//! Metric samples and the Prometheus text exposition writer.
//!
//! Every probe produces a list of [`MetricSample`]s. The engine renders each
//! probe's list with [`write_samples`], which builds `prometheus` metric
//! families with a leading `node` label carrying the discovered hostname and
//! encodes them with the crate's `TextEncoder`.

use std::fmt;
use std::io::{self, Write};

use prometheus::proto::{Counter, Gauge, LabelPair, Metric, MetricFamily, MetricType, Untyped};
use prometheus::{Encoder, TextEncoder};

/// Prometheus metric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricKind {
    Counter,
    Gauge,
    /// Rendered as `# TYPE <name> untyped`.
    #[default]
    Untyped,
}

impl From<MetricKind> for MetricType {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricType::COUNTER,
            MetricKind::Gauge => MetricType::GAUGE,
            MetricKind::Untyped => MetricType::UNTYPED,
        }
    }
}

/// A single scalar observation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    /// Label pairs in insertion order. Keys are unique within a sample.
    pub labels: Vec<(String, String)>,
    /// NaN marks a value that could not be measured this cycle.
    pub value: f64,
    pub help: Option<String>,
    pub kind: MetricKind,
    /// Milliseconds since the Unix epoch. `None` means "now" for the scraper.
    pub timestamp_ms: Option<i64>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            labels: Vec::new(),
            value,
            help: None,
            kind: MetricKind::Untyped,
            timestamp_ms: None,
        }
    }

    /// Adds a label, replacing the value if the key is already present.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.labels.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.labels.push((key, value)),
        }
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_kind(mut self, kind: MetricKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn counter(self) -> Self {
        self.with_kind(MetricKind::Counter)
    }

    pub fn gauge(self) -> Self {
        self.with_kind(MetricKind::Gauge)
    }

    pub fn with_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Returns the value of a label, if set.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Groups samples into metric families carrying the `node` label.
///
/// Samples sharing a name land in one family, ordered by first appearance;
/// within a family the sample order is kept. The first sample with help text
/// or a kind defines the family's metadata.
pub fn to_metric_families(node: &str, samples: &[MetricSample]) -> Vec<MetricFamily> {
    let mut families: Vec<MetricFamily> = Vec::new();
    for sample in samples {
        let index = match families.iter().position(|f| f.get_name() == sample.name) {
            Some(i) => i,
            None => {
                let mut family = MetricFamily::default();
                family.set_name(sample.name.clone());
                family.set_field_type(MetricType::UNTYPED);
                families.push(family);
                families.len() - 1
            }
        };
        let family = &mut families[index];
        if family.get_help().is_empty()
            && let Some(help) = sample.help.as_deref()
        {
            family.set_help(help.to_string());
        }
        if family.get_field_type() == MetricType::UNTYPED && sample.kind != MetricKind::Untyped {
            family.set_field_type(sample.kind.into());
        }
        family.mut_metric().push(to_metric(node, sample));
    }

    // Values are parked as untyped until the family's type is known.
    for family in &mut families {
        let kind = family.get_field_type();
        for metric in family.mut_metric().iter_mut() {
            settle_value(metric, kind);
        }
    }
    families
}

fn to_metric(node: &str, sample: &MetricSample) -> Metric {
    let mut metric = Metric::default();
    metric.mut_label().push(label_pair("node", node));
    for (key, value) in &sample.labels {
        metric.mut_label().push(label_pair(key, value));
    }
    let mut untyped = Untyped::default();
    untyped.set_value(sample.value);
    metric.set_untyped(untyped);
    if let Some(ts) = sample.timestamp_ms {
        metric.set_timestamp_ms(ts);
    }
    metric
}

fn label_pair(name: &str, value: &str) -> LabelPair {
    let mut pair = LabelPair::default();
    pair.set_name(name.to_string());
    pair.set_value(value.to_string());
    pair
}

fn settle_value(metric: &mut Metric, kind: MetricType) {
    match kind {
        MetricType::COUNTER => {
            let mut counter = Counter::default();
            counter.set_value(metric.take_untyped().get_value());
            metric.set_counter(counter);
        }
        MetricType::GAUGE => {
            let mut gauge = Gauge::default();
            gauge.set_value(metric.take_untyped().get_value());
            metric.set_gauge(gauge);
        }
        _ => {}
    }
}

/// Encodes one probe's samples in the Prometheus text format.
///
/// Output per sample: `name{node="host",k="v"} value [timestamp_ms]`
pub fn write_samples<W: Write + ?Sized>(
    w: &mut W,
    node: &str,
    samples: &[MetricSample],
) -> io::Result<()> {
    if samples.is_empty() {
        return Ok(());
    }
    let families = to_metric_families(node, samples);
    let mut w = w;
    TextEncoder::new()
        .encode(&families, &mut w)
        .map_err(|e| match e {
            prometheus::Error::Io(e) => e,
            other => io::Error::other(other.to_string()),
        })
}

/// Writes a failed probe as a passthrough comment line.
pub fn write_failure<W: Write + ?Sized>(
    w: &mut W,
    probe: &str,
    error: &dyn fmt::Display,
) -> io::Result<()> {
    // Comments are single-line.
    let message = error.to_string().replace('\n', " ");
    writeln!(w, "## {}: {}", probe, message)
}

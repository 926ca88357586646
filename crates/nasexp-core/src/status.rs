//! Observable metadata about the exporter, served on the status endpoint.

use serde::Serialize;

/// State of the metrics engine after its most recent cycle.
///
/// Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct ExporterStatus {
    /// When the engine was created.
    pub uptime_start: i64,
    /// Start of the last completed cycle. `None` before the first scrape.
    pub last_fetch: Option<i64>,
    pub fetch_duration_ms: u64,
    /// Samples written during the last cycle.
    pub metric_count: usize,
    pub ups: Vec<String>,
    pub devices: Vec<String>,
    pub volumes: Vec<String>,
    pub interfaces: Vec<String>,
    pub enclosures: Vec<String>,
    pub dm_caches: Vec<String>,
}

impl ExporterStatus {
    pub fn new(uptime_start: i64) -> Self {
        Self {
            uptime_start,
            ..Self::default()
        }
    }
}

/// Status of the whole service: the metrics engine plus the notification sink.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct ServiceStatus {
    pub metrics_endpoint: String,
    pub notification_endpoint: Option<String>,
    pub exporter: ExporterStatus,
    /// When the last notification was received.
    pub last_notification: Option<i64>,
}

/// Current time as milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

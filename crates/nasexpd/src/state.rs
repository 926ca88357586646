//! Shared application state.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use nasexp_core::annotations::Annotator;
use nasexp_core::collector::Exporter;
use nasexp_core::status::ServiceStatus;

pub(crate) const METRICS_ENDPOINT: &str = "/metrics";
pub(crate) const NOTIFICATION_ENDPOINT: &str = "/notification";

pub(crate) struct AppInner {
    pub(crate) exporter: Arc<dyn Exporter>,
    /// Present when a dashboard URL is configured.
    pub(crate) annotator: Option<Arc<Annotator>>,
    /// Epoch millis of the last received notification, 0 if none.
    pub(crate) last_notification: AtomicI64,
}

pub(crate) type SharedState = Arc<AppInner>;

impl AppInner {
    pub(crate) fn new(exporter: Arc<dyn Exporter>, annotator: Option<Arc<Annotator>>) -> Self {
        Self {
            exporter,
            annotator,
            last_notification: AtomicI64::new(0),
        }
    }

    pub(crate) fn record_notification(&self, at_millis: i64) {
        self.last_notification.store(at_millis, Ordering::Relaxed);
    }

    pub(crate) fn service_status(&self) -> ServiceStatus {
        let last = self.last_notification.load(Ordering::Relaxed);
        ServiceStatus {
            metrics_endpoint: METRICS_ENDPOINT.to_string(),
            notification_endpoint: self
                .annotator
                .as_ref()
                .map(|_| NOTIFICATION_ENDPOINT.to_string()),
            exporter: self.exporter.status(),
            last_notification: (last != 0).then_some(last),
        }
    }
}

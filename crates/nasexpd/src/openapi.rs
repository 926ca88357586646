//! OpenAPI documentation definition.

use nasexp_core::status::{ExporterStatus, ServiceStatus};
use utoipa::OpenApi;

use crate::handlers::NotificationResponse;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::handle_health,
        crate::handlers::handle_metrics,
        crate::handlers::handle_notification,
        crate::handlers::handle_status,
    ),
    components(schemas(ServiceStatus, ExporterStatus, NotificationResponse)),
    info(
        title = "nasexp API",
        version = "1.0",
        description = "NAS metrics exporter and notification annotator"
    )
)]
pub(crate) struct ApiDoc;

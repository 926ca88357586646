mod dashboard;
mod handlers;
mod openapi;
mod state;

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use clap::Parser;
use tower_http::compression::CompressionLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use nasexp_core::annotations::{
    Annotator, FifoRegionMatcher, NotificationCenterTagExtractor,
};
use nasexp_core::collector::{Exporter, ExporterConfig, MetricsEngine};

use dashboard::HttpDashboardClient;
use openapi::ApiDoc;
use state::{AppInner, METRICS_ENDPOINT, NOTIFICATION_ENDPOINT, SharedState};

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(name = "nasexpd", about = "NAS metrics exporter", version = nasexp_core::VERSION)]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:9094", env = "NASEXP_LISTEN")]
    listen: String,

    /// Host to ping for the external round-trip metric.
    #[arg(long, env = "NASEXP_PING_TARGET")]
    ping_target: Option<String>,

    /// Seconds between environment rediscoveries (tools, devices, enclosures).
    #[arg(long, default_value = "300", env = "NASEXP_ENVIRONMENT_TTL")]
    environment_ttl: u64,

    /// Seconds between volume free-size lookups.
    #[arg(long, default_value = "60", env = "NASEXP_VOLUME_TTL")]
    volume_ttl: u64,

    /// Address of the NUT upsd daemon.
    #[arg(long, default_value = nasexp_core::collector::ups::DEFAULT_NUT_ADDRESS, env = "NASEXP_UPS_ADDRESS")]
    ups_address: String,

    /// Disable UPS metrics.
    #[arg(long)]
    no_ups: bool,

    /// Value of the `node` label. Falls back to `$HOSTNAME`, then to the
    /// output of `hostname`.
    #[arg(long, env = "NASEXP_HOSTNAME")]
    hostname: Option<String>,

    /// Dashboard base URL. Enables the notification endpoint when set.
    #[arg(long, env = "NASEXP_GRAFANA_URL")]
    grafana_url: Option<String>,

    /// Dashboard API token.
    #[arg(long, env = "NASEXP_GRAFANA_TOKEN", hide_env_values = true)]
    grafana_token: Option<String>,

    /// Comma-separated tags added to every annotation.
    #[arg(long, env = "NASEXP_GRAFANA_TAGS", value_delimiter = ',')]
    grafana_tags: Vec<String>,

    /// Number of pending "started" notifications kept for pairing.
    #[arg(
        long,
        default_value_t = nasexp_core::annotations::DEFAULT_MATCHER_CAPACITY,
        env = "NASEXP_ANNOTATION_CACHE_SIZE"
    )]
    annotation_cache_size: usize,

    /// Increase logging verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn exporter_config(&self) -> ExporterConfig {
        let mut config = ExporterConfig::default()
            .with_environment_ttl(Duration::from_secs(self.environment_ttl))
            .with_volume_ttl(Duration::from_secs(self.volume_ttl))
            .with_ups_address((!self.no_ups).then(|| self.ups_address.clone()));
        if let Some(target) = self.ping_target.as_deref().filter(|t| !t.is_empty()) {
            config = config.with_ping_target(target);
        }
        if let Some(hostname) = self.node_hostname(std::env::var("HOSTNAME").ok()) {
            config = config.with_hostname(hostname);
        }
        config
    }

    fn node_hostname(&self, env_hostname: Option<String>) -> Option<String> {
        self.hostname
            .clone()
            .filter(|h| !h.is_empty())
            .or_else(|| env_hostname.filter(|h| !h.is_empty()))
    }
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    // Built outside the runtime: the blocking HTTP client must not be
    // created or dropped on an async worker.
    let annotator = match args.grafana_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => match create_annotator(&args, url) {
            Ok(annotator) => Some(Arc::new(annotator)),
            Err(e) => {
                error!(error = %e, "failed to create dashboard client");
                process::exit(1);
            }
        },
        None => None,
    };

    let exporter = create_exporter(&args.exporter_config());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };
    runtime.block_on(async_main(args, exporter.clone(), annotator.clone()));

    exporter.close();
    info!("stopped");
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::ERROR
    } else {
        match verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,nasexpd={},nasexp_core={}", level, level))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn async_main(args: Args, exporter: Arc<dyn Exporter>, annotator: Option<Arc<Annotator>>) {
    info!(version = nasexp_core::VERSION, "starting");
    if annotator.is_some() {
        info!(endpoint = NOTIFICATION_ENDPOINT, "dashboard annotations enabled");
    }

    let state: SharedState = Arc::new(AppInner::new(exporter, annotator));
    let app = build_router(state).layer(CompressionLayer::new());

    let addr: SocketAddr = match args.listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(listen = %args.listen, error = %e, "invalid listen address");
            process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(%addr, "listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
    }
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::handle_health))
        .route(METRICS_ENDPOINT, get(handlers::handle_metrics))
        .route(NOTIFICATION_ENDPOINT, post(handlers::handle_notification))
        .route("/status", get(handlers::handle_status))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

fn create_annotator(args: &Args, url: &str) -> Result<Annotator, reqwest::Error> {
    let client = HttpDashboardClient::new(Duration::from_secs(10))?;
    Ok(Annotator::region_matching(
        url,
        args.grafana_token.clone(),
        args.grafana_tags.clone(),
        Box::new(NotificationCenterTagExtractor),
        Box::new(FifoRegionMatcher::new(args.annotation_cache_size)),
        Box::new(client),
    ))
}

fn create_exporter(config: &ExporterConfig) -> Arc<dyn Exporter> {
    #[cfg(target_os = "linux")]
    {
        use nasexp_core::collector::{RealCommands, RealFs};
        Arc::new(MetricsEngine::new(RealFs::new(), RealCommands::new(), config))
    }
    #[cfg(not(target_os = "linux"))]
    {
        use nasexp_core::collector::mock::{MockCommands, MockFs};
        Arc::new(MetricsEngine::new(
            MockFs::typical_nas(),
            MockCommands::typical_nas(),
            config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use nasexp_core::annotations::{
        AnnotateError, DashboardClient, DashboardRequest, DashboardResponse,
    };
    use nasexp_core::collector::mock::{MockCommands, MockFs};
    use std::sync::Mutex;
    use tower::ServiceExt;

    struct FakeDashboard {
        requests: Arc<Mutex<Vec<DashboardRequest>>>,
    }

    impl DashboardClient for FakeDashboard {
        fn send(&self, request: &DashboardRequest) -> Result<DashboardResponse, AnnotateError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(DashboardResponse {
                status: 200,
                body: br#"{"id": 42, "message": "Annotation added"}"#.to_vec(),
            })
        }
    }

    fn test_state(annotator: Option<Arc<Annotator>>) -> SharedState {
        let config = ExporterConfig::default().with_ups_address(None);
        let exporter: Arc<dyn Exporter> = Arc::new(MetricsEngine::new(
            MockFs::typical_nas(),
            MockCommands::typical_nas(),
            &config,
        ));
        Arc::new(AppInner::new(exporter, annotator))
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(test_state(None));
        let response = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "ok");
    }

    #[tokio::test]
    async fn test_metrics_and_status() {
        let state = test_state(None);
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[axum::http::header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        let text = body_string(response).await;
        assert!(text.contains("node_load1{node=\"nas01\"} 0.15\n"));

        let response = app
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(status["metrics_endpoint"], "/metrics");
        assert!(status["notification_endpoint"].is_null());
        assert!(status["exporter"]["metric_count"].as_u64().unwrap() > 0);
        assert_eq!(status["exporter"]["devices"][0], "nvme0n1");
    }

    #[tokio::test]
    async fn test_notification_without_dashboard() {
        let app = build_router(test_state(None));
        let response = app
            .oneshot(
                Request::post("/notification")
                    .body(Body::from("[nas] [Malware Remover] Started scanning."))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notification_posts_annotation() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let annotator = Annotator::region_matching(
            "http://grafana.local",
            Some("secret".to_string()),
            vec!["qnap".to_string()],
            Box::new(NotificationCenterTagExtractor),
            Box::new(FifoRegionMatcher::new(20)),
            Box::new(FakeDashboard {
                requests: requests.clone(),
            }),
        );
        let state = test_state(Some(Arc::new(annotator)));
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::post("/notification")
                    .body(Body::from("[nas] [Malware Remover] Started scanning.\n"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, r#"{"id":42}"#);

        let response = app
            .clone()
            .oneshot(
                Request::post("/notification")
                    .body(Body::from("[nas] [Malware Remover] Scan completed."))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let sent = requests.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].url, "http://grafana.local/api/annotations");
        assert_eq!(sent[1].url, "http://grafana.local/api/annotations/42");
        assert_eq!(sent[0].bearer_token.as_deref(), Some("secret"));

        let response = app
            .clone()
            .oneshot(Request::post("/notification").body(Body::from("  ")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let status = state.service_status();
        assert!(status.last_notification.is_some());
        assert_eq!(status.notification_endpoint.as_deref(), Some("/notification"));
    }

    #[test]
    fn test_args_to_config() {
        let args = Args::parse_from([
            "nasexpd",
            "--no-ups",
            "--ping-target",
            "8.8.8.8",
            "--environment-ttl",
            "600",
            "--grafana-tags",
            "nas,qnap",
        ]);
        let config = args.exporter_config();
        assert_eq!(config.ups_address, None);
        assert_eq!(config.ping_target.as_deref(), Some("8.8.8.8"));
        assert_eq!(config.environment_ttl, Duration::from_secs(600));
        assert_eq!(config.volume_ttl, Duration::from_secs(60));
        assert_eq!(args.grafana_tags, vec!["nas", "qnap"]);
        assert_eq!(args.annotation_cache_size, 20);
    }

    #[test]
    fn test_hostname_falls_back_to_env() {
        let args = Args::parse_from(["nasexpd"]);
        assert_eq!(
            args.node_hostname(Some("nas-env".to_string())).as_deref(),
            Some("nas-env")
        );
        assert_eq!(args.node_hostname(Some(String::new())), None);

        let args = Args::parse_from(["nasexpd", "--hostname", "nas-flag"]);
        assert_eq!(
            args.node_hostname(Some("nas-env".to_string())).as_deref(),
            Some("nas-flag")
        );
    }

    #[test]
    fn test_openapi_lists_routes() {
        let doc = ApiDoc::openapi();
        for path in ["/api/v1/health", "/metrics", "/notification", "/status"] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}

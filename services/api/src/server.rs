use crate::cli::ServeArgs;
use crate::infra::{AppState, BearerAuth, IntakeStack, LoggingNotifier};
use crate::routes::with_intake_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use grade_intake::config::AppConfig;
use grade_intake::error::AppError;
use grade_intake::intake::{IntakeOptions, IntakeService, LocalBlobStore, SubmissionStore};
use grade_intake::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(data_dir) = args.data_dir.take() {
        config.storage.data_dir = data_dir;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(SubmissionStore::open(config.storage.snapshot_path()).await?);
    let blobs = Arc::new(LocalBlobStore::new(config.storage.blob_root()).await?);
    let service: Arc<IntakeStack> = Arc::new(IntakeService::new(
        store,
        blobs,
        Arc::new(LoggingNotifier),
        IntakeOptions {
            blob_timeout: config.storage.blob_timeout,
        },
    ));

    if config.auth.token.is_none() {
        warn!("APP_TOKEN_SECRET is not set; API routes accept unauthenticated requests");
    }
    let auth = BearerAuth::new(config.auth.token.clone());

    let app = with_intake_routes(service, auth)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        data_dir = %config.storage.data_dir.display(),
        "grade intake service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

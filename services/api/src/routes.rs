use crate::infra::{require_bearer, AppState, BearerAuth};
use axum::http::{header, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use grade_intake::intake::{
    intake_router, BlobStore, GradeConfigRepository, IntakeService, Notifier,
    SubmissionRepository,
};
use serde_json::json;
use std::sync::Arc;

/// Intake API behind the bearer check, plus the open operational endpoints.
pub(crate) fn with_intake_routes<R, B, N>(
    service: Arc<IntakeService<R, B, N>>,
    auth: BearerAuth,
) -> axum::Router
where
    R: SubmissionRepository + GradeConfigRepository + 'static,
    B: BlobStore + 'static,
    N: Notifier + 'static,
{
    intake_router(service)
        .route_layer(from_fn_with_state(auth, require_bearer))
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::LoggingNotifier;
    use axum::body::Body;
    use axum::http::Request;
    use grade_intake::intake::{IntakeOptions, MemoryBlobStore, SubmissionStore};
    use tower::ServiceExt;

    fn router(token: Option<&str>) -> axum::Router {
        let service = Arc::new(IntakeService::new(
            Arc::new(SubmissionStore::in_memory()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(LoggingNotifier),
            IntakeOptions::default(),
        ));
        with_intake_routes(service, BearerAuth::new(token.map(str::to_string)))
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::get(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).expect("request")
    }

    #[tokio::test]
    async fn healthcheck_stays_open_when_a_token_is_configured() {
        let response = router(Some("s3cret"))
            .oneshot(get("/health", None))
            .await
            .expect("route responds");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn api_routes_require_the_configured_token() {
        let denied = router(Some("s3cret"))
            .oneshot(get("/api/v1/rooms/open", None))
            .await
            .expect("route responds");
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = router(Some("s3cret"))
            .oneshot(get("/api/v1/rooms/open", Some("s3cret")))
            .await
            .expect("route responds");
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn api_routes_are_open_without_a_token() {
        let response = router(None)
            .oneshot(get("/api/v1/grades/6/config", None))
            .await
            .expect("route responds");
        assert_eq!(response.status(), StatusCode::OK);
    }
}

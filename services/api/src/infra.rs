use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use grade_intake::intake::{
    IntakeService, LocalBlobStore, Notification, NotificationError, Notifier, SubmissionStore,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

pub(crate) type IntakeStack = IntakeService<SubmissionStore, LocalBlobStore, LoggingNotifier>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Notifier that records outbound messages in the service log instead of sending mail.
#[derive(Debug, Default, Clone)]
pub(crate) struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn deliver(&self, notification: Notification) -> Result<(), NotificationError> {
        info!(
            recipient = %notification.recipient,
            subject = %notification.subject,
            body_len = notification.body.len(),
            "notification queued"
        );
        Ok(())
    }
}

/// Shared secret expected in `Authorization: Bearer <token>`; `None` disables the check.
#[derive(Clone, Default)]
pub(crate) struct BearerAuth {
    token: Option<Arc<str>>,
}

impl BearerAuth {
    pub(crate) fn new(token: Option<String>) -> Self {
        Self {
            token: token.map(Arc::from),
        }
    }

    fn accepts(&self, header_value: Option<&str>) -> bool {
        let Some(expected) = self.token.as_deref() else {
            return true;
        };
        header_value
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|presented| presented.trim() == expected)
    }
}

pub(crate) async fn require_bearer(
    State(auth): State<BearerAuth>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if !auth.accepts(presented) {
        let payload = json!({ "error": "missing or invalid bearer token" });
        return (StatusCode::UNAUTHORIZED, Json(payload)).into_response();
    }

    next.run(request).await
}

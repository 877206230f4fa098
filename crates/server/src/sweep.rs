//! Externally triggered timeout sweep.
//!
//! `POST /api/v1/sweep` claims and handles every overdue pending task. The
//! endpoint is meant for a cron-style scheduler and is authenticated with a
//! shared secret carried as a bearer token. With no secret configured the
//! endpoint rejects every call rather than running unauthenticated.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use signoff_core::config::SweeperConfig;
use signoff_engine::{Engine, SweepReport};

#[derive(Clone)]
pub struct SweepState {
    engine: Engine,
    shared_secret: Option<SecretString>,
    batch_size: u32,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub scanned: usize,
    pub timed_out: usize,
    pub reminded: usize,
    pub escalated: usize,
    pub auto_rejected: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl From<SweepReport> for SweepResponse {
    fn from(report: SweepReport) -> Self {
        Self {
            scanned: report.scanned,
            timed_out: report.timed_out,
            reminded: report.reminded,
            escalated: report.escalated,
            auto_rejected: report.auto_rejected,
            skipped: report.skipped,
            failed: report.failed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SweepError {
    pub error: String,
}

pub fn router(engine: Engine, config: &SweeperConfig) -> Router {
    let state = SweepState {
        engine,
        shared_secret: config.shared_secret.clone(),
        batch_size: config.batch_size,
    };
    Router::new().route("/api/v1/sweep", post(trigger_sweep)).with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Compares the presented token against the configured secret. Both sides go
/// through SHA-256 first, so the comparison runs over equal-length digests
/// and does not short-circuit on the secret's bytes.
fn token_matches(presented: &str, secret: &SecretString) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(secret.expose_secret().as_bytes());
    presented == expected
}

async fn trigger_sweep(
    State(state): State<SweepState>,
    headers: HeaderMap,
) -> Result<Json<SweepResponse>, (StatusCode, Json<SweepError>)> {
    let Some(secret) = &state.shared_secret else {
        warn!(event_name = "workflow.sweep.unconfigured", "sweep trigger called with no shared secret configured");
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(SweepError { error: "sweep trigger is not configured".to_string() }),
        ));
    };

    let authorized = bearer_token(&headers).is_some_and(|token| token_matches(token, secret));
    if !authorized {
        warn!(event_name = "workflow.sweep.unauthorized", "sweep trigger rejected");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(SweepError { error: "missing or invalid bearer token".to_string() }),
        ));
    }

    let report =
        state.engine.sweeper().sweep(Utc::now(), state.batch_size).await.map_err(|error| {
            warn!(event_name = "workflow.sweep.failed", error = %error, "sweep pass failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SweepError { error: error.user_message().to_string() }),
            )
        })?;

    info!(
        event_name = "workflow.sweep.completed",
        scanned = report.scanned,
        timed_out = report.timed_out,
        failed = report.failed,
        "sweep pass completed"
    );

    Ok(Json(SweepResponse::from(report)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use tower::ServiceExt;

    use signoff_core::audit::InMemoryAuditRecorder;
    use signoff_core::config::SweeperConfig;
    use signoff_core::directory::InMemoryDirectory;
    use signoff_core::notify::InMemoryNotifier;
    use signoff_core::timeout::RemindPolicy;
    use signoff_db::connect_with_settings;
    use signoff_db::migrations::run_pending;
    use signoff_engine::Engine;

    use super::router;

    async fn app(shared_secret: Option<&str>) -> Router {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");

        let engine = Engine::new(
            pool,
            Arc::new(InMemoryDirectory::with_users(vec![])),
            Arc::new(InMemoryAuditRecorder::default()),
            Arc::new(InMemoryNotifier::default()),
            Arc::new(RemindPolicy),
        );
        let config = SweeperConfig {
            shared_secret: shared_secret.map(|s| s.to_string().into()),
            batch_size: 50,
        };
        router(engine, &config)
    }

    fn sweep_request(authorization: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/api/v1/sweep");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).expect("request")
    }

    #[tokio::test]
    async fn fails_closed_when_no_secret_is_configured() {
        let app = app(None).await;

        let response = app
            .oneshot(sweep_request(Some("Bearer anything")))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn rejects_missing_and_wrong_tokens() {
        let app = app(Some("the-sweep-secret")).await;

        let missing = app.clone().oneshot(sweep_request(None)).await.expect("response");
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .clone()
            .oneshot(sweep_request(Some("Bearer not-the-secret")))
            .await
            .expect("response");
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let malformed = app
            .oneshot(sweep_request(Some("the-sweep-secret")))
            .await
            .expect("response");
        assert_eq!(malformed.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn runs_the_sweep_with_the_right_token() {
        let app = app(Some("the-sweep-secret")).await;

        let response = app
            .oneshot(sweep_request(Some("Bearer the-sweep-secret")))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let report: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(report["scanned"], 0);
        assert_eq!(report["failed"], 0);
    }
}

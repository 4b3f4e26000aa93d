//! Prometheus metrics and the admin HTTP server.
//!
//! Besides `/metrics` the server exposes the worker's operator surface:
//!
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /health` - Health snapshot as JSON, 503 when unhealthy
//! - `GET /dead-letter/stats` - Dead-letter store statistics
//! - `POST /dead-letter/retry` - Run a retry sweep now
//! - `POST /governor/reset` - Clear the consecutive-failure counter
//! - `POST /logs` - Submit a log entry

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::dlq::{DeadLetterStats, RetrySweepReport};
use crate::entry::LogEntry;
use crate::error::{MetricsError, PrometheusInitSnafu, ServerBindSnafu};
use crate::worker::{AuditWorker, HealthStatus};

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub worker: Arc<AuditWorker>,
    pub prometheus: PrometheusHandle,
}

/// Install the Prometheus recorder and start the admin server on `addr`.
///
/// The server stops accepting connections once `shutdown` is cancelled.
///
/// # Example
///
/// ```ignore
/// let addr: SocketAddr = "0.0.0.0:9090".parse()?;
/// let server = metrics::init(addr, worker.clone(), shutdown.clone()).await?;
/// ```
pub async fn init(
    addr: SocketAddr,
    worker: Arc<AuditWorker>,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>, MetricsError> {
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    let listener = TcpListener::bind(addr)
        .await
        .context(ServerBindSnafu { addr })?;
    info!("Admin server listening on http://{}", addr);

    let app = router(AdminState { worker, prometheus });
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            error!("Admin server error: {}", e);
        }
    }))
}

/// Build the admin router.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/dead-letter/stats", get(dead_letter_stats_handler))
        .route("/dead-letter/retry", post(dead_letter_retry_handler))
        .route("/governor/reset", post(governor_reset_handler))
        .route("/logs", post(submit_handler))
        .with_state(state)
}

/// Handler for `/metrics` endpoint.
async fn metrics_handler(State(state): State<AdminState>) -> String {
    state.prometheus.render()
}

/// Handler for `/health` endpoint.
async fn health_handler(State(state): State<AdminState>) -> (StatusCode, Json<HealthStatus>) {
    let health = state.worker.health_status();
    let status = if health.is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

async fn dead_letter_stats_handler(
    State(state): State<AdminState>,
) -> Result<Json<DeadLetterStats>, (StatusCode, String)> {
    state
        .worker
        .dead_letter_stats()
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn dead_letter_retry_handler(
    State(state): State<AdminState>,
) -> Result<Json<RetrySweepReport>, (StatusCode, String)> {
    state
        .worker
        .trigger_retry_sweep()
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn governor_reset_handler(State(state): State<AdminState>) -> StatusCode {
    state.worker.reset_failures();
    StatusCode::NO_CONTENT
}

/// Accepted means queued or dropped; submission never reports failure.
async fn submit_handler(
    State(state): State<AdminState>,
    Json(entry): Json<LogEntry>,
) -> StatusCode {
    state.worker.submit(entry);
    StatusCode::ACCEPTED
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    error!("Admin request failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::dlq::{DeadLetterStore, REASON_MAX_RETRIES};
    use crate::entry::LogLevel;
    use crate::sink::testing::ScriptedSink;
    use tempfile::TempDir;

    fn admin_state(sink: ScriptedSink) -> (TempDir, AdminState) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(DeadLetterStore::new(
            dir.path().join("dead_letter.jsonl"),
            1024 * 1024,
            3,
        ));
        let worker = Arc::new(AuditWorker::new(
            WorkerConfig::default(),
            Arc::new(sink),
            store,
        ));
        let prometheus = PrometheusBuilder::new().build_recorder().handle();
        (dir, AdminState { worker, prometheus })
    }

    #[tokio::test]
    async fn test_health_is_unavailable_until_started() {
        let (_dir, state) = admin_state(ScriptedSink::succeeding());

        let (status, Json(health)) = health_handler(State(state.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!health.worker_running);

        state.worker.start();
        let (status, Json(health)) = health_handler(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(health.is_healthy);

        state.worker.stop().await;
    }

    #[tokio::test]
    async fn test_submit_queues_entry() {
        let (_dir, state) = admin_state(ScriptedSink::succeeding());

        let status = submit_handler(
            State(state.clone()),
            Json(LogEntry::new(LogLevel::Warn, "login throttled")),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(state.worker.health_status().queue_length, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_endpoints() {
        let (_dir, state) = admin_state(ScriptedSink::succeeding());
        state
            .worker
            .dead_letters()
            .add_failed_entry(
                LogEntry::new(LogLevel::Error, "ERROR: disk full"),
                REASON_MAX_RETRIES,
                "timeout",
            )
            .await
            .unwrap();

        let Json(stats) = dead_letter_stats_handler(State(state.clone()))
            .await
            .unwrap();
        assert_eq!(stats.total_entries, 1);

        let Json(report) = dead_letter_retry_handler(State(state.clone()))
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);

        let Json(stats) = dead_letter_stats_handler(State(state)).await.unwrap();
        assert_eq!(stats.total_entries, 0);
    }

    #[tokio::test]
    async fn test_governor_reset_clears_failures() {
        let (_dir, state) = admin_state(ScriptedSink::succeeding());
        state.worker.state().governor().record_failure();

        let status = governor_reset_handler(State(state.clone())).await;

        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(state.worker.health_status().consecutive_failures, 0);
    }
}

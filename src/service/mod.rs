mod metrics;

pub use metrics::ServiceMetrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::schema::{self, Metric, UploadAck};
use crate::store::{CounterStore, DayCounts, StoreError};

/// Shared state for axum handlers.
pub struct AppState {
    pub store: Arc<CounterStore>,
    pub metrics: ServiceMetrics,
}

/// Liveness payload: reachability plus storage identity, no business data.
#[derive(Serialize)]
struct HealthStatus {
    ok: bool,
    db: String,
}

/// Builds the aggregation service router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/upload", post(upload_handler))
        .route("/counts/:day", get(counts_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Runs the aggregation service until the token is cancelled.
pub async fn serve(
    listen: &str,
    store: Arc<CounterStore>,
    shutdown: CancellationToken,
) -> Result<()> {
    let bind_addr = bind_address(listen);

    let metrics = ServiceMetrics::new().context("registering service metrics")?;
    let state = Arc::new(AppState { store, metrics });
    let db = state.store.path().display().to_string();

    let app = router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("listening on {bind_addr}"))?;

    let local_addr = listener.local_addr().context("getting local address")?;
    info!(addr = %local_addr, db = %db, "aggregation service started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await
        .context("serving aggregation endpoints")?;

    info!("aggregation service stopped");

    Ok(())
}

/// Expands the ":port" listen shorthand to a bindable address.
fn bind_address(listen: &str) -> String {
    if listen.starts_with(':') {
        format!("0.0.0.0{listen}")
    } else {
        listen.to_string()
    }
}

/// POST /upload - validate one submission and bump its four counters.
///
/// Validation failures answer 200 with `ok: false` and touch nothing.
/// Storage faults are the one class allowed to escape as a 500.
async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<Json<UploadAck>, StatusCode> {
    let submission = match schema::validate(&payload) {
        Ok(submission) => submission,
        Err(e) => {
            debug!(error = %e, "submission rejected");
            state.metrics.submissions_rejected.inc();
            return Ok(Json(UploadAck::rejected(e.to_string())));
        }
    };

    let store = Arc::clone(&state.store);
    let joined = tokio::task::spawn_blocking(move || {
        // Four independent atomic increments, not one transaction: a crash
        // part-way leaves this submission's metrics mutually inconsistent.
        // Accepted gap, kept as-is.
        for metric in Metric::ALL {
            store.increment(submission.day(), metric, submission.bucket(metric))?;
        }
        Ok::<_, StoreError>(())
    })
    .await;

    match joined {
        Ok(Ok(())) => {
            state.metrics.submissions_accepted.inc();
            state
                .metrics
                .counter_increments
                .inc_by(Metric::ALL.len() as f64);
            Ok(Json(UploadAck::accepted()))
        }
        Ok(Err(e)) => {
            error!(error = %e, "incrementing counters");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => {
            error!(error = %e, "increment task panicked");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /counts/{day} - current snapshot for one day.
///
/// A malformed day string reads as "no data", the same shape as a day
/// nothing was ever submitted for; only the write path is strict.
async fn counts_handler(
    State(state): State<Arc<AppState>>,
    Path(day): Path<String>,
) -> Result<Json<DayCounts>, StatusCode> {
    state.metrics.snapshot_queries.inc();

    if !schema::valid_day(&day) {
        return Ok(Json(DayCounts::new()));
    }

    let store = Arc::clone(&state.store);
    let joined = tokio::task::spawn_blocking(move || store.day_counts(&day)).await;

    match joined {
        Ok(Ok(counts)) => Ok(Json(counts)),
        Ok(Err(e)) => {
            error!(error = %e, "reading day counts");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => {
            error!(error = %e, "snapshot task panicked");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /health - liveness and storage identity.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        ok: true,
        db: state.store.path().display().to_string(),
    })
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            error!(error = %e, "encoding metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

//! HTTP surfaces: the streaming ingest endpoint and the scrape endpoint.

use crate::alert::{DispatchSnapshot, DispatchStats};
use crate::error::IngestError;
use crate::metrics::EnergyMetrics;
use crate::pipeline::Pipeline;
use crate::reading::StreamAck;
use crate::transport;
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::TryStreamExt;
use serde::Serialize;
use std::future::{Future, IntoFuture};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub metrics: Arc<EnergyMetrics>,
    pub dispatch_stats: Arc<DispatchStats>,
    pub max_line_bytes: usize,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, metrics: Arc<EnergyMetrics>) -> Self {
        let dispatch_stats = pipeline.dispatcher().stats();
        Self {
            pipeline,
            metrics,
            dispatch_stats,
            max_line_bytes: transport::DEFAULT_MAX_LINE_BYTES,
        }
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }
}

/// `POST /readings/stream`, `GET /health`, `GET /stats`.
pub fn ingest_router(state: AppState) -> Router {
    Router::new()
        .route("/readings/stream", post(stream_readings))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// `GET /metrics`, served on its own listener.
pub fn metrics_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve `app` until `signal` resolves, then let open connections drain for
/// at most `grace`. Returns `false` if connections were still open when the
/// grace period ran out and the server was abandoned.
pub async fn serve_with_drain<F>(
    listener: TcpListener,
    app: Router,
    signal: F,
    grace: Duration,
) -> io::Result<bool>
where
    F: Future<Output = ()> + Send + 'static,
{
    let draining = Arc::new(Notify::new());
    let notify = draining.clone();

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            info!(
                grace_ms = grace.as_millis() as u64,
                "Shutting down, waiting for open streams to finish"
            );
            notify.notify_one();
        })
        .into_future();

    let deadline = async {
        draining.notified().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => result.map(|()| true),
        () = deadline => {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Open streams did not finish in time, closing them"
            );
            Ok(false)
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

async fn stream_readings(
    State(state): State<AppState>,
    body: Body,
) -> Result<Json<StreamAck>, IngestError> {
    let bytes = body.into_data_stream().map_err(io::Error::other);
    let readings = transport::decode_ndjson(bytes, state.max_line_bytes);

    state.pipeline.run_stream(readings).await.map(Json)
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .tracked_windows
        .set(state.pipeline.store().len() as i64);

    state.metrics.render().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn health_handler() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct StatsResponse {
    version: &'static str,
    tracked_windows: usize,
    window_capacity: usize,
    z_threshold: f64,
    readings: u64,
    anomalies: u64,
    alerts: DispatchSnapshot,
}

async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let pipeline = &state.pipeline;
    Json(StatsResponse {
        version: env!("CARGO_PKG_VERSION"),
        tracked_windows: pipeline.store().len(),
        window_capacity: pipeline.store().capacity(),
        z_threshold: pipeline.detector().config().threshold,
        readings: state.metrics.readings(),
        anomalies: state.metrics.anomalies(),
        alerts: state.dispatch_stats.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    async fn spawn_server(
        app: Router,
        grace: Duration,
    ) -> (String, oneshot::Sender<()>, tokio::task::JoinHandle<io::Result<bool>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let signal = async move {
            let _ = stop_rx.await;
        };
        let handle = tokio::spawn(serve_with_drain(listener, app, signal, grace));
        (base, stop_tx, handle)
    }

    #[tokio::test]
    async fn test_idle_server_stops_cleanly() {
        let app = Router::new().route("/health", get(health_handler));
        let (base, stop_tx, handle) = spawn_server(app, Duration::from_secs(5)).await;

        let body = reqwest::get(format!("{base}/health")).await.unwrap().text().await.unwrap();
        assert_eq!(body, "OK");

        stop_tx.send(()).unwrap();
        let drained = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap().unwrap();
        assert!(drained);
    }

    #[tokio::test]
    async fn test_stuck_stream_does_not_block_exit() {
        let entered = Arc::new(Notify::new());
        let app = {
            let entered = entered.clone();
            Router::new().route(
                "/hang",
                get(move || {
                    let entered = entered.clone();
                    async move {
                        entered.notify_one();
                        std::future::pending::<()>().await;
                    }
                }),
            )
        };
        let (base, stop_tx, handle) = spawn_server(app, Duration::from_millis(200)).await;

        let client = tokio::spawn(async move { reqwest::get(format!("{base}/hang")).await });
        entered.notified().await;

        stop_tx.send(()).unwrap();
        let drained = timeout(Duration::from_secs(5), handle)
            .await
            .expect("server should give up after the grace period")
            .unwrap()
            .unwrap();
        assert!(!drained);

        client.abort();
    }
}

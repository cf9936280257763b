//! HTTP front end for postal-code scans.
//!
//! Streams scan events as server-sent events and serves the last finished
//! result as a CSV download.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
    routing::get,
    Router,
};
use clap::Parser;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cepscan::export::to_csv_string;
use cepscan::{orchestrator_from_config, AggregatedRow, Config, Orchestrator, ProgressEvent};
use cepscan::{ScanRequest, Strategy};

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Postal-code distance scan server")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:5000")]
    listen: String,

    /// TOML configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Application state shared across handlers
struct AppState {
    orchestrator: Arc<Orchestrator>,
    last_result: RwLock<Option<Vec<AggregatedRow>>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    info!("Cepscan Server");
    let config = Config::load_or_default(args.config.as_ref())?;
    info!(
        "{} enrichment providers, {} fallback providers",
        config.providers.enrichment.len(),
        config.providers.fallback.len()
    );

    let state = Arc::new(AppState {
        orchestrator: Arc::new(orchestrator_from_config(&config)),
        last_result: RwLock::new(None),
    });

    // Build router
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/v1/scan", get(scan_handler))
        .route("/v1/export", get(export_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Starting server on {}", args.listen);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
struct ScanQueryParams {
    /// Origin postal code (8 digits)
    origin: Option<String>,
    /// First prefix of the range (5 digits)
    prefix_start: Option<String>,
    /// Last prefix of the range, defaults to `prefix_start`
    prefix_end: Option<String>,
    /// "fast" or "detailed"
    strategy: Option<String>,
}

impl ScanQueryParams {
    fn into_request(self) -> Result<ScanRequest, String> {
        let (Some(origin), Some(start)) = (self.origin, self.prefix_start) else {
            return Err("Missing parameters: origin and prefix_start are required".to_string());
        };
        let strategy = match self.strategy {
            Some(s) => s.parse::<Strategy>()?,
            None => Strategy::Detailed,
        };
        let end = self.prefix_end.unwrap_or_else(|| start.clone());
        Ok(ScanRequest::new(&origin, &start, &end, strategy))
    }
}

/// Scan a prefix range, streaming progress as server-sent events
async fn scan_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ScanQueryParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = match params.into_request() {
        Ok(request) => state.orchestrator.spawn(request),
        Err(message) => {
            let (tx, rx) = mpsc::channel(1);
            let _ = tx.try_send(ProgressEvent::error(message));
            rx
        }
    };

    let events = stream::unfold((rx, state), |(mut rx, state)| async move {
        let event = rx.recv().await?;

        if let ProgressEvent::Result { rows } = &event {
            match state.last_result.write() {
                Ok(mut guard) => *guard = Some(rows.clone()),
                Err(e) => error!("Result cache lock poisoned: {}", e),
            }
        }

        let data = match event.to_json_line() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize event: {}", e);
                r#"{"kind":"error","message":"internal serialization error"}"#.to_string()
            }
        };
        Some((Ok::<_, Infallible>(Event::default().data(data)), (rx, state)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Download the most recent result as CSV
async fn export_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let rows = state
        .last_result
        .read()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .clone()
        .ok_or((StatusCode::NOT_FOUND, "No finished scan yet".to_string()))?;

    let body = to_csv_string(&rows).map_err(|e| {
        error!("CSV export failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"resultado.csv\"",
            ),
        ],
        body,
    ))
}

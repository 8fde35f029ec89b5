use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::Observer;
use crate::report::ObserverReport;

/// Shared between the report refresh task and the API handlers.
struct ServiceState {
    started_at: Instant,
    report: RwLock<Option<ObserverReport>>,
}

impl ServiceState {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            report: RwLock::new(None),
        }
    }
}

/// Run the observer as a long-lived service: regenerate the report on an
/// interval and expose the latest one over HTTP until ctrl-c.
pub async fn run_service(observer: Observer) -> Result<()> {
    let service = observer.settings().service.clone();
    let state = Arc::new(ServiceState::new());

    let interval = Duration::from_secs(service.report_interval_secs.max(60));
    let worker_state = Arc::clone(&state);
    tokio::spawn(async move {
        loop {
            match observer.generate_report().await {
                Ok(report) => {
                    info!(
                        gateways = report.gateway_assessments.len(),
                        epoch_start_height = report.epoch_start_height,
                        "observer report refreshed"
                    );
                    *worker_state.report.write().await = Some(report);
                }
                Err(err) => error!(error = %format!("{err:#}"), "report generation failed"),
            }
            tokio::time::sleep(interval).await;
        }
    });

    let router = Router::new()
        .route("/ar-io/observer/healthcheck", get(healthcheck))
        .route("/ar-io/observer/reports/current", get(current_report))
        .with_state(Arc::clone(&state));

    let addr: SocketAddr = service
        .listen_addr
        .parse()
        .with_context(|| format!("invalid service listen address {}", service.listen_addr))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind observer API to {addr}"))?;
    info!(%addr, "observer API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down observer API");
        })
        .await
        .context("observer API server failed")
}

async fn healthcheck(State(state): State<Arc<ServiceState>>) -> Json<Value> {
    Json(json!({
        "uptime": state.started_at.elapsed().as_secs(),
        "date": Utc::now().to_rfc3339(),
        "message": "Welcome to the ArNS Observer",
    }))
}

async fn current_report(State(state): State<Arc<ServiceState>>) -> Response {
    match state.report.read().await.clone() {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no report generated yet" })),
        )
            .into_response(),
    }
}

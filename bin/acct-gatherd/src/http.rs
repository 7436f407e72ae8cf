//! ---
//! acct_section: "01-core-functionality"
//! acct_subsection: "binary"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "HTTP exporter for node energy readings and daemon metrics."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use acct_gather_common::time::poll_time_display;
use acct_gather_energy::{EnergyContext, EnergySample};
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Registry, TextEncoder, TEXT_FORMAT};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Shared registry type used across the daemon.
pub type SharedRegistry = Arc<Registry>;

#[derive(Clone)]
pub struct HttpState {
    pub registry: SharedRegistry,
    pub context: Arc<EnergyContext>,
}

#[derive(Debug, Serialize)]
struct EnergyView {
    backend: String,
    sample: EnergySample,
    delta_energy: u32,
    polled_at: Option<String>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/energy", get(energy_handler))
        .route("/energy/config", get(energy_config_handler))
        .with_state(state)
}

/// Bind `addr` and serve the exporter routes until shut down.
pub fn spawn_http_server(state: HttpState, addr: SocketAddr) -> Result<HttpServer> {
    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind http listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure http listener as non-blocking")?;
    let bound = std_listener.local_addr().unwrap_or(addr);
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "http exporter starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = router(state).into_make_service();
    let task: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("http exporter encountered an error")?;
        Ok(())
    });

    Ok(HttpServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(State(state): State<HttpState>) -> Response {
    let families = state.registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

async fn energy_handler(State(state): State<HttpState>) -> Response {
    let context = Arc::clone(&state.context);
    let outcome = tokio::task::spawn_blocking(move || context.node_sample()).await;
    match outcome {
        Ok(Ok(sample)) => Json(EnergyView {
            backend: state.context.backend_name().to_owned(),
            delta_energy: sample.delta_energy(),
            polled_at: (sample.poll_time != 0).then(|| poll_time_display(sample.poll_time)),
            sample,
        })
        .into_response(),
        Ok(Err(err)) => unavailable(err),
        Err(err) => unavailable(err),
    }
}

async fn energy_config_handler(State(state): State<HttpState>) -> Response {
    let context = Arc::clone(&state.context);
    match tokio::task::spawn_blocking(move || context.get_config()).await {
        Ok(Ok(config)) => Json(json!({
            "backend": state.context.backend_name(),
            "options": config,
        }))
        .into_response(),
        Ok(Err(err)) => unavailable(err),
        Err(err) => unavailable(err),
    }
}

fn unavailable(err: impl std::fmt::Display) -> Response {
    warn!(error = %err, "energy endpoint unavailable");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct HttpServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl HttpServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

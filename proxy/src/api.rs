use crate::error::Result;
use axum::{
    Router,
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use meter::{ClientIdentity, ClientUsage, Limits, TrafficMeter};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

/// Read-only HTTP view of the traffic meter.
pub struct ApiServer {
    addr: String,
    meter: Arc<TrafficMeter>,
}

#[derive(Clone)]
struct AppState {
    meter: Arc<TrafficMeter>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct TrafficResponse {
    limits: Limits,
    total: u64,
    clients: Vec<ClientUsage>,
}

#[derive(Debug, Serialize)]
struct ClientTrafficResponse {
    client: ClientIdentity,
    read: u64,
    written: u64,
}

#[derive(Debug, Serialize)]
struct GenericResponse {
    success: bool,
    message: String,
}

impl ApiServer {
    pub fn new(addr: String, meter: Arc<TrafficMeter>) -> Self {
        Self { addr, meter }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("API server listening on {}", self.addr);

        axum::serve(listener, router(self.meter))
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

fn router(meter: Arc<TrafficMeter>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/traffic", get(get_traffic))
        .route("/api/traffic/{client}", get(get_client_traffic))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { meter })
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_traffic(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.meter.snapshot();
    Json(TrafficResponse {
        limits: state.meter.limits(),
        total: snapshot.total,
        clients: snapshot.clients,
    })
}

#[instrument(skip(state))]
async fn get_client_traffic(
    State(state): State<AppState>,
    Path(client): Path<String>,
) -> Response {
    let identity = ClientIdentity::parse(&client);
    match state.meter.traffic_for(identity.as_str()) {
        Some(record) => Json(ClientTrafficResponse {
            client: identity,
            read: record.read,
            written: record.written,
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(GenericResponse {
                success: false,
                message: format!("No traffic recorded for {}", identity),
            }),
        )
            .into_response(),
    }
}

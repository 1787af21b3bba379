//! Local control API for meetscribe.
//!
//! Provides HTTP endpoints for:
//! - Session control (state, toggle, screenshot, settings)
//! - Tab reports from the browser shim
//! - The raw envelope bridge for page observers and other contexts
//! - Outcomes of uploaded recordings

pub mod error;
pub mod routes;

use crate::messaging::{Envelope, Message, MessageBus, Origin, Reply};
use crate::observer::PageObservers;
use crate::tabs::RegisteredTabs;
use crate::upload::UploadSupervisor;
use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use error::{ApiError, ApiResult};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::info;

/// Bound on a request to the background context. Covers a full start,
/// including the capture host's own start timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ApiState {
    pub bus: MessageBus,
    pub tabs: RegisteredTabs,
    pub observers: PageObservers,
    pub uploads: UploadSupervisor,
}

impl ApiState {
    /// Send `message` to the background context and wait for its answer.
    /// A refusal by a session guard becomes a 409.
    pub async fn ask(&self, message: Message, origin: Origin) -> ApiResult<Reply> {
        let reply = self
            .bus
            .request(Envelope::to_background(message), origin, REQUEST_TIMEOUT)
            .await?;
        match reply {
            Reply::Rejected(reason) => Err(ApiError::conflict(reason)),
            reply => Ok(reply),
        }
    }
}

pub struct ApiServer {
    port: u16,
    state: ApiState,
}

impl ApiServer {
    pub fn new(state: ApiState, port: u16) -> Self {
        Self { port, state }
    }

    pub async fn start(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET    /             - Service info");
        info!("  GET    /session      - Current session state");
        info!("  POST   /toggle       - Start or stop recording");
        info!("  POST   /screenshot   - Capture the meeting tab");
        info!("  PUT    /config       - Update settings");
        info!("  GET    /tabs         - Known tabs");
        info!("  PUT    /tabs/:id     - Report tab navigation");
        info!("  DELETE /tabs/:id     - Report tab closed");
        info!("  POST   /messages     - Envelope bridge");
        info!("  GET    /jobs         - Recent upload outcomes");

        axum::serve(listener, router(self.state)).await?;

        Ok(())
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(status))
        .merge(routes::session::router(state.clone()))
        .merge(routes::tabs::router(state.clone()))
        .merge(routes::messages::router(state.clone()))
        .merge(routes::jobs::router(state))
        .layer(ServiceBuilder::new())
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "meetscribe",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

//! Envelope bridge for contexts living outside the daemon.
//!
//! `POST /messages` takes a wire envelope `{type, target, data}`. The
//! sending tab, if any, is named by the `x-tab-id` header. Participant
//! reports go through the tab's page observer; everything else is a
//! request to the addressed context.

use crate::api::error::{ApiError, ApiResult};
use crate::api::ApiState;
use crate::messaging::{Envelope, Message, Origin, RawEnvelope, Reply, Target};
use crate::tabs::TabId;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub const TAB_HEADER: &str = "x-tab-id";

const BRIDGE_TIMEOUT: Duration = Duration::from_secs(30);

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/messages", post(bridge))
        .with_state(state)
}

fn origin_from(headers: &HeaderMap) -> ApiResult<Origin> {
    match headers.get(TAB_HEADER) {
        None => Ok(Origin::extension()),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<TabId>().ok())
            .map(Origin::tab)
            .ok_or_else(|| ApiError::bad_request(format!("Invalid {} header", TAB_HEADER))),
    }
}

async fn bridge(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(raw): Json<RawEnvelope>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let origin = origin_from(&headers)?;
    let envelope = Envelope::try_from(raw)?;
    debug!(
        "Bridged {} to {} from {:?}",
        envelope.kind(),
        envelope.target,
        origin.tab
    );

    if envelope.target == Target::CaptureHost {
        return Err(ApiError::forbidden(
            "The capture host only takes requests from the background",
        ));
    }

    if let (Message::ParticipantsUpdate(update), Some(tab)) = (&envelope.message, origin.tab) {
        state.observers.observe(tab, update.clone());
        return Ok((StatusCode::ACCEPTED, Json(json!({ "success": true }))));
    }

    let reply = state
        .bus
        .request(envelope, origin, BRIDGE_TIMEOUT)
        .await?;
    let status = match reply {
        Reply::Rejected(_) => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };
    Ok((status, Json(reply.to_json())))
}

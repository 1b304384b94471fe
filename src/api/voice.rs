//! Voice session endpoints
//!
//! Bridges HTTP gestures into the session machine: the toggle endpoint feeds
//! a mic-toggle event, the status endpoint reads the published snapshot.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::{get, post}};
use serde::Serialize;

use super::{ApiError, ApiState, VoiceBridge};
use crate::voice::{SessionEvent, SessionStatus};

/// Build voice router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/toggle", post(toggle))
        .route("/status", get(status))
        .with_state(state)
}

fn bridge(state: &ApiState) -> Result<&VoiceBridge, ApiError> {
    state
        .voice
        .as_ref()
        .ok_or(ApiError::NotConfigured("voice session disabled"))
}

/// Toggle response
#[derive(Serialize)]
pub struct ToggleResponse {
    /// Whether the mic is engaged after this toggle
    pub listening: bool,
}

/// Toggle the microphone (the user gesture)
async fn toggle(State(state): State<Arc<ApiState>>) -> Result<Json<ToggleResponse>, ApiError> {
    let bridge = bridge(&state)?;

    let was_listening = bridge
        .status
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .listening;

    bridge
        .events
        .send(SessionEvent::MicToggled)
        .map_err(|_| ApiError::NotConfigured("voice session stopped"))?;

    Ok(Json(ToggleResponse {
        listening: !was_listening,
    }))
}

/// Read the current session status snapshot
async fn status(State(state): State<Arc<ApiState>>) -> Result<Json<SessionStatus>, ApiError> {
    let bridge = bridge(&state)?;
    let snapshot = bridge
        .status
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone();
    Ok(Json(snapshot))
}

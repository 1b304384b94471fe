//! Chat and vision endpoints
//!
//! The two dispatch endpoints, each wrapped in its own per-caller rate
//! limiter: chat and vision quotas are tracked independently per
//! endpoint-caller pair.

use std::sync::Arc;

use axum::{Json, Router, extract::State, middleware, routing::post};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState, rate_limit};
use crate::context::{ConversationTurn, Role};
use crate::dispatch::decode_image;

/// Build the dispatch router with per-endpoint throttling
pub fn router(state: Arc<ApiState>) -> Router {
    let chat_routes = Router::new()
        .route("/chat", post(chat))
        .route_layer(middleware::from_fn_with_state(
            state.chat_limiter.clone(),
            rate_limit::caller_rate_limit,
        ));

    let vision_routes = Router::new()
        .route("/vision", post(vision))
        .route_layer(middleware::from_fn_with_state(
            state.vision_limiter.clone(),
            rate_limit::caller_rate_limit,
        ));

    chat_routes.merge(vision_routes).with_state(state)
}

/// One history entry as sent by the client
#[derive(Debug, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

/// Chat request body
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Carried for the upstream service; the gateway does not interpret it
    #[serde(default, rename = "enableSearch")]
    pub enable_search: bool,
}

/// Chat response body
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub timestamp: String,
    pub metadata: ChatMetadata,
}

#[derive(Debug, Serialize)]
pub struct ChatMetadata {
    pub model: String,
}

/// Main chat endpoint
async fn chat(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(ApiError::Validation("Message is required".to_string()));
    }

    tracing::debug!(
        user_id = request.user_id.as_deref().unwrap_or("anonymous"),
        history_len = request.history.len(),
        enable_search = request.enable_search,
        "chat request"
    );

    let turns: Vec<ConversationTurn> = request
        .history
        .iter()
        .map(|entry| ConversationTurn::new(Role::parse(&entry.role), entry.content.clone()))
        .collect();

    let reply = state.dispatcher.send_text(message, &turns).await?;

    Ok(Json(ChatResponse {
        response: reply.text,
        timestamp: reply.timestamp.to_rfc3339(),
        metadata: ChatMetadata {
            model: state.dispatcher.model().to_string(),
        },
    }))
}

/// Vision request body
#[derive(Debug, Deserialize)]
pub struct VisionRequest {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
}

/// Vision response body
#[derive(Debug, Serialize)]
pub struct VisionResponse {
    pub response: String,
    pub timestamp: String,
}

/// Vision endpoint for image analysis
async fn vision(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<VisionRequest>,
) -> Result<Json<VisionResponse>, ApiError> {
    if request.image.is_empty() {
        return Err(ApiError::Validation("Image is required".to_string()));
    }

    tracing::debug!(
        user_id = request.user_id.as_deref().unwrap_or("anonymous"),
        has_prompt = request.prompt.is_some(),
        "vision request"
    );

    let image = decode_image(&request.image)?;
    let reply = state
        .dispatcher
        .send_vision(&image, request.prompt.as_deref())
        .await?;

    Ok(Json(VisionResponse {
        response: reply.text,
        timestamp: reply.timestamp.to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_accepts_client_wire_shape() {
        let request: ChatRequest = serde_json::from_value(serde_json::json!({
            "message": "hello",
            "userId": "web-user",
            "history": [
                { "role": "user", "content": "hi" },
                { "role": "assistant", "content": "hey" }
            ],
            "enableSearch": true
        }))
        .unwrap();

        assert_eq!(request.message, "hello");
        assert_eq!(request.user_id.as_deref(), Some("web-user"));
        assert_eq!(request.history.len(), 2);
        assert!(request.enable_search);
    }

    #[test]
    fn chat_request_fields_default_when_absent() {
        let request: ChatRequest =
            serde_json::from_value(serde_json::json!({ "message": "hi" })).unwrap();
        assert!(request.history.is_empty());
        assert!(!request.enable_search);
        assert!(request.user_id.is_none());
    }

    #[test]
    fn vision_request_defaults_prompt_to_none() {
        let request: VisionRequest =
            serde_json::from_value(serde_json::json!({ "image": "QUJD" })).unwrap();
        assert!(request.prompt.is_none());
    }
}

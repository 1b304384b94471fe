//! HTTP API server for the Pulse gateway

pub mod chat;
pub mod health;
pub mod rate_limit;
pub mod voice;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::config::LimitsConfig;
use crate::context::SessionStore;
use crate::dispatch::RequestDispatcher;
use crate::voice::{SessionEvent, SharedSessionStatus};
use crate::{Error, Result};

use self::rate_limit::{CallerLimiter, SharedLimiter};

/// Handle from API handlers into the running voice session
#[derive(Clone)]
pub struct VoiceBridge {
    /// Feeds events into the session machine
    pub events: mpsc::UnboundedSender<SessionEvent>,
    /// Status snapshot published by the session machine
    pub status: SharedSessionStatus,
}

/// Shared state for API handlers
pub struct ApiState {
    pub dispatcher: Arc<RequestDispatcher>,
    pub persona_name: String,
    pub sessions: SessionStore,
    pub chat_limiter: CallerLimiter,
    pub vision_limiter: CallerLimiter,
    pub global_limiter: Option<SharedLimiter>,
    pub voice: Option<VoiceBridge>,
}

/// API error taxonomy mapped to structured JSON responses
///
/// Every handler boundary converts failures into one of these; the process
/// never terminates on a single bad request.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or malformed client input (400)
    Validation(String),
    /// Caller exceeded the endpoint rate (429)
    RateLimited,
    /// Malformed image payload (500, same shape as upstream failures)
    Decode(String),
    /// External service failure or malformed reply (500)
    Upstream(String),
    /// Feature not available in this deployment (503)
    NotConfigured(&'static str),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(msg) => Self::Validation(msg),
            Error::RateLimited => Self::RateLimited,
            Error::Decode(msg) => Self::Decode(msg),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Rate limit exceeded".to_string(),
            ),
            Self::Decode(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "decode_failed", msg),
            Self::Upstream(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "upstream_failed", msg),
            Self::NotConfigured(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "not_configured",
                msg.to_string(),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody { code, message },
            }),
        )
            .into_response()
    }
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    dispatcher: Arc<RequestDispatcher>,
    persona_name: String,
    port: u16,
    limits: LimitsConfig,
    sessions: SessionStore,
    voice: Option<VoiceBridge>,
    static_dir: Option<PathBuf>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(dispatcher: Arc<RequestDispatcher>, persona_name: String, port: u16) -> Self {
        Self {
            dispatcher,
            persona_name,
            port,
            limits: LimitsConfig::default(),
            sessions: SessionStore::new(),
            voice: None,
            static_dir: None,
        }
    }

    /// Set the rate-limit configuration
    #[must_use]
    pub fn limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Set the session store shared with the daemon
    #[must_use]
    pub fn sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }

    /// Wire the voice session bridge
    #[must_use]
    pub fn voice_bridge(mut self, bridge: Option<VoiceBridge>) -> Self {
        self.voice = bridge;
        self
    }

    /// Set the static files directory for the web console
    #[must_use]
    pub fn static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let global_limiter = self
            .limits
            .global_per_minute
            .map(rate_limit::create_global_limiter);

        let state = Arc::new(ApiState {
            dispatcher: self.dispatcher,
            persona_name: self.persona_name,
            sessions: self.sessions,
            chat_limiter: CallerLimiter::per_minute(self.limits.chat_per_minute),
            vision_limiter: CallerLimiter::per_minute(self.limits.vision_per_minute),
            global_limiter,
            voice: self.voice,
        });

        ApiServer {
            state,
            port: self.port,
            static_dir: self.static_dir,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServer {
    /// Build the router with all routes
    fn router(&self) -> Router {
        let mut router = Router::new()
            .nest("/api", chat::router(self.state.clone()))
            .nest("/api/voice", voice::router(self.state.clone()))
            .merge(health::router())
            .merge(health::status_router(self.state.clone()));

        // Serve the web console: a static dir when configured, the embedded
        // page otherwise
        if let Some(static_dir) = &self.static_dir {
            let index_file = static_dir.join("index.html");
            let serve_dir = ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));
            router = router.fallback_service(serve_dir);
            tracing::info!(path = %static_dir.display(), "serving static files");
        } else {
            router = router.route("/", axum::routing::get(index_page));
        }

        // Process-wide rate limiting (active only when configured)
        let router = router.layer(axum::middleware::from_fn_with_state(
            self.state.clone(),
            rate_limit::global_rate_limit,
        ));

        // CORS layer for cross-origin requests from the console
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

/// Embedded console page used when no static directory is configured
async fn index_page() -> axum::response::Html<&'static str> {
    axum::response::Html(include_str!("../../static/index.html"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_status_mapping() {
        let cases = [
            (
                ApiError::Validation("message is required".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (ApiError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (
                ApiError::Decode("bad base64".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::Upstream("service down".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::NotConfigured("voice disabled"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn crate_errors_map_to_api_taxonomy() {
        assert!(matches!(
            ApiError::from(Error::Decode("x".to_string())),
            ApiError::Decode(_)
        ));
        assert!(matches!(ApiError::from(Error::RateLimited), ApiError::RateLimited));
        assert!(matches!(
            ApiError::from(Error::Upstream("x".to_string())),
            ApiError::Upstream(_)
        ));
        // Internal errors fold into the upstream shape rather than leaking
        assert!(matches!(
            ApiError::from(Error::Audio("alsa".to_string())),
            ApiError::Upstream(_)
        ));
    }
}

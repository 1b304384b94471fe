//! Pulse Gateway - voice-first AI assistant console
//!
//! This library provides the core functionality for the Pulse gateway:
//! - Voice session orchestration (recognition, synthesis, visualizer)
//! - Audio-reactive glow rendering driven by live or simulated amplitude
//! - Request shaping for the generative upstream (context window, persona)
//! - HTTP API with per-caller rate limiting
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Interfaces                        │
//! │        Web console  │  HTTP API  │  Microphone      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Pulse Gateway                        │
//! │  Session machine │ STT/TTS │ Visualizer │ Limiter   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │           Generative service (black box)             │
//! │                Text  │  Vision                       │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod context;
pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod persona;
pub mod upstream;
pub mod visual;
pub mod voice;

pub use config::Config;
pub use context::{ConversationHistory, ConversationTurn, Role, SessionStore, shape_window};
pub use daemon::Daemon;
pub use dispatch::{AttachedImage, DispatchReply, RequestDispatcher, SendJob, decode_image};
pub use error::{Error, Result};
pub use persona::Persona;
pub use upstream::GenerativeClient;
pub use visual::{AmplitudeSource, GlowFrame, Visualizer};
pub use voice::{SessionEvent, SessionPhase, VoiceSessionController};

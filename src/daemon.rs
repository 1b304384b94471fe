//! Gateway daemon
//!
//! Wires the upstream dispatcher, the HTTP API, and (when enabled) the local
//! voice session: capture, recognition, synthesis, the amplitude-driven
//! visualizer, and the session state machine consuming their events.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::api::{ApiServerBuilder, VoiceBridge, rate_limit::CallerLimiter};
use crate::config::Config;
use crate::context::SessionStore;
use crate::dispatch::{RequestDispatcher, SendJob};
use crate::upstream::GenerativeClient;
use crate::visual::{Visualizer, select_source};
use crate::voice::{
    AudioCapture, SessionEvent, SessionParts, SharedSessionStatus, SpeechInput,
    SpeechInputChannel, SpeechOutputChannel, SpeechToText, TextToSpeech, UnavailableInput,
    VoiceSessionController,
};
use crate::{Error, Result};

/// Caller identifier used for the local voice session's rate gate
const VOICE_CALLER_ID: &str = "voice-session";

/// Visualizer frame size
const GLOW_FRAME_SIZE: u32 = 256;

/// The Pulse gateway daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a daemon from loaded configuration
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the upstream client or API server cannot start
    #[allow(clippy::future_not_send)]
    pub async fn run(self) -> Result<()> {
        let api_key = self.config.upstream.api_key.clone().ok_or_else(|| {
            Error::Config("generative API key required (set GEMINI_API_KEY)".to_string())
        })?;

        let mut upstream = GenerativeClient::new(api_key, self.config.upstream.model.clone())?;
        if let Some(base_url) = self.config.upstream.base_url.clone() {
            upstream = upstream.with_base_url(base_url);
        }

        let dispatcher = Arc::new(RequestDispatcher::new(upstream, self.config.persona.clone()));
        let sessions = SessionStore::new();

        let (voice_bridge, session) = if self.config.voice.enabled {
            let (bridge, controller, events_rx) =
                self.build_voice_session(&dispatcher, &sessions);
            (Some(bridge), Some((controller, events_rx)))
        } else {
            tracing::info!("voice session disabled, serving HTTP only");
            (None, None)
        };

        let api = ApiServerBuilder::new(
            Arc::clone(&dispatcher),
            self.config.persona.name.clone(),
            self.config.server.port,
        )
        .limits(self.config.limits.clone())
        .sessions(sessions)
        .voice_bridge(voice_bridge)
        .static_dir(self.config.server.static_dir.clone())
        .build();

        let api_handle = api.spawn();
        tracing::info!(persona = %self.config.persona.name, "pulse gateway ready");

        // The session machine runs on this task; the capture stream is not
        // sendable across threads
        if let Some((controller, events_rx)) = session {
            tokio::select! {
                () = controller.run(events_rx) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        } else {
            let _ = tokio::signal::ctrl_c().await;
        }

        tracing::info!("shutting down");
        api_handle.abort();
        Ok(())
    }

    /// Assemble the voice session: channels, visualizer, and state machine
    fn build_voice_session(
        &self,
        dispatcher: &Arc<RequestDispatcher>,
        sessions: &SessionStore,
    ) -> (
        VoiceBridge,
        VoiceSessionController,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let voice = &self.config.voice;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        // Capture-device access is attempted once; failure is not fatal
        let capture = match AudioCapture::new() {
            Ok(capture) => Some(capture),
            Err(e) => {
                tracing::warn!(error = %e, "capture device unavailable");
                None
            }
        };
        let tap = capture.as_ref().map(AudioCapture::level_tap);
        let capture_ready = tap.is_some();

        let tts = voice.openai_api_key.as_ref().and_then(|key| {
            TextToSpeech::new(
                key.clone(),
                voice.tts_voice.clone(),
                voice.tts_speed,
                voice.tts_model.clone(),
            )
            .inspect_err(|e| tracing::warn!(error = %e, "TTS unavailable"))
            .ok()
        });
        if tts.is_none() {
            tracing::warn!("speech synthesis unavailable, replies will be visual-only");
        }

        let output = SpeechOutputChannel::new(tts, events_tx.clone());
        let speaking = output.speaking_flag();

        // Amplitude strategy is chosen once, at setup
        let source = select_source(tap, &speaking);
        let visualizer = Visualizer::new(source, GLOW_FRAME_SIZE, GLOW_FRAME_SIZE);

        let stt = voice.openai_api_key.as_ref().and_then(|key| {
            SpeechToText::new(key.clone(), voice.stt_model.clone())
                .inspect_err(|e| tracing::warn!(error = %e, "STT unavailable"))
                .ok()
        });

        let input: Box<dyn SpeechInput> = match (capture, stt) {
            (Some(capture), Some(stt)) => Box::new(SpeechInputChannel::new(
                capture,
                stt,
                events_tx.clone(),
                voice.interim_results,
            )),
            (None, _) => Box::new(UnavailableInput::new("no capture device")),
            (Some(_), None) => Box::new(UnavailableInput::new(
                "STT not configured (set OPENAI_API_KEY)",
            )),
        };

        let (session_id, history) = sessions.create();
        tracing::info!(session_id = %session_id, "voice session created");

        let status: SharedSessionStatus = SharedSessionStatus::default();

        let submit_dispatcher = Arc::clone(dispatcher);
        let submit_events = events_tx.clone();
        let submit = Box::new(move |job: SendJob| {
            let dispatcher = Arc::clone(&submit_dispatcher);
            let events = submit_events.clone();
            tokio::spawn(async move {
                let event = match dispatcher.dispatch(job).await {
                    Ok(reply) => SessionEvent::ReplyReady(reply.text),
                    Err(e) => SessionEvent::ReplyFailed(e.to_string()),
                };
                let _ = events.send(event);
            });
        });

        let controller = VoiceSessionController::new(SessionParts {
            input,
            output: Box::new(output),
            visualizer,
            history,
            limiter: CallerLimiter::per_minute(self.config.limits.chat_per_minute),
            caller_id: VOICE_CALLER_ID.to_string(),
            capture_ready,
            submit,
            status: Arc::clone(&status),
        });

        let bridge = VoiceBridge {
            events: events_tx,
            status,
        };

        (bridge, controller, events_rx)
    }
}

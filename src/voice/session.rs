//! Voice session state machine
//!
//! Reconciles three independently-driven subsystems — continuous recognition,
//! queued synthesis, and the amplitude-driven visualizer — through one event
//! channel consumed by a single task. Every event has a defined next state;
//! unlisted combinations are deliberate no-ops.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::api::rate_limit::CallerLimiter;
use crate::context::{Role, SessionHandle};
use crate::dispatch::{AttachedImage, SendJob};
use crate::visual::Visualizer;
use crate::Result;

/// Current phase of the voice session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Listening,
    AwaitingReply,
    Speaking,
}

/// Events consumed by the session machine
///
/// Recognition, synthesis, and dispatch completions all arrive through the
/// same channel; their relative order across sources is not guaranteed.
#[derive(Debug)]
pub enum SessionEvent {
    /// User gesture toggling the microphone
    MicToggled,
    /// In-progress transcript for the current utterance
    InterimTranscript(String),
    /// Completed utterance transcript
    FinalTranscript(String),
    /// Image attached for the next send
    ImageAttached(AttachedImage),
    /// Outward dispatch completed
    ReplyReady(String),
    /// Outward dispatch failed (includes rate-limit rejections)
    ReplyFailed(String),
    /// An utterance began playing
    SynthesisStarted(u64),
    /// An utterance finished or was cancelled
    SynthesisEnded(u64),
}

/// Continuous speech recognition control surface
pub trait SpeechInput {
    /// Begin emitting transcript events
    ///
    /// # Errors
    ///
    /// Returns error if the capture pipeline cannot start
    fn start(&mut self) -> Result<()>;

    /// Stop emitting transcript events for this listening session
    fn stop(&mut self);
}

/// Speech synthesis control surface
pub trait SpeechOutput {
    /// Queue an utterance, cancelling any current one; returns its id
    fn speak(&self, text: &str) -> u64;

    /// Issue the near-silent unlock utterance (no events, no turn)
    fn unlock(&self);

    /// Whether an utterance is audibly playing right now
    fn is_speaking(&self) -> bool;

    /// Whether the last unlock attempt failed
    fn unlock_failed(&self) -> bool;
}

/// Observable session state for the status endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub listening: bool,
    pub speaking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub unlock_failed: bool,
}

/// Shared snapshot updated after every handled event
pub type SharedSessionStatus = Arc<Mutex<SessionStatus>>;

/// Everything the session machine is wired to
pub struct SessionParts {
    pub input: Box<dyn SpeechInput>,
    pub output: Box<dyn SpeechOutput>,
    pub visualizer: Visualizer,
    pub history: SessionHandle,
    pub limiter: CallerLimiter,
    pub caller_id: String,
    /// Whether a live capture tap was acquired at startup
    pub capture_ready: bool,
    /// Spawns the outward dispatch; completion comes back as a session event
    pub submit: Box<dyn Fn(SendJob)>,
    pub status: SharedSessionStatus,
}

/// The voice session state machine
pub struct VoiceSessionController {
    phase: SessionPhase,
    listening: bool,
    partial: Option<String>,
    last_error: Option<String>,
    pending_image: Option<AttachedImage>,
    current_utterance: Option<u64>,
    parts: SessionParts,
}

impl VoiceSessionController {
    /// Create a controller in the idle phase
    #[must_use]
    pub fn new(parts: SessionParts) -> Self {
        Self {
            phase: SessionPhase::Idle,
            listening: false,
            partial: None,
            last_error: None,
            pending_image: None,
            current_utterance: None,
            parts,
        }
    }

    /// Consume session events until the channel closes
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
        tracing::debug!("voice session ended");
    }

    /// Apply one event. Total: unlisted combinations are no-ops.
    pub fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::MicToggled => self.on_mic_toggled(),
            SessionEvent::InterimTranscript(text) => self.on_interim(text),
            SessionEvent::FinalTranscript(text) => self.on_final(text),
            SessionEvent::ImageAttached(image) => self.pending_image = Some(image),
            SessionEvent::ReplyReady(text) => self.on_reply_ready(text),
            SessionEvent::ReplyFailed(message) => {
                if self.phase == SessionPhase::AwaitingReply {
                    self.fail_reply(message);
                }
            }
            SessionEvent::SynthesisStarted(id) => self.on_synthesis_started(id),
            SessionEvent::SynthesisEnded(id) => self.on_synthesis_ended(id),
        }
        self.publish_status();
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn on_mic_toggled(&mut self) {
        self.listening = !self.listening;

        if self.listening {
            if let Err(e) = self.parts.input.start() {
                tracing::warn!(error = %e, "speech input unavailable");
            }
            if self.phase == SessionPhase::Idle {
                self.phase = SessionPhase::Listening;
            }
            // Start the visuals only when something can drive them: a live
            // amplitude tap, or synthesis already in flight
            if self.parts.capture_ready || self.parts.output.is_speaking() {
                self.parts.visualizer.start();
            }
            tracing::debug!("listening started");
        } else {
            self.parts.input.stop();
            self.partial = None;
            if self.phase == SessionPhase::Listening {
                self.phase = SessionPhase::Idle;
            }
            // Synthesis can outlive the listening phase; keep the glow alive
            if !self.parts.output.is_speaking() {
                self.parts.visualizer.stop();
            }
            tracing::debug!("listening stopped");
        }
    }

    fn on_interim(&mut self, text: String) {
        if self.phase == SessionPhase::Listening {
            self.partial = Some(text);
        }
    }

    fn on_final(&mut self, text: String) {
        // Once a turn is in flight, further transcripts are not input
        if self.phase != SessionPhase::Listening {
            return;
        }

        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }

        tracing::info!(transcript = %text, "final transcript");

        // Unlock first, within the same gesture-driven turn as the send
        self.parts.output.unlock();

        let image = self.pending_image.take();
        {
            let mut history = self.lock_history();
            history.append(Role::User, text.clone());
        }

        self.partial = None;
        self.phase = SessionPhase::AwaitingReply;

        // Admission is checked before any shaping or outward send
        if !self.parts.limiter.admit(&self.parts.caller_id) {
            tracing::warn!(caller = %self.parts.caller_id, "voice send rate-limited");
            self.fail_reply("Rate limit exceeded. Give me a moment.".to_string());
            return;
        }

        let history = self.lock_history().turns().to_vec();
        (self.parts.submit)(SendJob {
            message: text,
            image,
            history,
        });
    }

    fn on_reply_ready(&mut self, text: String) {
        if self.phase != SessionPhase::AwaitingReply {
            return;
        }

        {
            let mut history = self.lock_history();
            history.append(Role::Assistant, text.clone());
        }
        self.last_error = None;

        let id = self.parts.output.speak(&text);
        self.current_utterance = Some(id);
        self.phase = SessionPhase::Speaking;
    }

    fn fail_reply(&mut self, message: String) {
        tracing::warn!(error = %message, "reply failed");
        self.last_error = Some(message);
        // Resolved against the listening flag, like synthesis end: an engaged
        // mic keeps accepting speech after an error
        self.phase = if self.listening {
            SessionPhase::Listening
        } else {
            SessionPhase::Idle
        };
    }

    fn on_synthesis_started(&mut self, id: u64) {
        if self.current_utterance == Some(id) {
            self.parts.visualizer.start();
        }
    }

    fn on_synthesis_ended(&mut self, id: u64) {
        // Stale end events from cancelled utterances are ignored
        if self.current_utterance != Some(id) {
            return;
        }
        self.current_utterance = None;

        // The listening flag is read at the moment synthesis ends, not a
        // transition table entry: the user may have re-engaged mid-speech
        if self.listening {
            if self.phase == SessionPhase::Speaking {
                self.phase = SessionPhase::Listening;
            }
        } else {
            if self.phase == SessionPhase::Speaking {
                self.phase = SessionPhase::Idle;
            }
            self.parts.visualizer.stop();
        }
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, crate::context::ConversationHistory> {
        self.parts
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_status(&self) {
        let mut status = self
            .parts
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *status = SessionStatus {
            phase: self.phase,
            listening: self.listening,
            speaking: self.parts.output.is_speaking(),
            partial_transcript: self.partial.clone(),
            last_error: self.last_error.clone(),
            unlock_failed: self.parts.output.unlock_failed(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ConversationHistory;
    use crate::visual::{AmplitudeSource, Visualizer};
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    struct StillAmplitude;
    impl AmplitudeSource for StillAmplitude {
        fn sample(&mut self) -> f32 {
            0.4
        }
    }

    struct FakeInput {
        started: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
    }

    impl SpeechInput for FakeInput {
        fn start(&mut self) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeOutput {
        log: Arc<Mutex<Vec<String>>>,
        speaking: Arc<AtomicBool>,
        next_id: AtomicU64,
    }

    impl SpeechOutput for FakeOutput {
        fn speak(&self, text: &str) -> u64 {
            self.log.lock().unwrap().push(format!("speak:{text}"));
            self.speaking.store(true, Ordering::SeqCst);
            self.next_id.fetch_add(1, Ordering::SeqCst) + 1
        }

        fn unlock(&self) {
            self.log.lock().unwrap().push("unlock".to_string());
        }

        fn is_speaking(&self) -> bool {
            self.speaking.load(Ordering::SeqCst)
        }

        fn unlock_failed(&self) -> bool {
            false
        }
    }

    struct Harness {
        controller: VoiceSessionController,
        log: Arc<Mutex<Vec<String>>>,
        speaking: Arc<AtomicBool>,
        input_started: Arc<AtomicUsize>,
        input_stopped: Arc<AtomicUsize>,
        history: SessionHandle,
        status: SharedSessionStatus,
    }

    fn harness(capture_ready: bool) -> Harness {
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let speaking = Arc::new(AtomicBool::new(false));
        let input_started = Arc::new(AtomicUsize::new(0));
        let input_stopped = Arc::new(AtomicUsize::new(0));
        let history: SessionHandle = Arc::new(Mutex::new(ConversationHistory::new()));
        let status: SharedSessionStatus = Arc::new(Mutex::new(SessionStatus::default()));

        let submit_log = Arc::clone(&log);
        let parts = SessionParts {
            input: Box::new(FakeInput {
                started: Arc::clone(&input_started),
                stopped: Arc::clone(&input_stopped),
            }),
            output: Box::new(FakeOutput {
                log: Arc::clone(&log),
                speaking: Arc::clone(&speaking),
                next_id: AtomicU64::new(0),
            }),
            visualizer: Visualizer::new(Box::new(StillAmplitude), 32, 32),
            history: Arc::clone(&history),
            limiter: CallerLimiter::per_minute(30),
            caller_id: "voice".to_string(),
            capture_ready,
            submit: Box::new(move |job: SendJob| {
                submit_log
                    .lock()
                    .unwrap()
                    .push(format!("submit:{}:{}", job.message, job.image.is_some()));
            }),
            status: Arc::clone(&status),
        };

        Harness {
            controller: VoiceSessionController::new(parts),
            log,
            speaking,
            input_started,
            input_stopped,
            history,
            status,
        }
    }

    fn log_of(h: &Harness) -> Vec<String> {
        h.log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn mic_toggle_enters_and_leaves_listening() {
        let mut h = harness(true);

        h.controller.handle(SessionEvent::MicToggled);
        assert_eq!(h.controller.phase(), SessionPhase::Listening);
        assert_eq!(h.input_started.load(Ordering::SeqCst), 1);
        assert!(h.controller.parts.visualizer.is_running());

        h.controller.handle(SessionEvent::MicToggled);
        assert_eq!(h.controller.phase(), SessionPhase::Idle);
        assert_eq!(h.input_stopped.load(Ordering::SeqCst), 1);
        assert!(!h.controller.parts.visualizer.is_running());
    }

    #[tokio::test]
    async fn visualizer_stays_off_without_capture_or_speech() {
        let mut h = harness(false);

        h.controller.handle(SessionEvent::MicToggled);
        assert_eq!(h.controller.phase(), SessionPhase::Listening);
        assert!(!h.controller.parts.visualizer.is_running());
    }

    #[tokio::test]
    async fn final_transcript_round_trip() {
        let mut h = harness(true);
        h.controller.handle(SessionEvent::MicToggled);

        h.controller.handle(SessionEvent::FinalTranscript("hello".to_string()));
        assert_eq!(h.controller.phase(), SessionPhase::AwaitingReply);
        // Unlock precedes the outward send, within the same turn
        assert_eq!(log_of(&h), vec!["unlock", "submit:hello:false"]);
        assert!(h.controller.parts.visualizer.is_running(), "no flicker to stopped");

        h.controller.handle(SessionEvent::ReplyReady("hi there".to_string()));
        assert_eq!(h.controller.phase(), SessionPhase::Speaking);
        assert!(h.controller.parts.visualizer.is_running());

        h.controller.handle(SessionEvent::SynthesisStarted(1));
        assert!(h.controller.parts.visualizer.is_running());

        // Reply is appended once and spoken once
        {
            let history = h.history.lock().unwrap();
            assert_eq!(history.len(), 2);
            assert_eq!(history.turns()[0].content, "hello");
            assert_eq!(history.turns()[1].content, "hi there");
        }
        let speaks = log_of(&h).iter().filter(|l| l.starts_with("speak:")).count();
        assert_eq!(speaks, 1);

        // Mic still engaged: synthesis end resumes listening
        h.speaking.store(false, Ordering::SeqCst);
        h.controller.handle(SessionEvent::SynthesisEnded(1));
        assert_eq!(h.controller.phase(), SessionPhase::Listening);
        assert!(h.controller.parts.visualizer.is_running());
    }

    #[tokio::test]
    async fn synthesis_end_with_mic_released_goes_idle() {
        let mut h = harness(true);
        h.controller.handle(SessionEvent::MicToggled);
        h.controller.handle(SessionEvent::FinalTranscript("hello".to_string()));
        h.controller.handle(SessionEvent::ReplyReady("answer".to_string()));

        // Mic released while speaking: phase stays Speaking, glow stays on
        h.controller.handle(SessionEvent::MicToggled);
        assert_eq!(h.controller.phase(), SessionPhase::Speaking);
        assert!(h.controller.parts.visualizer.is_running());

        h.speaking.store(false, Ordering::SeqCst);
        h.controller.handle(SessionEvent::SynthesisEnded(1));
        assert_eq!(h.controller.phase(), SessionPhase::Idle);
        assert!(!h.controller.parts.visualizer.is_running());
    }

    #[tokio::test]
    async fn reply_failure_surfaces_inline_and_does_not_speak() {
        let mut h = harness(true);
        h.controller.handle(SessionEvent::MicToggled);
        h.controller.handle(SessionEvent::FinalTranscript("hello".to_string()));
        h.controller.handle(SessionEvent::MicToggled); // release mid-flight

        h.controller.handle(SessionEvent::ReplyFailed("upstream error".to_string()));
        assert_eq!(h.controller.phase(), SessionPhase::Idle);
        assert_eq!(
            h.status.lock().unwrap().last_error.as_deref(),
            Some("upstream error")
        );
        assert!(!log_of(&h).iter().any(|l| l.starts_with("speak:")));
    }

    #[tokio::test]
    async fn rapid_second_send_is_rate_limited() {
        let mut h = harness(true);
        h.controller.handle(SessionEvent::MicToggled);

        h.controller.handle(SessionEvent::FinalTranscript("one".to_string()));
        h.controller.handle(SessionEvent::ReplyReady("ack".to_string()));
        h.speaking.store(false, Ordering::SeqCst);
        h.controller.handle(SessionEvent::SynthesisEnded(1));
        assert_eq!(h.controller.phase(), SessionPhase::Listening);

        // Second final within the 2s interval: rejected before any send
        h.controller.handle(SessionEvent::FinalTranscript("two".to_string()));
        assert_eq!(h.controller.phase(), SessionPhase::Listening);
        assert!(h.status.lock().unwrap().last_error.is_some());

        let submits = log_of(&h).iter().filter(|l| l.starts_with("submit:")).count();
        assert_eq!(submits, 1);
    }

    #[tokio::test]
    async fn attached_image_routes_one_send_through_vision() {
        let mut h = harness(true);
        h.controller.handle(SessionEvent::MicToggled);

        h.controller.handle(SessionEvent::ImageAttached(AttachedImage {
            data: vec![1, 2, 3],
            media_type: "image/png".to_string(),
        }));
        h.controller.handle(SessionEvent::FinalTranscript("what is this".to_string()));

        // Image rides along exactly once
        assert!(log_of(&h).contains(&"submit:what is this:true".to_string()));

        // Next turn has no image: it was cleared by the send cycle
        h.controller.handle(SessionEvent::ReplyReady("a cat".to_string()));
        h.speaking.store(false, Ordering::SeqCst);
        h.controller.handle(SessionEvent::SynthesisEnded(1));
        tokio::time::sleep(Duration::from_secs(2)).await; // clear the rate window
        h.controller.handle(SessionEvent::FinalTranscript("thanks".to_string()));
        assert!(log_of(&h).contains(&"submit:thanks:false".to_string()));
    }

    #[tokio::test]
    async fn transcripts_are_ignored_once_a_turn_is_in_flight() {
        let mut h = harness(true);
        h.controller.handle(SessionEvent::MicToggled);
        h.controller.handle(SessionEvent::FinalTranscript("first".to_string()));

        h.controller.handle(SessionEvent::InterimTranscript("stale".to_string()));
        h.controller.handle(SessionEvent::FinalTranscript("second".to_string()));

        let submits: Vec<String> = log_of(&h)
            .iter()
            .filter(|l| l.starts_with("submit:"))
            .cloned()
            .collect();
        assert_eq!(submits, vec!["submit:first:false"]);
        assert!(h.status.lock().unwrap().partial_transcript.is_none());
    }

    #[tokio::test]
    async fn stale_synthesis_end_is_ignored() {
        let mut h = harness(true);
        h.controller.handle(SessionEvent::MicToggled);
        h.controller.handle(SessionEvent::FinalTranscript("hello".to_string()));
        h.controller.handle(SessionEvent::ReplyReady("reply".to_string()));
        assert_eq!(h.controller.phase(), SessionPhase::Speaking);

        // An end event for an old, cancelled utterance must not flip the phase
        h.controller.handle(SessionEvent::SynthesisEnded(99));
        assert_eq!(h.controller.phase(), SessionPhase::Speaking);
    }

    #[tokio::test]
    async fn empty_transcripts_are_dropped() {
        let mut h = harness(true);
        h.controller.handle(SessionEvent::MicToggled);
        h.controller.handle(SessionEvent::FinalTranscript("   ".to_string()));

        assert_eq!(h.controller.phase(), SessionPhase::Listening);
        assert!(log_of(&h).is_empty());
    }
}

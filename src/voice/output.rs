//! Speech output channel
//!
//! Synthesis plus playback behind a command channel. At most one utterance is
//! active: a new `Speak` cancels whatever is queued or playing. The `Unlock`
//! command issues a near-silent utterance purely to satisfy playback-permission
//! policy; it carries no session events and never becomes a conversation turn.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::playback::{AudioPlayback, decode_mp3};
use super::session::{SessionEvent, SpeechOutput};
use super::tts::TextToSpeech;

/// Gain applied to the unlock utterance (near-silent, not zero)
const UNLOCK_GAIN: f32 = 0.0001;

/// Shared flag set while an utterance is audibly playing
///
/// Checked by the session machine and the simulated amplitude source; this is
/// deliberately a flag rather than the session state enum, since synthesis can
/// outlive the listening phase.
#[derive(Debug, Clone, Default)]
pub struct SpeakingFlag(Arc<AtomicBool>);

impl SpeakingFlag {
    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum SpeakCommand {
    Speak { id: u64, text: String },
    Unlock,
}

/// Queued text-to-speech playback with an unlock mode
pub struct SpeechOutputChannel {
    commands: mpsc::UnboundedSender<SpeakCommand>,
    speaking: SpeakingFlag,
    unlock_failed: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl SpeechOutputChannel {
    /// Create the channel and spawn its worker
    ///
    /// `tts` may be `None` (no credentials configured): replies then degrade
    /// to visual-only with a logged warning, and the session machine still
    /// advances through synthesis start/end.
    #[must_use]
    pub fn new(
        tts: Option<TextToSpeech>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let speaking = SpeakingFlag::default();
        let unlock_failed = Arc::new(AtomicBool::new(false));

        tokio::spawn(worker(
            rx,
            tts,
            events,
            speaking.clone(),
            Arc::clone(&unlock_failed),
        ));

        Self {
            commands,
            speaking,
            unlock_failed,
            next_id: AtomicU64::new(0),
        }
    }

    /// Clone of the shared speaking flag
    #[must_use]
    pub fn speaking_flag(&self) -> SpeakingFlag {
        self.speaking.clone()
    }
}

impl SpeechOutput for SpeechOutputChannel {
    fn speak(&self, text: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.commands.send(SpeakCommand::Speak {
            id,
            text: text.to_string(),
        });
        id
    }

    fn unlock(&self) {
        let _ = self.commands.send(SpeakCommand::Unlock);
    }

    fn is_speaking(&self) -> bool {
        self.speaking.is_set()
    }

    fn unlock_failed(&self) -> bool {
        self.unlock_failed.load(Ordering::SeqCst)
    }
}

type ActiveUtterance = (Arc<AtomicBool>, JoinHandle<()>);

async fn worker(
    mut rx: mpsc::UnboundedReceiver<SpeakCommand>,
    tts: Option<TextToSpeech>,
    events: mpsc::UnboundedSender<SessionEvent>,
    speaking: SpeakingFlag,
    unlock_failed: Arc<AtomicBool>,
) {
    let playback = match AudioPlayback::new() {
        Ok(pb) => Some(pb),
        Err(e) => {
            tracing::warn!(error = %e, "no output device, replies will be visual-only");
            None
        }
    };

    let mut current: Option<ActiveUtterance> = None;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            SpeakCommand::Speak { id, text } => {
                cancel_current(&mut current).await;

                let Some(samples) = synthesize_samples(tts.as_ref(), &text).await else {
                    // Degraded: no audio, but the session must still advance
                    let _ = events.send(SessionEvent::SynthesisStarted(id));
                    let _ = events.send(SessionEvent::SynthesisEnded(id));
                    continue;
                };

                let Some(pb) = playback.clone() else {
                    let _ = events.send(SessionEvent::SynthesisStarted(id));
                    let _ = events.send(SessionEvent::SynthesisEnded(id));
                    continue;
                };

                let cancel = Arc::new(AtomicBool::new(false));
                speaking.set(true);
                let _ = events.send(SessionEvent::SynthesisStarted(id));

                let cancel_task = Arc::clone(&cancel);
                let speaking_task = speaking.clone();
                let events_task = events.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    if let Err(e) = pb.play_cancellable(samples, &cancel_task) {
                        tracing::error!(error = %e, "utterance playback failed");
                    }
                    speaking_task.set(false);
                    let _ = events_task.send(SessionEvent::SynthesisEnded(id));
                });

                current = Some((cancel, handle));
            }
            SpeakCommand::Unlock => {
                cancel_current(&mut current).await;

                let ok = unlock_playback(tts.as_ref(), playback.as_ref()).await;
                unlock_failed.store(!ok, Ordering::SeqCst);
                if ok {
                    tracing::debug!("playback unlocked");
                } else {
                    tracing::warn!("playback unlock failed; synthesis may stay muted");
                }
            }
        }
    }
}

async fn cancel_current(current: &mut Option<ActiveUtterance>) {
    if let Some((cancel, handle)) = current.take() {
        cancel.store(true, Ordering::Relaxed);
        let _ = handle.await;
    }
}

/// Synthesize text and decode to playable samples; `None` on any failure
async fn synthesize_samples(tts: Option<&TextToSpeech>, text: &str) -> Option<Vec<f32>> {
    let Some(tts) = tts else {
        tracing::warn!("TTS not configured, visual-only reply");
        return None;
    };

    let audio = match tts.synthesize(text).await {
        Ok(audio) => audio,
        Err(e) => {
            tracing::warn!(error = %e, "synthesis failed, visual-only reply");
            return None;
        }
    };

    match decode_mp3(&audio) {
        Ok(samples) => Some(samples),
        Err(e) => {
            tracing::warn!(error = %e, "TTS audio decode failed");
            None
        }
    }
}

/// Play the near-silent unlock utterance; returns whether it completed
async fn unlock_playback(tts: Option<&TextToSpeech>, playback: Option<&AudioPlayback>) -> bool {
    let Some(mut samples) = synthesize_samples(tts, " ").await else {
        return false;
    };
    let Some(pb) = playback.cloned() else {
        return false;
    };

    for s in &mut samples {
        *s *= UNLOCK_GAIN;
    }

    let result = tokio::task::spawn_blocking(move || pb.play(samples)).await;
    matches!(result, Ok(Ok(())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn degraded_channel_still_advances_the_session() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let channel = SpeechOutputChannel::new(None, events_tx);

        let id = channel.speak("hello");
        assert_eq!(id, 1);

        // Without TTS the worker emits started/ended immediately
        let started = events_rx.recv().await.unwrap();
        let ended = events_rx.recv().await.unwrap();
        assert!(matches!(started, SessionEvent::SynthesisStarted(1)));
        assert!(matches!(ended, SessionEvent::SynthesisEnded(1)));
        assert!(!channel.is_speaking());
    }

    #[tokio::test]
    async fn utterance_ids_are_monotonic() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let channel = SpeechOutputChannel::new(None, events_tx);

        assert_eq!(channel.speak("a"), 1);
        assert_eq!(channel.speak("b"), 2);
        assert_eq!(channel.speak("c"), 3);
    }

    #[tokio::test]
    async fn unlock_without_tts_latches_the_failure_flag() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let channel = SpeechOutputChannel::new(None, events_tx);
        assert!(!channel.unlock_failed());

        channel.unlock();
        // Drive the worker: a follow-up speak's events prove the unlock was processed
        channel.speak("after");
        let _ = events_rx.recv().await;

        assert!(channel.unlock_failed());
    }
}

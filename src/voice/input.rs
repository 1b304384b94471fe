//! Speech input channel
//!
//! Continuous recognition: a polling task drains the capture buffer, runs the
//! utterance segmenter, and transcribes speech through the STT client. Interim
//! transcripts are emitted on a cadence while an utterance is in progress;
//! each endpointed utterance becomes a final transcript.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use super::capture::{AudioCapture, SAMPLE_RATE, SampleBuffer, samples_to_wav};
use super::segment::UtteranceSegmenter;
use super::session::{SessionEvent, SpeechInput};
use super::stt::SpeechToText;
use crate::{Error, Result};

/// Capture buffer polling cadence
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wraps continuous speech-to-text over the capture device
pub struct SpeechInputChannel {
    capture: AudioCapture,
    stt: SpeechToText,
    events: mpsc::UnboundedSender<SessionEvent>,
    interim_results: bool,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl SpeechInputChannel {
    /// Create an input channel over an acquired capture device
    #[must_use]
    pub const fn new(
        capture: AudioCapture,
        stt: SpeechToText,
        events: mpsc::UnboundedSender<SessionEvent>,
        interim_results: bool,
    ) -> Self {
        Self {
            capture,
            stt,
            events,
            interim_results,
            stop_tx: None,
            task: None,
        }
    }
}

impl SpeechInput for SpeechInputChannel {
    fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Ok(());
        }

        self.capture.start()?;
        let buffer = self.capture.buffer_handle();
        buffer.clear();

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(recognition_loop(
            buffer,
            self.stt.clone(),
            self.events.clone(),
            self.interim_results,
            stop_rx,
        ));

        self.stop_tx = Some(stop_tx);
        self.task = Some(task);
        tracing::debug!("speech input started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(task) = self.task.take() {
            // Further transcripts for this listening session are dropped; an
            // in-flight outward dispatch is unaffected
            task.abort();
        }
        self.capture.stop();
        tracing::debug!("speech input stopped");
    }
}

async fn recognition_loop(
    buffer: SampleBuffer,
    stt: SpeechToText,
    events: mpsc::UnboundedSender<SessionEvent>,
    interim_results: bool,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut segmenter = UtteranceSegmenter::new();
    let mut interim_mark = 0usize;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {
                let chunk = buffer.take();
                if chunk.is_empty() {
                    continue;
                }

                if let Some(utterance) = segmenter.feed(&chunk) {
                    interim_mark = 0;
                    match transcribe(&stt, &utterance).await {
                        Ok(text) if !text.trim().is_empty() => {
                            let _ = events.send(SessionEvent::FinalTranscript(text));
                        }
                        Ok(_) => tracing::debug!("empty transcription, dropped"),
                        Err(e) => tracing::warn!(error = %e, "transcription failed"),
                    }
                } else if interim_results
                    && segmenter.in_speech()
                    && segmenter.partial().len() >= interim_mark + SAMPLE_RATE as usize
                {
                    // Roughly once per second of accumulated speech
                    interim_mark = segmenter.partial().len();
                    let partial = segmenter.partial().to_vec();
                    if let Ok(text) = transcribe(&stt, &partial).await
                        && !text.trim().is_empty()
                    {
                        let _ = events.send(SessionEvent::InterimTranscript(text));
                    }
                }
            }
        }
    }
}

async fn transcribe(stt: &SpeechToText, samples: &[f32]) -> Result<String> {
    let wav = samples_to_wav(samples, SAMPLE_RATE)?;
    stt.transcribe(&wav).await
}

/// Placeholder input when recognition cannot be provided
///
/// Used when the capture device or STT credentials are missing so the session
/// machine still has a total control surface; starting it surfaces the reason.
pub struct UnavailableInput {
    reason: String,
}

impl UnavailableInput {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl SpeechInput for UnavailableInput {
    fn start(&mut self) -> Result<()> {
        Err(Error::Audio(self.reason.clone()))
    }

    fn stop(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_input_surfaces_its_reason() {
        let mut input = UnavailableInput::new("no input device");
        let err = input.start().unwrap_err();
        assert!(err.to_string().contains("no input device"));
        input.stop();
    }
}

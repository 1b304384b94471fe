//! Utterance segmentation
//!
//! Energy-gated endpointing over the capture stream: speech starts when RMS
//! energy crosses a threshold, and an utterance completes after enough speech
//! followed by a trailing silence gap.

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech for a valid utterance (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration to consider end of utterance (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// State of the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech energy
    Waiting,
    /// Accumulating an utterance
    Capturing,
}

/// Segments continuous audio into discrete utterances
pub struct UtteranceSegmenter {
    state: SegmenterState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
}

impl UtteranceSegmenter {
    /// Create a new segmenter
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SegmenterState::Waiting,
            speech_buffer: Vec::new(),
            silence_counter: 0,
        }
    }

    /// Feed captured samples; returns a completed utterance when endpointed
    pub fn feed(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            SegmenterState::Waiting => {
                if is_speech {
                    self.state = SegmenterState::Capturing;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected");
                }
                None
            }
            SegmenterState::Capturing => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > SILENCE_SAMPLES
                    && self.speech_buffer.len() > MIN_SPEECH_SAMPLES
                {
                    tracing::debug!(
                        samples = self.speech_buffer.len(),
                        "utterance complete"
                    );
                    self.state = SegmenterState::Waiting;
                    self.silence_counter = 0;
                    return Some(std::mem::take(&mut self.speech_buffer));
                }

                // Too much silence without enough speech: likely a noise blip
                if self.silence_counter > SILENCE_SAMPLES * 2 {
                    tracing::trace!("noise blip, resetting");
                    self.reset();
                }
                None
            }
        }
    }

    /// Whether an utterance is currently being captured
    #[must_use]
    pub fn in_speech(&self) -> bool {
        self.state == SegmenterState::Capturing
    }

    /// Samples of the in-progress utterance
    #[must_use]
    pub fn partial(&self) -> &[f32] {
        &self.speech_buffer
    }

    /// Reset to the waiting state, discarding buffered speech
    pub fn reset(&mut self) {
        self.state = SegmenterState::Waiting;
        self.speech_buffer.clear();
        self.silence_counter = 0;
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }
}

impl Default for UtteranceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speech_chunk(len: usize) -> Vec<f32> {
        vec![0.5f32; len]
    }

    fn silence_chunk(len: usize) -> Vec<f32> {
        vec![0.0f32; len]
    }

    #[test]
    fn energy_calculation() {
        assert!(calculate_energy(&silence_chunk(100)) < 0.001);
        assert!(calculate_energy(&speech_chunk(100)) > 0.4);
        assert!(calculate_energy(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn silence_alone_never_segments() {
        let mut seg = UtteranceSegmenter::new();
        for _ in 0..20 {
            assert!(seg.feed(&silence_chunk(1600)).is_none());
        }
        assert_eq!(seg.state(), SegmenterState::Waiting);
    }

    #[test]
    fn speech_then_silence_yields_one_utterance() {
        let mut seg = UtteranceSegmenter::new();

        // 0.5s of speech
        for _ in 0..5 {
            assert!(seg.feed(&speech_chunk(1600)).is_none());
        }
        assert!(seg.in_speech());

        // Trailing silence until the gap threshold trips
        let mut utterance = None;
        for _ in 0..8 {
            if let Some(u) = seg.feed(&silence_chunk(1600)) {
                utterance = Some(u);
                break;
            }
        }

        let utterance = utterance.expect("utterance should complete");
        assert!(utterance.len() > MIN_SPEECH_SAMPLES);
        assert_eq!(seg.state(), SegmenterState::Waiting);
    }

    #[test]
    fn short_blip_is_discarded() {
        let mut seg = UtteranceSegmenter::new();

        // 0.1s of speech, well under the minimum
        seg.feed(&speech_chunk(1600));

        // Long silence resets rather than emitting
        for _ in 0..20 {
            assert!(seg.feed(&silence_chunk(1600)).is_none());
        }
        assert_eq!(seg.state(), SegmenterState::Waiting);
        assert!(seg.partial().is_empty());
    }
}

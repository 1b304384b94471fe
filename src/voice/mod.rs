//! Voice processing
//!
//! Capture, playback, STT/TTS clients, utterance segmentation, the two
//! speech channels, and the session state machine that orchestrates them.

mod capture;
mod input;
mod output;
mod playback;
mod segment;
pub mod session;
mod stt;
mod tts;

pub use capture::{AudioCapture, LevelTap, SAMPLE_RATE, SampleBuffer, samples_to_wav};
pub use input::{SpeechInputChannel, UnavailableInput};
pub use output::{SpeakingFlag, SpeechOutputChannel};
pub use playback::{AudioPlayback, decode_mp3};
pub use segment::{SegmenterState, UtteranceSegmenter, calculate_energy};
pub use session::{
    SessionEvent, SessionParts, SessionPhase, SessionStatus, SharedSessionStatus, SpeechInput,
    SpeechOutput, VoiceSessionController,
};
pub use stt::SpeechToText;
pub use tts::TextToSpeech;

//! Outward request dispatch
//!
//! Builds the outward prompt (persona + wall-clock time + message for text,
//! persona + analysis instruction for vision), shapes the conversation window,
//! and normalizes the upstream reply. One attempt per send; a failure is
//! surfaced immediately.

use base64::Engine;
use chrono::{DateTime, Local, Utc};

use crate::context::{CONTEXT_WINDOW_TURNS, ConversationTurn, shape_window};
use crate::persona::Persona;
use crate::upstream::GenerativeClient;
use crate::{Error, Result};

/// Prompt used when a vision request carries no caller-supplied prompt
pub const DEFAULT_VISION_PROMPT: &str = "Analyze this image.";

/// An image held between attachment and send
#[derive(Debug, Clone)]
pub struct AttachedImage {
    pub data: Vec<u8>,
    pub media_type: String,
}

/// A normalized reply from the upstream service
#[derive(Debug, Clone)]
pub struct DispatchReply {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A send prepared by the voice session: message, optional image, and a
/// snapshot of the history taken at submission time
#[derive(Debug)]
pub struct SendJob {
    pub message: String,
    pub image: Option<AttachedImage>,
    pub history: Vec<ConversationTurn>,
}

/// Builds outward requests and parses structured replies
pub struct RequestDispatcher {
    upstream: GenerativeClient,
    persona: Persona,
}

impl RequestDispatcher {
    /// Create a dispatcher for the given upstream client and persona
    #[must_use]
    pub const fn new(upstream: GenerativeClient, persona: Persona) -> Self {
        Self { upstream, persona }
    }

    /// Model identifier reported in response metadata
    #[must_use]
    pub fn model(&self) -> &str {
        self.upstream.model()
    }

    /// Dispatch a prepared send down the text or vision path
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] on service failure or empty reply
    pub async fn dispatch(&self, job: SendJob) -> Result<DispatchReply> {
        match job.image {
            Some(image) => {
                let prompt = if job.message.trim().is_empty() {
                    None
                } else {
                    Some(job.message.as_str())
                };
                self.send_vision(&image, prompt).await
            }
            None => self.send_text(&job.message, &job.history).await,
        }
    }

    /// Text path: persona preamble + current time + message, with shaped history
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] on service failure or empty reply
    pub async fn send_text(
        &self,
        message: &str,
        history: &[ConversationTurn],
    ) -> Result<DispatchReply> {
        let context = shape_window(history, CONTEXT_WINDOW_TURNS);
        let prompt = build_text_prompt(&self.persona, Local::now(), message);

        let text = self.upstream.generate(&context, &prompt).await?;
        Ok(DispatchReply {
            text,
            timestamp: Utc::now(),
        })
    }

    /// Vision path: persona preamble + analysis instruction + caller prompt
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] on service failure or empty reply
    pub async fn send_vision(
        &self,
        image: &AttachedImage,
        prompt: Option<&str>,
    ) -> Result<DispatchReply> {
        let vision_prompt = build_vision_prompt(&self.persona, prompt);

        let text = self
            .upstream
            .generate_vision(&image.data, &image.media_type, &vision_prompt)
            .await?;
        Ok(DispatchReply {
            text,
            timestamp: Utc::now(),
        })
    }
}

/// Format a timestamp as a human-readable sentence for the prompt
#[must_use]
pub fn format_clock(now: DateTime<Local>) -> String {
    now.format("%A, %B %d, %Y at %I:%M %p").to_string()
}

/// Build the outward prompt for the text path
fn build_text_prompt(persona: &Persona, now: DateTime<Local>, message: &str) -> String {
    format!(
        "{}\n\nCurrent time: {}\n\nUser: {}",
        persona.preamble,
        format_clock(now),
        message
    )
}

/// Build the outward prompt for the vision path
fn build_vision_prompt(persona: &Persona, prompt: Option<&str>) -> String {
    let prompt = prompt
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_VISION_PROMPT);
    format!("{}\n\nAnalyze this image: {}", persona.preamble, prompt)
}

/// Decode an image payload into bytes plus a media type
///
/// Accepts a `data:` URL (media type read from the header, payload after the
/// first comma) or a bare base64 string (media type defaults to JPEG).
///
/// # Errors
///
/// Returns [`Error::Decode`] if the base64 payload is malformed
pub fn decode_image(payload: &str) -> Result<AttachedImage> {
    let (media_type, encoded) = match payload.split_once(',') {
        Some((header, rest)) => (media_type_from_header(header), rest),
        None => ("image/jpeg".to_string(), payload),
    };

    let data = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Decode(format!("invalid base64 image payload: {e}")))?;

    if data.is_empty() {
        return Err(Error::Decode("empty image payload".to_string()));
    }

    Ok(AttachedImage { data, media_type })
}

/// Extract the media type from a data-URL header like `data:image/png;base64`
fn media_type_from_header(header: &str) -> String {
    header
        .strip_prefix("data:")
        .and_then(|h| h.split(';').next())
        .filter(|m| !m.is_empty())
        .unwrap_or("image/jpeg")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn clock_formats_as_a_sentence() {
        let t = Local.with_ymd_and_hms(2025, 3, 7, 14, 5, 0).unwrap();
        assert_eq!(format_clock(t), "Friday, March 07, 2025 at 02:05 PM");
    }

    #[test]
    fn text_prompt_includes_persona_time_and_message() {
        let persona = Persona::default();
        let t = Local.with_ymd_and_hms(2025, 3, 7, 9, 30, 0).unwrap();
        let prompt = build_text_prompt(&persona, t, "what's the weather?");

        assert!(prompt.starts_with(&persona.preamble));
        assert!(prompt.contains("Current time: Friday, March 07, 2025 at 09:30 AM"));
        assert!(prompt.ends_with("User: what's the weather?"));
    }

    #[test]
    fn vision_prompt_defaults_when_absent_or_blank() {
        let persona = Persona::default();

        let defaulted = build_vision_prompt(&persona, None);
        assert!(defaulted.ends_with("Analyze this image: Analyze this image."));

        let blank = build_vision_prompt(&persona, Some("   "));
        assert!(blank.ends_with(DEFAULT_VISION_PROMPT));

        let custom = build_vision_prompt(&persona, Some("what breed is this dog?"));
        assert!(custom.ends_with("Analyze this image: what breed is this dog?"));
    }

    #[test]
    fn decode_image_accepts_data_url() {
        let image = decode_image("data:image/png;base64,QUJDRA==").unwrap();
        assert_eq!(image.media_type, "image/png");
        assert_eq!(image.data, b"ABCD");
    }

    #[test]
    fn decode_image_accepts_bare_base64_as_jpeg() {
        let image = decode_image("QUJDRA==").unwrap();
        assert_eq!(image.media_type, "image/jpeg");
        assert_eq!(image.data, b"ABCD");
    }

    #[test]
    fn decode_image_rejects_malformed_base64() {
        let err = decode_image("data:image/png;base64,not-base64!!!").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn decode_image_rejects_empty_payload() {
        let err = decode_image("data:image/png;base64,").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}

//! Assistant persona
//!
//! The persona preamble is the fixed descriptive text prepended to every
//! outward prompt. It establishes tone and capabilities; it is never sent to
//! the client and never stored as a conversation turn.

use serde::{Deserialize, Serialize};

/// Default assistant name
pub const DEFAULT_NAME: &str = "Nova";

const DEFAULT_PREAMBLE: &str = "\
You are Nova, a personal AI assistant in the spirit of a trusted ship's computer.

Your characteristics:
- Sharp, warm, and quietly witty; helpful before clever
- You speak naturally and conversationally, never like documentation
- You anticipate needs and offer the next useful step unprompted
- You are confident about what you know and plain about what you don't

Communication style:
- Keep responses brief and engaging; spoken replies should never be walls of text
- Use personal language (\"I've found that...\", \"Let me check...\")
- Break complex information into small, digestible pieces
- Ask a clarifying question when the request is genuinely ambiguous

Capabilities to mention when relevant:
- Natural conversation with context awareness
- Image analysis and visual understanding
- Multi-modal interaction: text, voice, and vision

Always make the exchange feel effortless and human.";

/// Assistant persona: a display name plus the fixed prompt preamble
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// Display name of the assistant
    pub name: String,
    /// Fixed text prepended to every outward prompt
    pub preamble: String,
}

impl Persona {
    /// Create a persona with the default preamble and a custom name
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        let preamble = if name == DEFAULT_NAME {
            DEFAULT_PREAMBLE.to_string()
        } else {
            // Keep the same voice, swap the identity line
            DEFAULT_PREAMBLE.replacen(DEFAULT_NAME, &name, 1)
        };
        Self { name, preamble }
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::named(DEFAULT_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_persona_uses_default_name() {
        let p = Persona::default();
        assert_eq!(p.name, "Nova");
        assert!(p.preamble.starts_with("You are Nova"));
    }

    #[test]
    fn named_persona_rewrites_identity_line() {
        let p = Persona::named("Vega");
        assert_eq!(p.name, "Vega");
        assert!(p.preamble.starts_with("You are Vega"));
    }
}

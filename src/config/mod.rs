//! Configuration management for the Pulse gateway
//!
//! Layering: environment variables > TOML config file > defaults.

pub mod file;

use std::path::PathBuf;

use crate::Result;
use crate::persona::Persona;

/// Pulse gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Active persona
    pub persona: Persona,

    /// HTTP API server configuration
    pub server: ServerConfig,

    /// Upstream generative service configuration
    pub upstream: UpstreamConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Rate limit configuration
    pub limits: LimitsConfig,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Static files directory for the web console
    pub static_dir: Option<PathBuf>,
}

/// Upstream generative service configuration
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// API key for the generative service
    pub api_key: Option<String>,

    /// Model identifier
    pub model: String,

    /// Base URL override
    pub base_url: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable the local voice session
    pub enabled: bool,

    /// STT model
    pub stt_model: String,

    /// TTS model
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier
    pub tts_speed: f64,

    /// Emit interim transcripts while an utterance is in progress
    pub interim_results: bool,

    /// OpenAI API key for STT/TTS
    pub openai_api_key: Option<String>,
}

/// Rate limit configuration
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Per-caller chat requests per minute
    pub chat_per_minute: u32,

    /// Per-caller vision requests per minute
    pub vision_per_minute: u32,

    /// Optional process-wide requests per minute
    pub global_per_minute: Option<u32>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            chat_per_minute: 30,
            vision_per_minute: 20,
            global_per_minute: None,
        }
    }
}

impl Config {
    /// Load configuration
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for future validation
    pub fn load(persona_name: Option<&str>, disable_voice: bool) -> Result<Self> {
        // Load optional TOML config file (env > toml > default)
        let fc = file::load_config_file();

        let persona_name = persona_name
            .map(ToString::to_string)
            .or_else(|| std::env::var("PULSE_PERSONA").ok())
            .or(fc.persona)
            .unwrap_or_else(|| crate::persona::DEFAULT_NAME.to_string());
        let persona = Persona::named(persona_name);

        let server = ServerConfig {
            port: std::env::var("PULSE_PORT")
                .or_else(|_| std::env::var("PORT"))
                .ok()
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(8760),
            static_dir: std::env::var("PULSE_STATIC_DIR")
                .ok()
                .or(fc.server.static_dir)
                .map(PathBuf::from),
        };

        let upstream = UpstreamConfig {
            api_key: std::env::var("GEMINI_API_KEY").ok().or(fc.upstream.api_key),
            model: std::env::var("PULSE_MODEL")
                .ok()
                .or(fc.upstream.model)
                .unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            base_url: std::env::var("PULSE_UPSTREAM_URL")
                .ok()
                .or(fc.upstream.base_url),
        };

        let voice_enabled = if disable_voice {
            false
        } else {
            fc.voice.enabled.unwrap_or(true)
        };
        let voice = VoiceConfig {
            enabled: voice_enabled,
            stt_model: std::env::var("PULSE_STT_MODEL")
                .ok()
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            tts_model: std::env::var("PULSE_TTS_MODEL")
                .ok()
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| "tts-1".to_string()),
            tts_voice: std::env::var("PULSE_TTS_VOICE")
                .ok()
                .or(fc.voice.tts_voice)
                .unwrap_or_else(|| "alloy".to_string()),
            tts_speed: fc.voice.tts_speed.unwrap_or(1.0),
            interim_results: fc.voice.interim_results.unwrap_or(true),
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .or(fc.voice.openai_api_key),
        };

        if disable_voice {
            tracing::info!("voice explicitly disabled via --disable-voice");
        }

        let limits = LimitsConfig {
            chat_per_minute: fc
                .limits
                .chat_per_minute
                .unwrap_or_else(|| LimitsConfig::default().chat_per_minute),
            vision_per_minute: fc
                .limits
                .vision_per_minute
                .unwrap_or_else(|| LimitsConfig::default().vision_per_minute),
            global_per_minute: fc.limits.global_per_minute,
        };

        Ok(Self {
            persona,
            server,
            upstream,
            voice,
            limits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_defaults_match_endpoint_quotas() {
        let limits = LimitsConfig::default();
        assert_eq!(limits.chat_per_minute, 30);
        assert_eq!(limits.vision_per_minute, 20);
        assert!(limits.global_per_minute.is_none());
    }

    #[test]
    fn load_applies_persona_override_and_voice_disable() {
        let config = Config::load(Some("Vega"), true).unwrap();
        assert_eq!(config.persona.name, "Vega");
        assert!(!config.voice.enabled);
        assert_eq!(config.limits.chat_per_minute, 30);
    }
}

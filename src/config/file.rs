//! TOML configuration file loading
//!
//! Supports `~/.config/pulse/config.toml` as a persistent config source.
//! All fields are optional — the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct PulseConfigFile {
    /// Assistant persona name
    #[serde(default)]
    pub persona: Option<String>,

    /// Upstream generative service configuration
    #[serde(default)]
    pub upstream: UpstreamFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Rate limit configuration
    #[serde(default)]
    pub limits: LimitsFileConfig,
}

/// Upstream generative service configuration
#[derive(Debug, Default, Deserialize)]
pub struct UpstreamFileConfig {
    /// Model identifier (e.g. "gemini-2.5-flash")
    pub model: Option<String>,

    /// API key (env `GEMINI_API_KEY` takes precedence)
    pub api_key: Option<String>,

    /// Base URL override for self-hosted proxies
    pub base_url: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable the local voice session
    pub enabled: Option<bool>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f64>,

    /// Emit interim transcripts while an utterance is in progress
    pub interim_results: Option<bool>,

    /// OpenAI API key for STT/TTS (env `OPENAI_API_KEY` takes precedence)
    pub openai_api_key: Option<String>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Static files directory for the web console
    pub static_dir: Option<String>,
}

/// Rate limit configuration
#[derive(Debug, Default, Deserialize)]
pub struct LimitsFileConfig {
    /// Per-caller chat requests per minute
    pub chat_per_minute: Option<u32>,

    /// Per-caller vision requests per minute
    pub vision_per_minute: Option<u32>,

    /// Optional process-wide requests per minute
    pub global_per_minute: Option<u32>,
}

/// Load the TOML config file from the standard path
///
/// Returns `PulseConfigFile::default()` if the file doesn't exist or can't be
/// parsed.
pub fn load_config_file() -> PulseConfigFile {
    let Some(path) = config_file_path() else {
        return PulseConfigFile::default();
    };

    if !path.exists() {
        return PulseConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                PulseConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            PulseConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/pulse/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("pulse").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_parses_to_defaults() {
        let parsed: PulseConfigFile = toml::from_str("").unwrap();
        assert!(parsed.persona.is_none());
        assert!(parsed.voice.enabled.is_none());
        assert!(parsed.limits.chat_per_minute.is_none());
    }

    #[test]
    fn partial_file_overlays_cleanly() {
        let parsed: PulseConfigFile = toml::from_str(
            r#"
            persona = "Vega"

            [voice]
            enabled = false
            tts_voice = "onyx"

            [limits]
            chat_per_minute = 10
            "#,
        )
        .unwrap();

        assert_eq!(parsed.persona.as_deref(), Some("Vega"));
        assert_eq!(parsed.voice.enabled, Some(false));
        assert_eq!(parsed.voice.tts_voice.as_deref(), Some("onyx"));
        assert_eq!(parsed.limits.chat_per_minute, Some(10));
        assert!(parsed.limits.global_per_minute.is_none());
    }
}

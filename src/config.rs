//! Configuration management for the Parley client

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::Result;

/// Parley client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat backend base URL
    pub backend_url: String,

    /// Per-request timeout for backend calls
    pub request_timeout: Duration,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Reveal pacing configuration
    pub reveal: RevealConfig,
}

/// Voice input/output configuration
#[derive(Debug, Clone, Default)]
pub struct VoiceConfig {
    /// Enable voice capture and playback
    pub enabled: bool,

    /// Default voice profile for synthesis (e.g. "qiniu_zh_male_ljfdxz")
    pub voice_profile: Option<String>,
}

/// Text reveal pacing
#[derive(Debug, Clone)]
pub struct RevealConfig {
    /// Delay per revealed character
    pub char_delay: Duration,

    /// Delay per revealed segment
    pub segment_delay: Duration,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            char_delay: Duration::from_millis(30),
            segment_delay: Duration::from_millis(500),
        }
    }
}

/// Shape of the optional TOML config file
#[derive(Debug, Default, Deserialize)]
pub struct ParleyConfigFile {
    /// Chat backend base URL
    pub backend_url: Option<String>,
    /// Per-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
    /// Default voice profile for synthesis
    pub voice_profile: Option<String>,
    /// Disable voice features
    pub disable_voice: Option<bool>,
    /// Milliseconds per revealed character
    pub reveal_char_ms: Option<u64>,
    /// Milliseconds per revealed segment
    pub reveal_segment_ms: Option<u64>,
}

/// Return the config file path: `~/.config/omni/parley/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("parley")
            .join("config.toml")
    })
}

/// Load the TOML config file from the standard path
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't
/// be parsed.
#[must_use]
pub fn load_config_file() -> ParleyConfigFile {
    let Some(path) = config_file_path() else {
        return ParleyConfigFile::default();
    };

    if !path.exists() {
        return ParleyConfigFile::default();
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
                ParleyConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ParleyConfigFile::default()
        }
    }
}

impl Config {
    /// Load configuration from environment variables layered over the
    /// optional config file
    ///
    /// # Errors
    ///
    /// Returns error if a value fails validation (e.g. a zero timeout)
    pub fn load() -> Result<Self> {
        Self::load_with_options(false)
    }

    /// Load configuration with explicit voice disable option
    ///
    /// # Errors
    ///
    /// Returns error if a value fails validation
    pub fn load_with_options(disable_voice: bool) -> Result<Self> {
        let file = load_config_file();

        let backend_url = std::env::var("PARLEY_BACKEND_URL")
            .ok()
            .or(file.backend_url)
            .unwrap_or_else(|| "http://localhost:8080".to_string());

        let timeout_secs = std::env::var("PARLEY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .or(file.request_timeout_secs)
            .unwrap_or(30);
        if timeout_secs == 0 {
            return Err(crate::Error::Config(
                "request timeout must be non-zero".to_string(),
            ));
        }

        let voice_disabled = disable_voice
            || std::env::var("PARLEY_DISABLE_VOICE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
            || file.disable_voice.unwrap_or(false);

        let voice = VoiceConfig {
            enabled: !voice_disabled,
            voice_profile: std::env::var("PARLEY_VOICE_PROFILE")
                .ok()
                .or(file.voice_profile),
        };

        if voice_disabled {
            tracing::info!("voice disabled");
        }

        let reveal_defaults = RevealConfig::default();
        let reveal = RevealConfig {
            char_delay: std::env::var("PARLEY_REVEAL_CHAR_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(file.reveal_char_ms)
                .map_or(reveal_defaults.char_delay, Duration::from_millis),
            segment_delay: std::env::var("PARLEY_REVEAL_SEGMENT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(file.reveal_segment_ms)
                .map_or(reveal_defaults.segment_delay, Duration::from_millis),
        };

        Ok(Self {
            backend_url,
            request_timeout: Duration::from_secs(timeout_secs),
            voice,
            reveal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_parses_partial_toml() {
        let parsed: ParleyConfigFile =
            toml::from_str("backend_url = \"http://example.test\"\nreveal_char_ms = 10\n")
                .unwrap();
        assert_eq!(parsed.backend_url.as_deref(), Some("http://example.test"));
        assert_eq!(parsed.reveal_char_ms, Some(10));
        assert!(parsed.voice_profile.is_none());
    }

    #[test]
    fn config_file_defaults_on_empty() {
        let parsed: ParleyConfigFile = toml::from_str("").unwrap();
        assert!(parsed.backend_url.is_none());
        assert!(parsed.disable_voice.is_none());
    }

    #[test]
    fn reveal_defaults() {
        let reveal = RevealConfig::default();
        assert_eq!(reveal.char_delay, Duration::from_millis(30));
        assert_eq!(reveal.segment_delay, Duration::from_millis(500));
    }
}

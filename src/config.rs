//! Configuration types for a voice session.
//!
//! The core never reads these from disk on its own. The host loads a
//! [`SessionConfig`] (usually via [`SessionConfig::from_file`]) and hands it
//! to [`crate::VoiceSession::new`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Endpoint for the bidirectional live agent API.
pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native-audio model used for live sessions.
pub const DEFAULT_LIVE_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-12-2025";

/// Top-level configuration for a voice session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Audio capture/playback settings.
    pub audio: AudioConfig,
    /// Remote agent connection settings.
    pub transport: TransportConfig,
    /// Default persona settings.
    pub persona: PersonaConfig,
    /// Tool dispatch settings.
    pub dispatch: DispatchConfig,
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate of PCM sent to the agent, in Hz.
    pub input_sample_rate: u32,
    /// Rate of PCM received from the agent, in Hz.
    pub output_sample_rate: u32,
    /// Frames per capture block. One outbound chunk is produced per block.
    pub capture_block_size: usize,
    /// Outbound audio chunks that may wait for the socket before new
    /// chunks are dropped.
    pub outbound_queue_chunks: usize,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            capture_block_size: 4096,
            outbound_queue_chunks: 32,
            input_device: None,
            output_device: None,
        }
    }
}

/// Remote agent connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket endpoint of the live API.
    pub endpoint: String,
    /// Model identifier sent in the setup message.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// How long to wait for the agent to acknowledge setup.
    pub setup_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LIVE_ENDPOINT.to_owned(),
            model: DEFAULT_LIVE_MODEL.to_owned(),
            api_key_env: "GEMINI_API_KEY".to_owned(),
            setup_timeout_ms: 10_000,
        }
    }
}

/// Persona defaults used when the host does not pick a voice at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    /// Prebuilt voice name.
    pub voice_name: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            voice_name: "Zephyr".to_owned(),
        }
    }
}

/// Tool dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Result sent when the handler completes without returning text.
    pub default_result: String,
    /// Result sent when the handler fails or panics.
    pub failure_result: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_result: "Action complete.".to_owned(),
            failure_result: "The action could not be completed.".to_owned(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::SessionError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::SessionError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path, e.g. `~/.config/care-voice/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("care-voice")
            .join("config.toml")
    }
}

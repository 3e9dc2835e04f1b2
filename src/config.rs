//! Configuration management for voice-chat.
//!
//! Loads config from YAML files in standard locations. Every section
//! falls back to its defaults, so a partial file is always valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable consulted for the API key when the config has none.
pub const DEFAULT_API_KEY_ENV: &str = "COHERE_API_KEY";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub host: String,
    pub model: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
    /// Request timeout. None waits as long as the HTTP stack does.
    pub timeout_secs: Option<u64>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            host: "https://api.cohere.com".into(),
            model: "command-r-plus-08-2024".into(),
            api_key: None,
            api_key_env: DEFAULT_API_KEY_ENV.into(),
            timeout_secs: None,
        }
    }
}

impl ChatConfig {
    /// Resolve the credential: config value, then runtime env, then the
    /// value baked in at build time.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                std::env::var(&self.api_key_env)
                    .ok()
                    .filter(|k| !k.trim().is_empty())
            })
            .or_else(|| option_env!("VOICE_CHAT_API_KEY").map(String::from))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RevealConfig {
    pub interval_ms: u64,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self { interval_ms: 50 }
    }
}

impl RevealConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub enabled: bool,
    pub model: String,
    pub language: String,
    /// Write each captured utterance here as WAV.
    pub save_wav: Option<PathBuf>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "base.en".into(),
            language: "en".into(),
            save_wav: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_size: u32,
    pub max_duration: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 1024,
            max_duration: 120.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SilenceConfig {
    pub threshold: f32,
    pub duration: f64,
    pub min_speech_duration: f64,
    pub max_recording_duration: f64,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            duration: 1.5,
            min_speech_duration: 0.5,
            max_recording_duration: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisBackend {
    Command,
    Kokoro,
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub backend: SynthesisBackend,
    /// Program and leading args for the command backend; the text is appended.
    pub command: Vec<String>,
    pub voice: String,
    pub speed: f32,
    pub model_path: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            backend: SynthesisBackend::Command,
            command: vec!["spd-say".into(), "--wait".into()],
            voice: "af_heart".into(),
            speed: 1.0,
            model_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub frame_interval_ms: u64,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 50,
        }
    }
}

impl UiConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(10))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn file_path(&self) -> PathBuf {
        self.file.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("voice-chat/voice-chat.log")
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chat: ChatConfig,
    pub reveal: RevealConfig,
    pub recognition: RecognitionConfig,
    pub audio: AudioConfig,
    pub silence: SilenceConfig,
    pub synthesis: SynthesisConfig,
    pub ui: UiConfig,
    pub logging: LoggingConfig,
}

/// Where [`Config::load`] got its values from. Loading runs before the
/// log subscriber exists, so the caller logs this afterwards.
#[derive(Debug)]
pub enum ConfigOrigin {
    Defaults,
    File(PathBuf),
    /// The file was found but unusable; defaults apply.
    Fallback { path: PathBuf, error: String },
}

impl ConfigOrigin {
    pub fn log(&self) {
        match self {
            Self::Defaults => info!("No config file found, using defaults"),
            Self::File(path) => info!("Loaded config from {}", path.display()),
            Self::Fallback { path, error } => {
                warn!("Failed to load {}: {error}, using defaults", path.display())
            }
        }
    }
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/voice-chat/config.yaml
    /// 3. /etc/voice-chat/config.yaml
    pub fn load(path: Option<&Path>) -> (Self, ConfigOrigin) {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/voice-chat/config.yaml")),
                Some(PathBuf::from("/etc/voice-chat/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(path) = resolved else {
            return (Self::default(), ConfigOrigin::Defaults);
        };

        let loaded = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|contents| Self::from_yaml(&contents).map_err(|e| e.to_string()));
        match loaded {
            Ok(config) => (config, ConfigOrigin::File(path)),
            Err(error) => (Self::default(), ConfigOrigin::Fallback { path, error }),
        }
    }

    pub fn from_yaml(contents: &str) -> crate::Result<Self> {
        serde_yml::from_str(contents).map_err(|e| crate::Error::Config(e.to_string()))
    }
}

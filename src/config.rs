//! Runtime configuration, read from the environment after `.env` loading.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Bounds for the video poll loop. `interval * max_attempts` is the longest a
/// caller waits before the client gives up watching a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 60,
        }
    }
}

impl PollConfig {
    /// Overrides from the environment; missing or zero values keep the default.
    pub fn with_overrides(interval_secs: Option<u64>, max_attempts: Option<u32>) -> Self {
        let defaults = Self::default();
        Self {
            interval: interval_secs
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            max_attempts: max_attempts.filter(|n| *n > 0).unwrap_or(defaults.max_attempts),
        }
    }

    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Model identifiers per call class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Models {
    pub image: String,
    pub text: String,
    pub video: String,
    pub tts: String,
}

impl Default for Models {
    fn default() -> Self {
        Self {
            image: "gemini-2.5-flash-image".to_string(),
            text: "gemini-2.5-flash".to_string(),
            video: "veo-3.1-fast-generate-preview".to_string(),
            tts: "gemini-2.5-flash-preview-tts".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StudioConfig {
    pub port: u16,
    pub api_base: String,
    /// Name of the variable holding the environment default key. Read lazily
    /// on every resolution.
    pub api_key_var: String,
    pub credential_file: PathBuf,
    pub poll: PollConfig,
    pub models: Models,
    pub tts_voice: String,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key_var: "GEMINI_API_KEY".to_string(),
            credential_file: PathBuf::from(".adstudio/credentials.json"),
            poll: PollConfig::default(),
            models: Models::default(),
            tts_voice: "Kore".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl StudioConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let models = Models {
            image: std::env::var("IMAGE_MODEL").unwrap_or(defaults.models.image),
            text: std::env::var("TEXT_MODEL").unwrap_or(defaults.models.text),
            video: std::env::var("VIDEO_MODEL").unwrap_or(defaults.models.video),
            tts: std::env::var("TTS_MODEL").unwrap_or(defaults.models.tts),
        };
        Self {
            port: env_parse("PORT").unwrap_or(defaults.port),
            api_base: std::env::var("GEMINI_API_BASE").unwrap_or(defaults.api_base),
            api_key_var: defaults.api_key_var,
            credential_file: std::env::var("ADSTUDIO_CREDENTIAL_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.credential_file),
            poll: PollConfig::with_overrides(
                env_parse("VIDEO_POLL_INTERVAL_SECS"),
                env_parse("VIDEO_POLL_MAX_ATTEMPTS"),
            ),
            models,
            tts_voice: std::env::var("TTS_VOICE").unwrap_or(defaults.tts_voice),
        }
    }
}

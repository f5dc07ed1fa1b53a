use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub audio: AudioConfig,
    pub recording: RecordingConfig,
    pub transcription: TranscriptionConfig,
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for session data and recordings.
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interval between level samples during capture, in milliseconds.
    pub level_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Preparation countdown length, in seconds.
    pub preparation_secs: u64,
    /// Countdown elapsed before the skip affordance appears, in seconds.
    pub skip_threshold_secs: u64,
    /// Recording elapsed before manual stop is allowed, in seconds.
    pub stop_threshold_secs: u64,
    /// Hard recording ceiling, in seconds.
    pub max_recording_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub enabled: bool,
    /// Maximum length of one recognizer segment, in seconds.
    pub segment_ceiling_secs: u64,
    /// Safety timeout for the whole transcription pass, in seconds.
    pub safety_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Stable per-install identifier sent with every request.
    pub device_id: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
            level_interval_ms: 50,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            preparation_secs: 60,
            skip_threshold_secs: 10,
            stop_threshold_secs: 60,
            max_recording_secs: 120,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            segment_ceiling_secs: 55,
            safety_timeout_secs: 100,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.example.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 45,
            device_id: String::new(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

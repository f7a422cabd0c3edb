//! Configuration: one explicit section per component, loaded from TOML.
//!
//! ```toml
//! [executables]
//! sclang = "/usr/bin/sclang"
//!
//! [render]
//! timeout_secs = 10
//! sample_format = "int24"
//!
//! [bot]
//! screen_name = "sc2sbot"
//! own_id = "1234"
//! dedup = "replace"
//! ```

use crate::error::SetupError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Full config file. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub executables: ExecutableConfig,
    pub render: RenderConfig,
    pub bot: BotConfig,
}

/// Paths of the external programs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutableConfig {
    pub sclang: String,
    pub scsynth: String,
    pub ffmpeg: String,
}

impl Default for ExecutableConfig {
    fn default() -> Self {
        Self {
            sclang: "sclang".to_string(),
            scsynth: "scsynth".to_string(),
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

impl ExecutableConfig {
    /// Apply `SCLANG_PATH`, `SCSYNTH_PATH` and `FFMPEG_PATH` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(p) = std::env::var("SCLANG_PATH") {
            self.sclang = p;
        }
        if let Ok(p) = std::env::var("SCSYNTH_PATH") {
            self.scsynth = p;
        }
        if let Ok(p) = std::env::var("FFMPEG_PATH") {
            self.ffmpeg = p;
        }
        self
    }
}

/// Container format passed to scsynth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum HeaderFormat {
    #[serde(rename = "AIFF", alias = "aiff")]
    Aiff,
    #[serde(rename = "WAV", alias = "wav")]
    Wav,
    #[serde(rename = "NeXT", alias = "next")]
    Next,
    #[serde(rename = "IRCAM", alias = "ircam")]
    Ircam,
    #[serde(rename = "raw")]
    Raw,
}

impl HeaderFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaderFormat::Aiff => "AIFF",
            HeaderFormat::Wav => "WAV",
            HeaderFormat::Next => "NeXT",
            HeaderFormat::Ircam => "IRCAM",
            HeaderFormat::Raw => "raw",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            HeaderFormat::Aiff => "aiff",
            HeaderFormat::Wav => "wav",
            HeaderFormat::Next => "au",
            HeaderFormat::Ircam => "sf",
            HeaderFormat::Raw => "raw",
        }
    }
}

/// Sample encoding passed to scsynth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    Int8,
    Int16,
    Int24,
    Int32,
    Float,
    Double,
    Mulaw,
    Alaw,
}

impl SampleFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleFormat::Int8 => "int8",
            SampleFormat::Int16 => "int16",
            SampleFormat::Int24 => "int24",
            SampleFormat::Int32 => "int32",
            SampleFormat::Float => "float",
            SampleFormat::Double => "double",
            SampleFormat::Mulaw => "mulaw",
            SampleFormat::Alaw => "alaw",
        }
    }
}

/// Renderer settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Ceiling for the interpreter stage. The encode stage is never bounded.
    pub timeout_secs: f64,
    /// Length of the rendered score in seconds.
    pub duration: f32,
    pub sample_rate: u32,
    pub header_format: HeaderFormat,
    pub sample_format: SampleFormat,
    pub channels: u16,
    /// Scores smaller than this are treated as a failed interpreter run.
    pub min_score_bytes: u64,
    /// Script template override; the bundled one is used when unset.
    pub blueprint: Option<PathBuf>,
    /// Where temporary scripts, scores and audio go; system temp dir when unset.
    pub work_dir: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10.0,
            duration: 10.0,
            sample_rate: 48_000,
            header_format: HeaderFormat::Wav,
            sample_format: SampleFormat::Int24,
            channels: 1,
            min_score_bytes: 5,
            blueprint: None,
            work_dir: None,
        }
    }
}

impl RenderConfig {
    /// Interpreter ceiling. Values [`RenderConfig::validate`] rejects read as zero.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::ZERO)
    }

    /// Reject a timeout `Duration` cannot hold and a non-positive score length.
    pub fn validate(&self) -> Result<(), SetupError> {
        if let Err(e) = Duration::try_from_secs_f64(self.timeout_secs) {
            return Err(SetupError::InvalidValue {
                field: "render.timeout_secs",
                detail: format!("{}: {e}", self.timeout_secs),
            });
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(SetupError::InvalidValue {
                field: "render.duration",
                detail: format!("{} is not a positive number of seconds", self.duration),
            });
        }
        Ok(())
    }
}

/// How the polling ingestor updates its seen-id set after a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupPolicy {
    /// Overwrite with the ids of the latest fetch. An id that drops out of the
    /// fetch window and comes back is dispatched again; an id never fetched
    /// alongside the previous window is never remembered.
    #[default]
    Replace,
    /// Accumulate every id ever fetched.
    Union,
}

/// Ingestion and reply settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BotConfig {
    pub screen_name: String,
    pub own_id: String,
    pub poll_interval_secs: u64,
    pub dedup: DedupPolicy,
    /// Streaming dispatch threads.
    pub workers: usize,
    /// Streaming records that may wait for a worker before new ones are rejected.
    pub queue_capacity: usize,
    /// Still image muxed under the audio.
    pub cover_image: PathBuf,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            screen_name: "sc2sbot".to_string(),
            own_id: String::new(),
            poll_interval_secs: 5 * 60,
            dedup: DedupPolicy::Replace,
            workers: 4,
            queue_capacity: 16,
            cover_image: PathBuf::from("sc.png"),
        }
    }
}

impl BotConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self, SetupError> {
        let config: Self = toml::from_str(s)?;
        config.render.validate()?;
        Ok(config)
    }

    pub fn load_path(path: &Path) -> Result<Self, SetupError> {
        let s = std::fs::read_to_string(path).map_err(|source| SetupError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&s)
    }
}

//! Error taxonomy: fatal setup errors, and the per-render tagged result.

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Construction-time failure. The bot does not start.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("could not start {program}: {source} (check the path or install SuperCollider)")]
    MissingExecutable {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("health check `{program} {flag}` failed: {detail}")]
    HealthCheck {
        program: String,
        flag: String,
        detail: String,
    },
    #[error("could not read template {path:?}: {source}")]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid script template: {0}")]
    Template(String),
    #[error("could not read config {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),
    #[error("invalid {field}: {detail}")]
    InvalidValue { field: &'static str, detail: String },
}

/// Failure of a run-to-completion invocation.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("could not spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// Non-zero exit. Authoritative for encode-class processes.
    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: ExitStatus,
        /// Last lines of the process' stderr.
        stderr: String,
    },
}

/// Outcome of a render when it did not produce a final artifact.
///
/// `Invalid` and `ProcessFailure` together form the conversion-error class:
/// the offending definition is skipped and ingestion continues. `Spawn` and
/// `Io` are systemic and propagate.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("could not convert {code} to OSC - syntax error?")]
    Invalid { code: String },
    #[error("failed to convert {score:?} to {output:?}: {detail}")]
    ProcessFailure {
        score: PathBuf,
        output: PathBuf,
        detail: String,
    },
    #[error("could not spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// True for errors that only concern the submitted definition.
    pub fn is_conversion(&self) -> bool {
        matches!(self, RenderError::Invalid { .. } | RenderError::ProcessFailure { .. })
    }
}

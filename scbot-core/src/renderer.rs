//! SuperCollider rendering: definition -> OSC score (sclang) -> audio file (scsynth).

use crate::config::{ExecutableConfig, HeaderFormat, RenderConfig, SampleFormat};
use crate::error::{ProcessError, RenderError, SetupError};
use crate::supervisor::{probe, run_to_completion, run_with_timeout};
use crate::template::ScriptTemplate;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info, warn};

/// One render call's parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub code: String,
    pub duration: f32,
    pub sample_rate: u32,
    pub header_format: HeaderFormat,
    pub sample_format: SampleFormat,
    pub channels: u16,
    pub render_timeout: Duration,
}

impl SynthesisRequest {
    pub fn new(code: impl Into<String>, config: &RenderConfig) -> Self {
        Self {
            code: code.into(),
            duration: config.duration,
            sample_rate: config.sample_rate,
            header_format: config.header_format,
            sample_format: config.sample_format,
            channels: config.channels,
            render_timeout: config.timeout(),
        }
    }

    /// Positional arguments for `scsynth -N`, in the order scsynth expects.
    pub fn encode_args(&self, score: &Path, output: &Path) -> Vec<String> {
        vec![
            "-N".to_string(),
            score.to_string_lossy().into_owned(),
            "_".to_string(),
            output.to_string_lossy().into_owned(),
            self.sample_rate.to_string(),
            self.header_format.as_str().to_string(),
            self.sample_format.as_str().to_string(),
            "-o".to_string(),
            self.channels.to_string(),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Intermediate,
    Final,
}

#[derive(Debug)]
enum ArtifactFile {
    /// Removed when the artifact is dropped.
    Temp(TempPath),
    Kept(PathBuf),
}

/// A file produced by one of the two stages, owned by whoever holds it.
#[derive(Debug)]
pub struct RenderArtifact {
    file: ArtifactFile,
    byte_size: u64,
    stage: Stage,
}

impl RenderArtifact {
    /// Wrap an existing file. It is not removed on drop.
    pub fn from_path(path: impl Into<PathBuf>, stage: Stage) -> std::io::Result<Self> {
        let path = path.into();
        let byte_size = std::fs::metadata(&path)?.len();
        Ok(Self {
            file: ArtifactFile::Kept(path),
            byte_size,
            stage,
        })
    }

    pub fn path(&self) -> &Path {
        match &self.file {
            ArtifactFile::Temp(p) => &**p,
            ArtifactFile::Kept(p) => p.as_path(),
        }
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move a temporary artifact to `dest` so it outlives this value.
    pub fn persist(self, dest: &Path) -> std::io::Result<PathBuf> {
        match self.file {
            ArtifactFile::Temp(tmp) => {
                if let Err(e) = tmp.persist(dest) {
                    // rename fails across filesystems
                    std::fs::copy(&e.path, dest)?;
                }
            }
            ArtifactFile::Kept(path) => {
                if path != dest {
                    std::fs::copy(&path, dest)?;
                }
            }
        }
        Ok(dest.to_path_buf())
    }
}

/// Something that turns a definition into a final audio artifact.
pub trait Render: Send + Sync {
    fn render_code(&self, code: &str) -> Result<RenderArtifact, RenderError>;
}

pub struct SynthRenderer {
    executables: ExecutableConfig,
    config: RenderConfig,
    template: ScriptTemplate,
}

impl SynthRenderer {
    /// Check that sclang and scsynth answer a basic invocation, then load the template.
    pub fn new(executables: ExecutableConfig, config: RenderConfig) -> Result<Self, SetupError> {
        config.validate()?;
        probe(&executables.sclang, "-h")?;
        probe(&executables.scsynth, "-v")?;
        Self::without_probe(executables, config)
    }

    /// Like [`SynthRenderer::new`] but trusts the executable paths.
    pub fn without_probe(executables: ExecutableConfig, config: RenderConfig) -> Result<Self, SetupError> {
        config.validate()?;
        let template = match &config.blueprint {
            Some(path) => ScriptTemplate::load(path)?,
            None => ScriptTemplate::bundled(),
        };
        Ok(Self {
            executables,
            config,
            template,
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn request(&self, code: impl Into<String>) -> SynthesisRequest {
        SynthesisRequest::new(code, &self.config)
    }

    /// Render into a temporary file that is removed when the artifact is dropped.
    pub fn render(&self, request: &SynthesisRequest) -> Result<RenderArtifact, RenderError> {
        let output = self
            .temp_file(&format!(".{}", request.header_format.extension()))?
            .into_temp_path();
        let score = self.compile_score(request)?;
        let byte_size = self.encode(request, &score, &output)?;
        Ok(RenderArtifact {
            file: ArtifactFile::Temp(output),
            byte_size,
            stage: Stage::Final,
        })
    }

    /// Render straight to `dest`. A failed encode leaves no file at `dest`.
    pub fn render_to(&self, request: &SynthesisRequest, dest: &Path) -> Result<RenderArtifact, RenderError> {
        let score = self.compile_score(request)?;
        let byte_size = match self.encode(request, &score, dest) {
            Ok(n) => n,
            Err(e) => {
                if let RenderError::ProcessFailure { .. } = e {
                    if let Err(rm) = std::fs::remove_file(dest) {
                        if rm.kind() != std::io::ErrorKind::NotFound {
                            warn!(dest = %dest.display(), error = %rm, "could not remove failed output");
                        }
                    }
                }
                return Err(e);
            }
        };
        Ok(RenderArtifact {
            file: ArtifactFile::Kept(dest.to_path_buf()),
            byte_size,
            stage: Stage::Final,
        })
    }

    /// Stage 1: run sclang on the instantiated template and validate the score it leaves behind.
    ///
    /// sclang's exit code says nothing about syntax errors, and it sometimes
    /// stays alive waiting on stdin, so the only signal is the size of the score.
    pub fn compile_score(&self, request: &SynthesisRequest) -> Result<RenderArtifact, RenderError> {
        let score = self.temp_file(".osc")?.into_temp_path();
        let script_text = self.template.instantiate(&score, &request.code, request.duration);

        let mut script = self.temp_file(".scd")?;
        script.write_all(script_text.as_bytes())?;
        script.flush()?;
        let script = script.into_temp_path();
        debug!(script = %script.display(), "wrote sclang script");

        debug!(code = %request.code, "starting conversion to OSC");
        let run = run_with_timeout(&self.executables.sclang, [&*script], request.render_timeout).map_err(|source| {
            RenderError::Spawn {
                program: self.executables.sclang.clone(),
                source,
            }
        })?;
        if run.timed_out() {
            debug!("sclang did not report its exit, checking the score anyway");
        }

        let byte_size = std::fs::metadata(&score).map(|m| m.len()).unwrap_or(0);
        if byte_size < self.config.min_score_bytes {
            return Err(RenderError::Invalid {
                code: request.code.clone(),
            });
        }
        debug!(score = %score.display(), byte_size, "score written");
        Ok(RenderArtifact {
            file: ArtifactFile::Temp(score),
            byte_size,
            stage: Stage::Intermediate,
        })
    }

    /// Stage 2: scsynth in non-realtime mode. Blocks until scsynth exits.
    fn encode(&self, request: &SynthesisRequest, score: &RenderArtifact, output: &Path) -> Result<u64, RenderError> {
        let started = Instant::now();
        info!(score = %score.path().display(), output = %output.display(), "start converting score to audio");
        let failure = |detail: String| RenderError::ProcessFailure {
            score: score.path().to_path_buf(),
            output: output.to_path_buf(),
            detail,
        };
        match run_to_completion(&self.executables.scsynth, request.encode_args(score.path(), output)) {
            Ok(_) => {}
            Err(ProcessError::Spawn { program, source }) => return Err(RenderError::Spawn { program, source }),
            Err(e @ ProcessError::Exit { .. }) => return Err(failure(e.to_string())),
        }

        let byte_size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
        if byte_size == 0 {
            return Err(failure("scsynth produced no audio".to_string()));
        }
        if request.header_format == HeaderFormat::Wav {
            log_wav_summary(output);
        }
        info!(
            output = %output.display(),
            byte_size,
            seconds = started.elapsed().as_secs(),
            "converted score to audio"
        );
        Ok(byte_size)
    }

    fn temp_file(&self, suffix: &str) -> std::io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("scbot-").suffix(suffix);
        match &self.config.work_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }
}

impl Render for SynthRenderer {
    fn render_code(&self, code: &str) -> Result<RenderArtifact, RenderError> {
        self.render(&self.request(code))
    }
}

fn log_wav_summary(path: &Path) {
    match hound::WavReader::open(path) {
        Ok(reader) => {
            let spec = reader.spec();
            let seconds = reader.duration() as f32 / spec.sample_rate.max(1) as f32;
            debug!(
                sample_rate = spec.sample_rate,
                channels = spec.channels,
                bits = spec.bits_per_sample,
                seconds,
                "rendered wav"
            );
        }
        Err(e) => warn!(path = %path.display(), error = %e, "could not read back rendered wav"),
    }
}

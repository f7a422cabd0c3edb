//! Seams to the outside world: where mentions come from, where replies go,
//! and how audio becomes a postable video.

use crate::error::ProcessError;
use crate::mention::{MentionId, MentionRecord};
use crate::supervisor::run_to_completion;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Polling mention source. Returns the current window of mentions, newest first
/// or oldest first as the platform orders them; the order is preserved.
pub trait MentionSource {
    fn fetch_mentions(&mut self) -> anyhow::Result<Vec<MentionRecord>>;

    /// Release any persistent connection. Called once when ingestion stops.
    fn disconnect(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Filter rules of a push stream.
pub trait StreamRules {
    fn delete_all_rules(&mut self) -> anyhow::Result<()>;
    fn add_rule(&mut self, rule: &str) -> anyhow::Result<()>;
}

/// Handle of uploaded media, as returned by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaId(pub String);

/// Media upload and reply posting.
pub trait Publisher: Send + Sync {
    fn upload_media(&self, video: &Path) -> anyhow::Result<MediaId>;
    fn reply(&self, in_reply_to: &MentionId, text: &str, media: &MediaId) -> anyhow::Result<()>;
}

/// Combines a still image and rendered audio into a video.
pub trait VideoMuxer: Send + Sync {
    fn mux(&self, audio: &Path, video: &Path) -> Result<(), ProcessError>;
}

/// [`VideoMuxer`] backed by ffmpeg. Runs to completion; exit code is authoritative.
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    program: String,
    cover_image: PathBuf,
}

impl FfmpegMuxer {
    pub fn new(program: impl Into<String>, cover_image: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cover_image: cover_image.into(),
        }
    }

    pub fn args(&self, audio: &Path, video: &Path) -> Vec<String> {
        let mut args: Vec<String> = ["-loop", "1", "-y", "-i"].iter().map(|s| s.to_string()).collect();
        args.push(self.cover_image.to_string_lossy().into_owned());
        args.push("-i".to_string());
        args.push(audio.to_string_lossy().into_owned());
        args.extend(
            [
                "-shortest", "-c:v", "libx264", "-pix_fmt", "yuv420p", "-r", "30", "-acodec", "aac", "-ar",
                "44100", "-ac", "2",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(video.to_string_lossy().into_owned());
        args
    }
}

impl VideoMuxer for FfmpegMuxer {
    fn mux(&self, audio: &Path, video: &Path) -> Result<(), ProcessError> {
        run_to_completion(&self.program, self.args(audio, video))?;
        debug!(audio = %audio.display(), video = %video.display(), "muxed video");
        Ok(())
    }
}

//! Publisher that drops videos and reply documents into a directory.

use anyhow::Context;
use scbot_core::{MediaId, MentionId, Publisher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Reply document written as `reply-<id>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxReply {
    pub in_reply_to: MentionId,
    pub text: String,
    pub media: String,
}

pub struct OutboxPublisher {
    dir: PathBuf,
}

impl OutboxPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn reply_path(&self, id: &MentionId) -> PathBuf {
        self.dir.join(format!("reply-{id}.json"))
    }
}

impl Publisher for OutboxPublisher {
    /// Copy under a fresh `media-*.mp4` name. Existing media are never overwritten.
    fn upload_media(&self, video: &Path) -> anyhow::Result<MediaId> {
        let mut src = std::fs::File::open(video).with_context(|| format!("open {}", video.display()))?;
        let mut media = tempfile::Builder::new()
            .prefix("media-")
            .suffix(".mp4")
            .tempfile_in(&self.dir)
            .with_context(|| format!("create media file in {}", self.dir.display()))?;
        std::io::copy(&mut src, &mut media).with_context(|| format!("copy {} to outbox", video.display()))?;
        let (_, path) = media.keep()?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("media path {} has no file name", path.display()))?;
        Ok(MediaId(name))
    }

    fn reply(&self, in_reply_to: &MentionId, text: &str, media: &MediaId) -> anyhow::Result<()> {
        let doc = OutboxReply {
            in_reply_to: in_reply_to.clone(),
            text: text.to_string(),
            media: media.0.clone(),
        };
        let path = self.reply_path(in_reply_to);
        std::fs::write(&path, serde_json::to_vec_pretty(&doc)?)?;
        info!(path = %path.display(), "reply written to outbox");
        Ok(())
    }
}

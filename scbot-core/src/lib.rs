//! scbot core: process supervision, SuperCollider rendering, mention ingestion.

pub mod collab;
pub mod config;
pub mod error;
pub mod ingest;
pub mod mention;
pub mod renderer;
pub mod supervisor;
pub mod template;
pub mod text;

pub use collab::{FfmpegMuxer, MediaId, MentionSource, Publisher, StreamRules, VideoMuxer};
pub use config::{BotConfig, Config, DedupPolicy, ExecutableConfig, HeaderFormat, RenderConfig, SampleFormat};
pub use error::{ProcessError, RenderError, SetupError};
pub use ingest::{
    install_mention_rule, CycleReport, Delivery, DeliveryError, DispatchOutcome, Dispatcher, PollingIngestor,
    SeenIds, Shutdown, StreamIngestor, StreamStats,
};
pub use mention::{compose_reply, BotIdentity, MentionId, MentionRecord, UrlEntity, UserId};
pub use renderer::{Render, RenderArtifact, Stage, SynthRenderer, SynthesisRequest};
pub use supervisor::{run_to_completion, run_with_timeout, Supervised};
pub use template::ScriptTemplate;
pub use text::{filter, reconstruct, Sanitizer};

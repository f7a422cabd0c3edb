//! scbot daemon: answers mentions with rendered SuperCollider videos, either by
//! polling a JSON feed or by accepting pushed mentions over HTTP.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use scbot_core::{
    install_mention_rule, BotIdentity, Dispatcher, FfmpegMuxer, PollingIngestor, Shutdown, StreamIngestor,
    SynthRenderer,
};
use scbot_daemon::{build_app, AppState, DaemonConfig, JsonFeedSource, MemoryRules, OutboxPublisher};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "scbot-daemon", version, about)]
struct Cli {
    /// TOML config; built-in defaults when omitted.
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Poll a JSON feed of mentions.
    Poll {
        /// Overrides `source.feed_url`.
        #[arg(long)]
        feed: Option<String>,
    },
    /// Accept mentions pushed to `POST /mentions`.
    Stream {
        /// Overrides `server.listen`.
        #[arg(long)]
        listen: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(p) => DaemonConfig::load_path(p)?,
        None => DaemonConfig::default(),
    };
    config.core.executables = config.core.executables.clone().with_env_overrides();

    let renderer = SynthRenderer::new(config.core.executables.clone(), config.core.render.clone())?;
    let identity = BotIdentity::new(config.core.bot.screen_name.clone(), config.core.bot.own_id.as_str());
    let publisher = OutboxPublisher::new(&config.outbox.dir)
        .with_context(|| format!("create outbox {}", config.outbox.dir.display()))?;
    let muxer = FfmpegMuxer::new(config.core.executables.ffmpeg.clone(), config.core.bot.cover_image.clone());
    let mut dispatcher = Dispatcher::new(&identity, Arc::new(renderer), Arc::new(muxer), Arc::new(publisher));
    if let Some(dir) = &config.core.render.work_dir {
        dispatcher = dispatcher.with_work_dir(dir.clone());
    }
    let dispatcher = Arc::new(dispatcher);
    info!(screen_name = %identity.screen_name, own_id = %identity.own_id, "bot identity");

    match cli.mode {
        Mode::Poll { feed } => run_poll(&config, feed, dispatcher).await,
        Mode::Stream { listen } => run_stream(&config, listen, identity, dispatcher).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("debug,hyper=info,tower_http=info")
        } else {
            EnvFilter::new("info")
        }
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}

async fn run_poll(config: &DaemonConfig, feed: Option<String>, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let Some(url) = feed.or_else(|| config.source.feed_url.clone()) else {
        bail!("poll mode needs --feed or source.feed_url");
    };
    info!(%url, interval_secs = config.core.bot.poll_interval_secs, "polling mentions");
    let source = JsonFeedSource::new(url, config.source.timeout());
    let mut ingestor = PollingIngestor::new(
        source,
        dispatcher,
        config.core.bot.dedup,
        config.core.bot.poll_interval(),
    );

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            trigger.trigger();
        }
    });
    tokio::task::spawn_blocking(move || ingestor.run(&shutdown)).await?
}

async fn run_stream(
    config: &DaemonConfig,
    listen: Option<String>,
    identity: BotIdentity,
    dispatcher: Arc<Dispatcher>,
) -> anyhow::Result<()> {
    let bot = &config.core.bot;
    if !identity.knows_own_id() {
        warn!(
            screen_name = %identity.screen_name,
            "bot.own_id is empty, the bot's own posts will not be filtered from the stream"
        );
    }
    let stream = Arc::new(StreamIngestor::start(
        identity.clone(),
        dispatcher,
        bot.workers,
        bot.queue_capacity,
    )?);
    let mut rules = MemoryRules::default();
    install_mention_rule(&mut rules, &identity)?;

    let app = build_app(AppState {
        identity,
        stream: Arc::clone(&stream),
        rules,
    });
    let addr = listen.unwrap_or_else(|| config.server.listen.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening for pushed mentions");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("interrupt received, draining dispatch queue");
        })
        .await?;

    // in-flight dispatches run to completion
    match Arc::try_unwrap(stream) {
        Ok(stream) => {
            if let Err(e) = tokio::task::spawn_blocking(move || stream.shutdown()).await {
                error!(error = %e, "dispatch pool did not shut down cleanly");
            }
        }
        Err(_) => warn!("dispatch pool still referenced, leaving workers detached"),
    }
    Ok(())
}

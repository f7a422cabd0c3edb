//! scbot CLI: render a SuperCollider snippet to audio, check the toolchain,
//! or show what the bot would render for a mention text.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use scbot_core::supervisor::probe;
use scbot_core::{Config, RenderError, Sanitizer, SynthRenderer, UrlEntity};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Exit code for definitions that do not convert.
const EXIT_INVALID: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "scbot", version, about)]
struct Cli {
    /// TOML config; built-in defaults when omitted.
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render a definition to an audio file.
    Render {
        /// SuperCollider code, or `-` to read it from stdin.
        code: String,
        #[arg(long, short = 'o')]
        output: PathBuf,
        /// Score length in seconds.
        #[arg(long)]
        duration: Option<f32>,
        /// Interpreter timeout in seconds.
        #[arg(long)]
        timeout: Option<f64>,
    },
    /// Check that sclang, scsynth and ffmpeg answer.
    Check,
    /// Print the definition the bot would extract from a mention.
    Sanitize {
        text: String,
        /// Own handle, without `@`.
        #[arg(long, default_value = "sc2sbot")]
        token: String,
        /// Short link and its display text, as `SHORT=DISPLAY`. Applied in order.
        #[arg(long = "url", value_parser = parse_url_entity)]
        urls: Vec<UrlEntity>,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Render {
            code,
            output,
            duration,
            timeout,
        } => run_render(config, &code, &output, duration, timeout),
        Command::Check => run_check(&config),
        Command::Sanitize { text, token, urls } => {
            println!("{}", Sanitizer::new(&token).definition(&text, &urls));
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) => Config::load_path(p).with_context(|| format!("load config {}", p.display()))?,
        None => Config::default(),
    };
    config.executables = config.executables.with_env_overrides();
    debug!(?config, "configuration loaded");
    Ok(config)
}

fn run_render(
    mut config: Config,
    code: &str,
    output: &Path,
    duration: Option<f32>,
    timeout: Option<f64>,
) -> Result<()> {
    if let Some(d) = duration {
        config.render.duration = d;
    }
    if let Some(t) = timeout {
        config.render.timeout_secs = t;
    }
    let code = if code == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        buf.trim().to_string()
    } else {
        code.to_string()
    };
    if code.is_empty() {
        bail!("nothing to render");
    }

    let renderer = SynthRenderer::new(config.executables, config.render)?;
    if let Some(p) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(p)?;
    }
    match renderer.render_to(&renderer.request(code), output) {
        Ok(artifact) => {
            eprintln!("Wrote {} bytes to {}", artifact.byte_size(), output.display());
            Ok(())
        }
        Err(e @ RenderError::Invalid { .. }) | Err(e @ RenderError::ProcessFailure { .. }) => {
            eprintln!("{e}");
            std::process::exit(EXIT_INVALID);
        }
        Err(e) => Err(e.into()),
    }
}

fn run_check(config: &Config) -> Result<()> {
    let exe = &config.executables;
    SynthRenderer::new(exe.clone(), config.render.clone())?;
    eprintln!("sclang: {} ok", exe.sclang);
    eprintln!("scsynth: {} ok", exe.scsynth);
    match probe(&exe.ffmpeg, "-version") {
        Ok(()) => eprintln!("ffmpeg: {} ok", exe.ffmpeg),
        Err(e) => eprintln!("ffmpeg: {e} (needed only by the bot)"),
    }
    Ok(())
}

fn parse_url_entity(s: &str) -> Result<UrlEntity, String> {
    let (url, display_url) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SHORT=DISPLAY, got {s:?}"))?;
    Ok(UrlEntity {
        url: url.to_string(),
        display_url: display_url.to_string(),
    })
}

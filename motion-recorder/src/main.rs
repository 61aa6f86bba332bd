mod run;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ffmpeg_pipeline::{FfmpegOptions, Style};
use motion_detect::MotionConfig;
use notify::Watcher;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Records motion-triggered videos from a camera to a directory.
///
/// One long-lived ffmpeg child captures the source, runs edge detection,
/// and writes HLS segments; this process debounces the per-frame luminance
/// statistics into motion events, materializes per-event playlists, and
/// optionally serves everything over HTTP, including a live MJPEG feed.
#[derive(Parser)]
#[command(name = "motion-recorder")]
struct Cli {
    /// Video source: a local capture device or a tcp:// h264 stream.
    /// When omitted, the available capture devices are listed.
    #[arg(long)]
    src: Option<String>,

    /// Image mask; white marks the area to detect. Automatically resized to
    /// the frame size.
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Frame width.
    #[arg(long, default_value_t = 1280)]
    width: i32,

    /// Frame height.
    #[arg(long, default_value_t = 720)]
    height: i32,

    /// Frame rate.
    #[arg(long, default_value_t = 15)]
    fps: i32,

    /// Record for this many seconds then exit; 0 means unbounded. Mainly for
    /// testing.
    #[arg(long, default_value_t = 0)]
    duration: u64,

    /// Output style.
    #[arg(long, default_value = "normal")]
    style: Style,

    /// Video codec for the HLS output; libx265 takes about twice the CPU.
    #[arg(long, default_value = "h264")]
    codec: String,

    /// Y average sensitivity; a higher value means lower sensitivity.
    #[arg(long, default_value_t = 1.0)]
    yavg: f64,

    /// Root directory to store videos into.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Address to serve HTTP on; empty disables the server and the live
    /// MJPEG feed.
    #[arg(long, default_value = "")]
    addr: String,

    /// Command to run when a motion event starts.
    #[arg(long)]
    on_event_start: Option<PathBuf>,

    /// Command to run when a motion event ends.
    #[arg(long)]
    on_event_end: Option<PathBuf>,

    /// URL receiving a JSON POST on each motion transition.
    #[arg(long)]
    webhook: Option<reqwest::Url>,

    /// Enable debug logs.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    if let Err(err) = main_impl().await {
        eprintln!("motion-recorder: {err:#}");
        std::process::exit(1);
    }
}

async fn main_impl() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("--root {:?} is unusable", cli.root))?;
    if !root.is_dir() {
        bail!("--root {:?} is not a directory", root);
    }

    let src = match cli.src {
        Some(src) => src,
        None => {
            let found = ffmpeg_pipeline::list_capture_devices()
                .await
                .unwrap_or_default();
            bail!("--src not specified, here's what has been found:\n\n{found}");
        }
    };

    let cancel = CancellationToken::new();

    // Quit whenever SIGINT is received.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted");
                cancel.cancel();
            }
        });
    }

    // Quit whenever the executable is modified, so a deploy rolls the
    // process over without any init-system integration.
    let _watcher = watch_executable(cancel.clone())?;

    let ffmpeg = FfmpegOptions {
        src,
        mask: cli.mask,
        width: cli.width,
        height: cli.height,
        fps: cli.fps,
        duration: (cli.duration > 0).then(|| Duration::from_secs(cli.duration)),
        style: cli.style,
        codec: cli.codec,
        mjpeg: !cli.addr.is_empty(),
        verbose: cli.verbose,
    };
    let motion = MotionConfig {
        y_threshold: cli.yavg,
        on_event_start: cli.on_event_start,
        on_event_end: cli.on_event_end,
        webhook: cli.webhook,
        ..MotionConfig::default()
    };
    let addr = (!cli.addr.is_empty()).then_some(cli.addr);

    run::run(cancel, ffmpeg, motion, root, addr).await
}

fn watch_executable(cancel: CancellationToken) -> Result<notify::RecommendedWatcher> {
    let exe = std::env::current_exe()?;
    let mut watcher = notify::recommended_watcher(
        move |res: std::result::Result<notify::Event, notify::Error>| {
            if res.is_ok() {
                tracing::info!("executable changed, exiting");
                cancel.cancel();
            }
        },
    )?;
    watcher
        .watch(&exe, notify::RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", exe.display()))?;
    Ok(watcher)
}

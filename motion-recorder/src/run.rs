//! Live-pipeline orchestration.
//!
//! Wires the ffmpeg child to its consumers and supervises the lot:
//!
//! - the statistics pipe feeds the metadata parser, then the motion filter,
//!   then the event dispatcher, over bounded channels;
//! - the MJPEG pipe feeds the tee, which fans out to HTTP subscribers;
//! - a group cancellation token ties every worker together. The first worker
//!   to fail cancels the group, which kills the child, which EOFs the pipes,
//!   which drains the rest.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use ffmpeg_pipeline::{build_ffmpeg_args, spawn_recorder, FfmpegOptions, MJPEG_BOUNDARY};
use mjpeg_tee::MimeTee;
use motion_detect::MotionConfig;
use stream_server::ServerState;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Channel capacity between the pipeline workers. Small on purpose: if the
/// consumers stall, backpressure must reach the child rather than grow an
/// unbounded queue of stale frames.
const PIPELINE_DEPTH: usize = 10;

type Worker = (&'static str, JoinHandle<Result<()>>);

/// Spawns a worker that takes the whole group down if it fails.
fn spawn_worker<F>(cancel: CancellationToken, fut: F) -> JoinHandle<Result<()>>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let res = fut.await;
        if res.is_err() {
            cancel.cancel();
        }
        res
    })
}

pub async fn run(
    parent: CancellationToken,
    ffmpeg: FfmpegOptions,
    motion: MotionConfig,
    root: PathBuf,
    addr: Option<String>,
) -> Result<()> {
    // Failures propagate within the group; an external stop cancels the
    // parent and is not an error.
    let group = parent.child_token();

    let args = build_ffmpeg_args(&ffmpeg)?;
    let (mut child, pipes) = spawn_recorder(&args, &root)?;
    let start = Local::now();

    let (level_tx, level_rx) = mpsc::channel(PIPELINE_DEPTH);
    let (event_tx, event_rx) = mpsc::channel(PIPELINE_DEPTH);

    let mut workers: Vec<Worker> = Vec::new();
    // The HTTP server shuts down on cancellation only, so it is collected
    // after the pipeline workers have drained and the group is cancelled.
    let mut services: Vec<Worker> = Vec::new();

    workers.push((
        "metadata",
        spawn_worker(group.clone(), {
            let stats = BufReader::new(pipes.stats);
            async move {
                motion_detect::read_levels(start, stats, level_tx)
                    .await
                    .context("metadata parser")
            }
        }),
    ));
    workers.push((
        "filter",
        spawn_worker(group.clone(), {
            let cancel = group.clone();
            let cfg = motion.clone();
            async move {
                motion_detect::filter_motion(cancel, &cfg, start, level_rx, event_tx)
                    .await
                    .context("motion filter")
            }
        }),
    ));
    workers.push((
        "events",
        spawn_worker(group.clone(), {
            let cancel = group.clone();
            let cfg = motion.clone();
            let root = root.clone();
            async move {
                motion_detect::process_motion(cancel, &cfg, &root, event_rx)
                    .await
                    .context("event dispatcher")
            }
        }),
    ));

    if let Some(addr) = addr {
        let tee = MimeTee::new();
        let state = Arc::new(ServerState::new(root.clone(), tee.clone()));
        workers.push((
            "tee",
            spawn_worker(group.clone(), {
                let cancel = group.clone();
                let mjpeg = BufReader::new(pipes.mjpeg);
                async move {
                    tee.listen(cancel, mjpeg, MJPEG_BOUNDARY)
                        .await
                        .context("mjpeg tee")
                }
            }),
        ));
        services.push((
            "http",
            spawn_worker(group.clone(), {
                let cancel = group.clone();
                async move {
                    stream_server::serve(&addr, state, cancel)
                        .await
                        .context("http server")
                }
            }),
        ));
    }

    // Supervise the child. Cancellation, from outside or from a failing
    // worker, kills it; once it is gone the pipes EOF and the pipeline
    // workers run dry on their own.
    let status = tokio::select! {
        status = child.wait() => Some(status.context("ffmpeg")?),
        _ = group.cancelled() => None,
    };
    let status = match status {
        Some(status) => status,
        None => {
            let _ = child.start_kill();
            child.wait().await.context("ffmpeg")?
        }
    };

    let mut first_err: Option<anyhow::Error> = None;
    let mut collect = |name: &'static str, res: std::result::Result<Result<()>, tokio::task::JoinError>| {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(worker = name, err = format!("{err:#}"), "worker failed");
                first_err.get_or_insert(err);
            }
            Err(err) => {
                tracing::error!(worker = name, %err, "worker panicked");
                first_err.get_or_insert(anyhow::Error::new(err));
            }
        }
    };
    for (name, handle) in workers {
        collect(name, handle.await);
    }
    group.cancel();
    for (name, handle) in services {
        collect(name, handle.await);
    }

    if parent.is_cancelled() {
        // Clean stop: SIGINT or the executable was replaced.
        return Ok(());
    }
    if let Some(err) = first_err {
        return Err(err);
    }
    if !status.success() {
        bail!("ffmpeg exited with {status}");
    }
    Ok(())
}

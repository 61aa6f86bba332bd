//! Reacts to motion start and stop events.
//!
//! Every event gets a playlist covering `[last_start - pre_capture,
//! event + reprocess + post_capture]`. Because the encoder buffers for tens
//! of seconds before flushing segments, the files a window needs may not
//! exist yet at event time; stop events therefore enqueue a deferred
//! regeneration that re-runs the write once the window has fully passed.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::MotionConfig;
use crate::error::MotionError;
use crate::filter::MotionEvent;

/// Maximum runtime for an event hook command.
const HOOK_TIMEOUT: Duration = Duration::from_secs(60);

/// A playlist write deferred until segments have flushed:
/// (event time, window start, window end).
type PendingRegen = (DateTime<Local>, DateTime<Local>, DateTime<Local>);

/// Consumes motion events until cancellation or channel close, writing
/// playlists and firing the configured side effects.
///
/// Hook and webhook failures are logged and absorbed; a playlist write
/// failure is fatal. Pending regenerations are flushed on the way out.
pub async fn process_motion(
    cancel: CancellationToken,
    cfg: &MotionConfig,
    root: &Path,
    mut ch: mpsc::Receiver<MotionEvent>,
) -> Result<(), MotionError> {
    let client = reqwest::Client::new();
    let reprocess = TimeDelta::from_std(cfg.reprocess).unwrap_or(TimeDelta::zero());
    let post_capture = TimeDelta::from_std(cfg.post_capture).unwrap_or(TimeDelta::zero());
    let pre_capture = TimeDelta::from_std(cfg.pre_capture).unwrap_or(TimeDelta::zero());
    let mut pending: VecDeque<PendingRegen> = VecDeque::new();
    let mut last = Local::now();
    let retry = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(retry);
    let mut retry_armed = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = &mut retry, if retry_armed => {
                // Drain every entry whose window has fully passed. Best
                // effort on timing; the last write wins.
                let now = Local::now();
                while let Some((t, start, end)) = pending.front().copied() {
                    if now <= end {
                        break;
                    }
                    hls_playlist::write_playlist(root, t, start, end)?;
                    pending.pop_front();
                }
                if pending.is_empty() {
                    retry_armed = false;
                } else {
                    retry.as_mut().reset(Instant::now() + cfg.reprocess);
                }
            }
            event = ch.recv() => {
                let Some(event) = event else { break };
                tracing::info!(t = %event.t.format("%Y-%m-%dT%H:%M:%S%.2f"), start = event.start, "motion_event");
                if event.start {
                    last = event.t;
                }
                let start = last - pre_capture;
                let end = event.t + reprocess + post_capture;
                hls_playlist::write_playlist(root, last, start, end)?;
                if !event.start {
                    pending.push_back((last, start, end));
                    retry.as_mut().reset(Instant::now() + cfg.reprocess);
                    retry_armed = true;
                }
                let hook = if event.start { &cfg.on_event_start } else { &cfg.on_event_end };
                if let Some(hook) = hook {
                    run_hook(hook, event.start).await;
                }
                if let Some(url) = &cfg.webhook {
                    post_webhook(&client, url.clone(), event.start).await;
                }
            }
        }
    }
    for (t, start, end) in pending {
        hls_playlist::write_playlist(root, t, start, end)?;
    }
    Ok(())
}

/// Runs an event hook, giving it at most a minute. The exit status only gets
/// logged; a flaky hook must not take the recording down.
async fn run_hook(hook: &Path, start: bool) {
    tracing::info!(cmd = %hook.display(), start, "exec");
    let mut cmd = tokio::process::Command::new(hook);
    cmd.kill_on_drop(true);
    match tokio::time::timeout(HOOK_TIMEOUT, cmd.status()).await {
        Ok(Ok(status)) if status.success() => {}
        Ok(Ok(status)) => {
            tracing::error!(cmd = %hook.display(), %status, "event hook failed");
        }
        Ok(Err(err)) => {
            tracing::error!(cmd = %hook.display(), %err, "event hook failed to run");
        }
        Err(_) => {
            tracing::error!(cmd = %hook.display(), timeout = ?HOOK_TIMEOUT, "event hook timed out");
        }
    }
}

/// POSTs `{"motion":<bool>}` to the webhook. Failures are logged, never
/// fatal.
async fn post_webhook(client: &reqwest::Client, url: reqwest::Url, start: bool) {
    tracing::info!(%url, motion = start, "webhook");
    let body = serde_json::json!({ "motion": start }).to_string();
    let res = client
        .post(url.clone())
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await;
    if let Err(err) = res {
        tracing::error!(%url, motion = start, %err, "webhook failed");
    }
}

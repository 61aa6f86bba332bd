//! Converts raw Y-level data into motion start/stop events.

use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::MotionConfig;
use crate::error::MotionError;
use crate::metadata::{round_100ms, YLevel};

/// A processed [`YLevel`]: when motion started or stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionEvent {
    pub t: DateTime<Local>,
    pub start: bool,
}

/// Debounces Y levels into an alternating start/stop event sequence.
///
/// A level at or above the threshold opens a session (one `start=true`) and
/// arms the expiration deadline; further levels above the threshold re-arm
/// it; when it fires, the session closes (`start=false`). Levels during the
/// initial frames or moments are ignored, auto-focus wiggle mostly.
///
/// The deadline is computed against the wall clock rather than the frame
/// timestamp so a backed-up parser cannot push it into runaway drift.
///
/// Returns cleanly on cancellation or input close; fails with
/// [`MotionError::DeadStream`] when no level arrives for the idle timeout,
/// even mid-session. The output channel closes on return.
pub async fn filter_motion(
    cancel: CancellationToken,
    cfg: &MotionConfig,
    start: DateTime<Local>,
    mut ch: mpsc::Receiver<YLevel>,
    events: mpsc::Sender<MotionEvent>,
) -> Result<(), MotionError> {
    let ignore_first_moments = chrono::TimeDelta::from_std(cfg.ignore_first_moments)
        .unwrap_or(chrono::TimeDelta::MAX);
    let expire = tokio::time::sleep(std::time::Duration::ZERO);
    tokio::pin!(expire);
    let mut armed = false;
    let mut in_motion = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = &mut expire, if armed => {
                armed = false;
                in_motion = false;
                let event = MotionEvent { t: round_100ms(Local::now()), start: false };
                if events.send(event).await.is_err() {
                    return Ok(());
                }
            }
            l = tokio::time::timeout(cfg.idle_timeout, ch.recv()) => {
                let Ok(l) = l else {
                    // It's dead, Jim. Happens when the USB port hangs or the
                    // remote TCP connection half-opens.
                    return Err(MotionError::DeadStream(cfg.idle_timeout));
                };
                let Some(l) = l else { return Ok(()) };
                if l.yavg > 0.1 {
                    tracing::info!(t = %l.t.format("%Y-%m-%dT%H:%M:%S%.2f"), frame = l.frame, yavg = l.yavg, "y_level");
                } else {
                    // Below-noise records are pure keep-alive.
                    tracing::debug!(frame = l.frame, yavg = l.yavg, "y_level");
                }
                if l.frame >= cfg.ignore_first_frames
                    && l.t - start >= ignore_first_moments
                    && l.yavg >= cfg.y_threshold
                {
                    let since = (Local::now() - l.t).to_std().unwrap_or_default();
                    let delay = cfg.motion_expiration.saturating_sub(since);
                    expire.as_mut().reset(Instant::now() + delay);
                    armed = true;
                    if !in_motion {
                        in_motion = true;
                        let event = MotionEvent { t: l.t, start: true };
                        if events.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> MotionConfig {
        MotionConfig {
            y_threshold: 0.2,
            motion_expiration: Duration::from_millis(200),
            ignore_first_frames: 0,
            ignore_first_moments: Duration::ZERO,
            idle_timeout: Duration::from_millis(500),
            ..MotionConfig::default()
        }
    }

    struct Fixture {
        tx: mpsc::Sender<YLevel>,
        events: mpsc::Receiver<MotionEvent>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<Result<(), MotionError>>,
    }

    fn spawn_filter(cfg: MotionConfig) -> Fixture {
        let (tx, rx) = mpsc::channel(10);
        let (etx, events) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                filter_motion(cancel, &cfg, Local::now(), rx, etx).await
            })
        };
        Fixture { tx, events, cancel, task }
    }

    fn level(frame: u32, yavg: f64) -> YLevel {
        YLevel { frame, t: Local::now(), yavg }
    }

    #[tokio::test]
    async fn test_quiet_stream_emits_nothing() {
        let mut f = spawn_filter(config());
        for i in 0..100 {
            f.tx.send(level(i, 0.05)).await.unwrap();
        }
        drop(f.tx);
        f.task.await.unwrap().unwrap();
        assert!(f.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_single_pulse_starts_and_expires() {
        let mut f = spawn_filter(config());
        for i in 0..20 {
            f.tx.send(level(i, 0.05)).await.unwrap();
        }
        let spike = level(20, 0.9);
        f.tx.send(spike).await.unwrap();

        let start = f.events.recv().await.unwrap();
        assert!(start.start);
        assert_eq!(start.t, spike.t);

        // The stop event follows roughly one expiration later.
        let stop = tokio::time::timeout(Duration::from_millis(450), f.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!stop.start);
        assert!(stop.t >= start.t);

        f.cancel.cancel();
        f.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_sustained_motion_is_one_session() {
        let mut f = spawn_filter(config());
        for i in 0..10 {
            f.tx.send(level(i, 0.9)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // One start for the whole burst, one stop once the feed goes quiet
        // and the expiration passes.
        let start = f.events.recv().await.unwrap();
        assert!(start.start);
        let stop = tokio::time::timeout(Duration::from_millis(450), f.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!stop.start);

        f.cancel.cancel();
        f.task.await.unwrap().unwrap();
        assert!(f.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_events_alternate() {
        let mut f = spawn_filter(config());
        for burst in 0..3 {
            f.tx.send(level(burst, 0.9)).await.unwrap();
            // Wait out the expiration between bursts.
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        drop(f.tx);
        f.task.await.unwrap().unwrap();

        let mut expected_start = true;
        let mut n = 0;
        while let Some(e) = f.events.recv().await {
            assert_eq!(e.start, expected_start);
            expected_start = !expected_start;
            n += 1;
        }
        assert_eq!(n, 6);
    }

    #[tokio::test]
    async fn test_ignore_first_frames() {
        let cfg = MotionConfig {
            ignore_first_frames: 10,
            ..config()
        };
        let mut f = spawn_filter(cfg);
        f.tx.send(level(5, 0.9)).await.unwrap();
        f.tx.send(level(10, 0.9)).await.unwrap();
        drop(f.tx);
        f.task.await.unwrap().unwrap();

        // Only the frame past the guard opens a session.
        let start = f.events.recv().await.unwrap();
        assert!(start.start);
        assert!(f.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dead_stream() {
        let f = spawn_filter(config());
        // Send nothing at all; the idle timeout must trip.
        let err = f.task.await.unwrap().unwrap_err();
        assert!(matches!(err, MotionError::DeadStream(_)));
        drop(f.tx);
    }

    #[tokio::test]
    async fn test_cancellation_returns_quietly() {
        let f = spawn_filter(config());
        f.cancel.cancel();
        f.task.await.unwrap().unwrap();
    }
}

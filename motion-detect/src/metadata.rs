//! Frame statistics parser.
//!
//! The child's `metadata=print` filter writes one record pair per frame to
//! the statistics pipe:
//!
//! ```text
//! frame:1336 pts:1336    pts_time:53.44
//! lavfi.signalstats.YAVG=0.213281
//! ```
//!
//! Every record is forwarded, not just the ones above the detection
//! threshold: downstream, the record flow doubles as the pipeline's liveness
//! signal.

use chrono::{DateTime, Local, TimeDelta, TimeZone};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::error::MotionError;

/// Y channel average of one post-edge-detection frame: the amount of edge
/// movement detected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YLevel {
    pub frame: u32,
    pub t: DateTime<Local>,
    pub yavg: f64,
}

/// Rounds to the nearest 100ms, the effective resolution of the pipeline.
pub fn round_100ms(t: DateTime<Local>) -> DateTime<Local> {
    let ms = t.timestamp_millis();
    let rounded = (ms + 50).div_euclid(100) * 100;
    Local
        .timestamp_millis_opt(rounded)
        .single()
        .unwrap_or(t)
}

/// Reads statistics records and emits one [`YLevel`] per frame.
///
/// Returns when the pipe reaches EOF (the child exited) or the receiver went
/// away; fails on the first line that does not parse. Frame timestamps are
/// `start + pts_time`.
pub async fn read_levels<R: AsyncBufRead + Unpin>(
    start: DateTime<Local>,
    reader: R,
    ch: mpsc::Sender<YLevel>,
) -> Result<(), MotionError> {
    let mut lines = reader.lines();
    let mut frame = 0u32;
    let mut pts_time = TimeDelta::zero();
    while let Some(l) = lines.next_line().await? {
        if let Some(v) = l.strip_prefix("lavfi.signalstats.YAVG=") {
            let yavg: f64 = v
                .parse()
                .map_err(|_| MotionError::MalformedMetadata(l.clone()))?;
            let yavg = (yavg * 100.0).round() / 100.0;
            let level = YLevel {
                frame,
                t: round_100ms(start + pts_time),
                yavg,
            };
            if ch.send(level).await.is_err() {
                return Ok(());
            }
            continue;
        }
        let f: Vec<&str> = l.split_whitespace().collect();
        if f.len() != 3 || !f[0].starts_with("frame:") || !f[2].starts_with("pts_time:") {
            return Err(MotionError::MalformedMetadata(l));
        }
        frame = f[0]["frame:".len()..]
            .parse()
            .map_err(|_| MotionError::MalformedMetadata(l.clone()))?;
        let secs: f64 = f[2]["pts_time:".len()..]
            .parse()
            .map_err(|_| MotionError::MalformedMetadata(l.clone()))?;
        pts_time = TimeDelta::nanoseconds((secs * 1e9) as i64);
    }
    Ok(())
}

use std::path::PathBuf;
use std::time::Duration;

/// Motion detection and event reaction settings. Immutable after startup.
#[derive(Debug, Clone)]
pub struct MotionConfig {
    /// Motion sensitivity as the Y (from YUV) average pixel brightness after
    /// frame subtraction and edge detection. Higher means less sensitive.
    pub y_threshold: f64,
    /// Duration to record before the motion was detected. The encoder can
    /// buffer around 30s before flushing segments, so the window reaches back
    /// at least that far.
    pub pre_capture: Duration,
    /// Duration to keep recording after the motion timed out.
    pub post_capture: Duration,
    /// Duration after which a motion session times out.
    pub motion_expiration: Duration,
    /// Ignore detections within these initial frames. Many cameras auto-focus
    /// on startup and generate artificial motion.
    pub ignore_first_frames: u32,
    /// Ignore detections this early in the stream.
    pub ignore_first_moments: Duration,
    /// Give up when the statistics stream goes silent this long. A silent
    /// stream means the source died (USB hang, remote TCP half-open); exiting
    /// lets the init system restart the whole pipeline.
    pub idle_timeout: Duration,
    /// Delay before regenerating an event playlist, so segments the encoder
    /// had buffered at event time get picked up.
    pub reprocess: Duration,

    /// Command to run when motion starts.
    pub on_event_start: Option<PathBuf>,
    /// Command to run when motion ends.
    pub on_event_end: Option<PathBuf>,
    /// URL to POST `{"motion":true}` / `{"motion":false}` to.
    pub webhook: Option<reqwest::Url>,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            y_threshold: 1.0,
            pre_capture: Duration::from_secs(31),
            post_capture: Duration::ZERO,
            motion_expiration: Duration::from_secs(5),
            ignore_first_frames: 10,
            ignore_first_moments: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(10),
            reprocess: Duration::from_secs(60),
            on_event_start: None,
            on_event_end: None,
            webhook: None,
        }
    }
}

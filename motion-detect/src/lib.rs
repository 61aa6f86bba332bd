//! Motion detection over the child's per-frame luminance statistics.
//!
//! Three workers, chained by bounded channels:
//!
//! ```text
//! stats pipe -> read_levels -> YLevel -> filter_motion -> MotionEvent -> process_motion
//! ```
//!
//! `read_levels` parses the statistics pipe, `filter_motion` debounces raw
//! levels into start/stop sessions, and `process_motion` turns each event
//! into playlists, hook commands, and webhook calls.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod metadata;

pub use config::MotionConfig;
pub use dispatch::process_motion;
pub use error::MotionError;
pub use filter::{filter_motion, MotionEvent};
pub use metadata::{read_levels, YLevel};

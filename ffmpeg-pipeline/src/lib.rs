//! ffmpeg pipeline construction for the motion recorder.
//!
//! This crate owns everything about the external video processor: the
//! `-filter_complex` graph vocabulary, the five output styles, the full
//! command line, and the process launch with the statistics and MJPEG pipes
//! mapped onto fds 3 and 4.
//!
//! The rest of the system only consumes the two byte streams this child
//! produces; it never touches libav directly.

pub mod command;
pub mod error;
pub mod filter;
pub mod graph;
pub mod probe;

pub use command::{build_ffmpeg_args, spawn_recorder, ChildPipes, FfmpegOptions, MJPEG_BOUNDARY};
pub use error::PipelineError;
pub use filter::{FilterGraph, FilterNode, Stream};
pub use graph::{construct_filter_graph, Style};
pub use probe::{ffmpeg_available, list_capture_devices};

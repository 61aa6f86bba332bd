//! ffmpeg command construction and process launch.
//!
//! The recorder does not encode video itself: it drives one long-lived ffmpeg
//! child that captures, detects motion, and writes HLS segments. Two
//! anonymous pipes are mapped into the child on fixed descriptors:
//!
//! - fd 3 receives per-frame YAVG statistics from the `metadata=print` filter
//! - fd 4 receives the multipart MJPEG stream, when enabled

use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::fcntl::OFlag;
use tokio::process::{Child, Command};

use crate::error::PipelineError;
use crate::graph::{construct_filter_graph, Style};

/// Multipart boundary used by ffmpeg's mpjpeg muxer on the fd 4 stream.
pub const MJPEG_BOUNDARY: &str = "ffmpeg";

/// Options to pass to ffmpeg to retrieve and record the video.
#[derive(Debug, Clone)]
pub struct FfmpegOptions {
    /// Video source: a `tcp://` h264 stream or a local capture device.
    pub src: String,
    /// Optional file path to a detection mask.
    pub mask: Option<PathBuf>,
    /// Frame size and frame rate.
    pub width: i32,
    pub height: i32,
    pub fps: i32,
    /// Optional duration limit of the recording, mainly for testing.
    pub duration: Option<Duration>,
    /// Controls the video format generated, see [`Style`].
    pub style: Style,
    /// One of h264 or libx265. libx265 takes about twice the CPU usage.
    pub codec: String,
    /// Whether the MJPEG stream on fd 4 is enabled.
    pub mjpeg: bool,
    /// Increases ffmpeg's own log output.
    pub verbose: bool,
}

/// Builds the argument list to exec ffmpeg.
///
/// Outputs:
/// - HLS segments and `all.m3u8` into the working directory.
/// - YAVG metadata to fd 3.
/// - Mime encoded MJPEG to fd 4, if `mjpeg` is set.
pub fn build_ffmpeg_args(o: &FfmpegOptions) -> Result<Vec<String>, PipelineError> {
    let mut args: Vec<String> = vec![
        "ffmpeg".into(),
        "-hide_banner".into(),
        // Disable stats output because it uses the CR character, which
        // corrupts logs.
        "-nostats".into(),
    ];
    if o.verbose {
        args.extend(["-loglevel".into(), "repeat+info".into()]);
    } else {
        args.extend(["-loglevel".into(), "repeat+warning".into()]);
    }
    if o.src.starts_with("tcp://") {
        args.extend(["-f".into(), "h264".into()]);
    } else {
        if cfg!(target_os = "macos") {
            args.extend(["-f".into(), "avfoundation".into()]);
        } else if cfg!(target_os = "linux") {
            args.extend(["-f".into(), "v4l2".into()]);
        } else {
            return Err(PipelineError::UnsupportedPlatform);
        }
        args.extend([
            "-avioflags".into(),
            "direct".into(),
            "-fflags".into(),
            "nobuffer".into(),
            "-flags".into(),
            "low_delay".into(),
            "-probesize".into(),
            "32".into(),
            "-fpsprobesize".into(),
            "0".into(),
            "-analyzeduration".into(),
            "0".into(),
            "-video_size".into(),
            format!("{}x{}", o.width, o.height),
        ]);
    }
    // The camera driver may decide another framerate. Sadly ffmpeg reports
    // this at info level, not warning level; use -v to see it.
    args.extend(["-framerate".into(), o.fps.to_string()]);
    args.extend(["-i".into(), o.src.clone()]);
    match &o.mask {
        Some(mask) => args.extend(["-i".into(), mask.display().to_string()]),
        // A white frame means "detect everywhere"; it gets rescaled by the
        // graph like a real mask would.
        None => args.extend([
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            "color=color=white:size=32x32".into(),
        ]),
    }

    let mut fg = construct_filter_graph(o.style, o.width, o.height);
    let mut hls_out = "[out]";
    if o.mjpeg {
        // Append the mjpeg-specific legs: split the output pad and downsample
        // the preview to 1 fps.
        fg.0.push(crate::filter::Stream {
            sources: vec!["[out]".into()],
            chain: crate::filter::FilterNode::Leaf("split=2".into()),
            sinks: vec!["[outHLS]".into(), "[out2]".into()],
        });
        fg.0.push(crate::filter::Stream {
            sources: vec!["[out2]".into()],
            chain: crate::filter::FilterNode::Leaf("fps=fps=1".into()),
            sinks: vec!["[outMPJPEG]".into()],
        });
        hls_out = "[outHLS]";
    }
    args.extend(["-filter_complex".into(), fg.to_string()]);

    if let Some(d) = o.duration {
        // https://ffmpeg.org/ffmpeg-utils.html#time-duration-syntax
        args.extend(["-t".into(), format!("{:.1}s", d.as_secs_f64())]);
    }

    // HLS output. Segments are named by their start timestamp so that the
    // playlist window selection can work on bare filenames.
    args.extend([
        "-map".into(),
        hls_out.into(),
        "-c:v".into(),
        o.codec.clone(),
        "-preset".into(),
        "fast".into(),
        "-crf".into(),
        "30".into(),
        "-f".into(),
        "hls".into(),
        "-hls_list_size".into(),
        "0".into(),
        "-strftime".into(),
        "1".into(),
        "-hls_allow_cache".into(),
        "1".into(),
        "-hls_flags".into(),
        "independent_segments".into(),
        "-hls_segment_filename".into(),
        "%Y-%m-%dT%H-%M-%S.ts".into(),
        "all.m3u8".into(),
    ]);

    if o.mjpeg {
        // https://ffmpeg.org/ffmpeg-all.html#pipe
        args.extend([
            "-map".into(),
            "[outMPJPEG]".into(),
            "-f".into(),
            "mpjpeg".into(),
            "-q".into(),
            "2".into(),
            "pipe:4".into(),
        ]);
    }
    Ok(args)
}

/// The parent-side read ends of the statistics and MJPEG pipes.
pub struct ChildPipes {
    pub stats: tokio::fs::File,
    pub mjpeg: tokio::fs::File,
}

/// Creates the two pipes and spawns the child with their write ends mapped to
/// fds 3 and 4.
///
/// The write ends are closed in the parent once the child has been spawned so
/// that the statistics reader observes EOF when the child exits. stdin is
/// intentionally not connected; stdout and stderr pass through.
pub fn spawn_recorder(
    args: &[String],
    root: &Path,
) -> Result<(Child, ChildPipes), PipelineError> {
    // CLOEXEC so the child only ever sees the two dup2'd descriptors below.
    let (stats_r, stats_w) =
        nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(PipelineError::pipe_setup)?;
    let (mjpeg_r, mjpeg_w) =
        nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(PipelineError::pipe_setup)?;

    let (exe, rest) = args.split_first().ok_or(PipelineError::EmptyCommand)?;
    tracing::debug!(cmd = ?args, "exec");
    let mut cmd = Command::new(exe);
    cmd.args(rest)
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let stats_fd = stats_w.as_raw_fd();
    let mjpeg_fd = mjpeg_w.as_raw_fd();
    // After fork, duplicate the pipe write ends onto the descriptors the
    // filter graph addresses as pipe:3 and pipe:4. dup2 clears CLOEXEC on the
    // new descriptor, so they survive the exec.
    unsafe {
        cmd.pre_exec(move || {
            nix::unistd::dup2(stats_fd, 3)
                .and_then(|_| nix::unistd::dup2(mjpeg_fd, 4))
                .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            Ok(())
        });
    }
    let child = cmd.spawn().map_err(PipelineError::Spawn)?;
    // Parent-side write ends: dropping them here leaves the child holding the
    // only writers.
    drop(stats_w);
    drop(mjpeg_w);

    let pipes = ChildPipes {
        stats: owned_fd_into_file(stats_r),
        mjpeg: owned_fd_into_file(mjpeg_r),
    };
    Ok((child, pipes))
}

fn owned_fd_into_file(fd: OwnedFd) -> tokio::fs::File {
    tokio::fs::File::from_std(std::fs::File::from(fd))
}

//! Motion-detection filter graphs.
//!
//! Everything here is specific to the recording pipeline: the edge-detection
//! chain that turns inter-frame deltas into a Y-average motion statistic, the
//! timestamp overlay, and the five graph styles that wire them together.

use std::fmt;
use std::str::FromStr;

use crate::filter::{chain, FilterGraph, FilterNode, Stream};

/// Draws the current timestamp as an overlay.
const DRAW_TIMESTAMP: &str = "drawtext@1=\
    fontfile=/usr/share/fonts/truetype/noto/NotoSansMono-Regular.ttf:\
    text='%{localtime\\:%Y-%m-%d %T}':\
    x=(w-text_w-10):\
    y=(h-text_h-10):\
    fontsize=48:\
    fontcolor=white:\
    box=1:\
    boxcolor=black@0.5";

/// Draws the YAVG on the image for debugging. Requires signalstats.
const DRAW_YAVG: &str = "drawtext=\
    fontfile=/usr/share/fonts/truetype/noto/NotoSansMono-Regular.ttf:\
    text='%{metadata\\:lavfi.signalstats.YAVG}':\
    x=10:\
    y=10:\
    fontsize=48:\
    fontcolor=white:\
    box=1:\
    boxcolor=black@0.5";

/// Reduces the image by half on both dimensions, to reduce the processing
/// power required by 75%.
///
/// <https://ffmpeg.org/ffmpeg-filters.html#scale-1>
const SCALE_HALF: &str = "scale=w=iw/2:h=ih/2";

/// Prints per-frame YAVG records to pipe #3, the first descriptor after
/// stderr handed to the child.
///
/// The unfiltered variant is used on purpose: every frame must produce a
/// record so the statistics stream doubles as a liveness signal. Switching to
/// `function=greater` would starve the dead-man timer during quiet scenes.
const PRINT_YAVG_TO_PIPE: &str =
    "metadata=print:key=lavfi.signalstats.YAVG:file='pipe\\:3':direct=1";

/// Motion detection by calculating the edges on the delta between each frame
/// pair.
fn motion_edge_detect() -> FilterNode {
    chain!(
        // Edge detection. This effectively halves the frame rate.
        "tblend=all_mode=difference",
        "edgedetect",
        // Duplicate each frame and reset the frame timestamps.
        "tpad=stop_mode=clone:stop_duration=1",
        "setpts=N/FRAME_RATE/TB",
    )
}

/// Output style of the recorded video, selecting the shape of the filter
/// graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// Masked motion detection, clean recording.
    Normal,
    /// Motion detection on the full frame, clean recording.
    NormalNoMask,
    /// Record the edge-detection output itself, with the mask drawn in red.
    MotionOnly,
    /// Blend the edge-detection output over the recording.
    Overlay,
    /// Recording and edge-detection output side by side.
    Both,
}

impl Style {
    pub const ALL: [Style; 5] = [
        Style::Normal,
        Style::NormalNoMask,
        Style::MotionOnly,
        Style::Overlay,
        Style::Both,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Normal => "normal",
            Style::NormalNoMask => "normal_no_mask",
            Style::MotionOnly => "motion_only",
            Style::Overlay => "overlay",
            Style::Both => "both",
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Style {
    type Err = String;

    fn from_str(v: &str) -> Result<Self, Self::Err> {
        for s in Style::ALL {
            if v == s.as_str() {
                return Ok(s);
            }
        }
        let options: Vec<&str> = Style::ALL.iter().map(|s| s.as_str()).collect();
        Err(format!(
            "invalid style. Supported values are: {}",
            options.join(", ")
        ))
    }
}

/// Constructs the argument for `-filter_complex`.
///
/// Input pad `[0:v]` is the camera, `[1:v]` the mask. The graph always prints
/// YAVG statistics to pipe #3 and always produces a `[out]` video pad.
pub fn construct_filter_graph(s: Style, w: i32, h: i32) -> FilterGraph {
    let half_size = format!("{}x{}", w / 2, h / 2);
    match s {
        Style::Normal => FilterGraph(vec![
            Stream {
                sources: vec!["[0:v]".into()],
                chain: chain!("hqdn3d", "split=2"),
                sinks: vec!["[src1]".into(), "[src2]".into()],
            },
            Stream {
                sources: vec!["[1:v]".into()],
                chain: chain!(format!("scale={half_size}")),
                sinks: vec!["[mask]".into()],
            },
            Stream {
                sources: vec!["[src1]".into()],
                chain: chain!(SCALE_HALF),
                sinks: vec!["[srcHalf]".into()],
            },
            Stream {
                sources: vec!["[srcHalf]".into(), "[mask]".into()],
                chain: chain!("alphamerge"),
                sinks: vec!["[alpha]".into()],
            },
            Stream {
                chain: chain!(format!("color=color=black:size={half_size}")),
                sinks: vec!["[black]".into()],
                ..Default::default()
            },
            Stream {
                sources: vec!["[black]".into(), "[alpha]".into()],
                chain: chain!("overlay"),
                sinks: vec!["[masked]".into()],
            },
            Stream {
                sources: vec!["[masked]".into()],
                chain: chain!(
                    motion_edge_detect(),
                    "signalstats",
                    PRINT_YAVG_TO_PIPE,
                    "nullsink"
                ),
                sinks: vec![],
            },
            Stream {
                sources: vec!["[src2]".into()],
                chain: chain!(DRAW_TIMESTAMP),
                sinks: vec!["[out]".into()],
            },
        ]),
        Style::NormalNoMask => FilterGraph(vec![
            Stream {
                sources: vec!["[0:v]".into()],
                chain: chain!("hqdn3d", "split=2"),
                sinks: vec!["[src1]".into(), "[src2]".into()],
            },
            Stream {
                sources: vec!["[src1]".into()],
                chain: chain!(
                    SCALE_HALF,
                    motion_edge_detect(),
                    "signalstats",
                    PRINT_YAVG_TO_PIPE,
                    "nullsink"
                ),
                sinks: vec![],
            },
            Stream {
                sources: vec!["[src2]".into()],
                chain: chain!(DRAW_TIMESTAMP),
                sinks: vec!["[out]".into()],
            },
        ]),
        Style::MotionOnly => FilterGraph(vec![
            Stream {
                sources: vec!["[0:v]".into()],
                chain: chain!("hqdn3d", SCALE_HALF),
                sinks: vec!["[src]".into()],
            },
            Stream {
                sources: vec!["[1:v]".into()],
                chain: chain!(format!("scale={half_size}"), "split=2"),
                sinks: vec!["[mask1]".into(), "[mask2]".into()],
            },
            Stream {
                sources: vec!["[src]".into(), "[mask1]".into()],
                chain: chain!("alphamerge"),
                sinks: vec!["[alpha]".into()],
            },
            Stream {
                chain: chain!(format!("color=color=black:size={half_size}")),
                sinks: vec!["[black]".into()],
                ..Default::default()
            },
            Stream {
                sources: vec!["[black]".into(), "[alpha]".into()],
                chain: chain!("overlay"),
                sinks: vec!["[masked]".into()],
            },
            Stream {
                sources: vec!["[masked]".into()],
                chain: chain!(motion_edge_detect(), "signalstats", PRINT_YAVG_TO_PIPE),
                sinks: vec!["[motion]".into()],
            },
            Stream {
                chain: chain!(format!("color=color=red:size={half_size}")),
                sinks: vec!["[red]".into()],
                ..Default::default()
            },
            Stream {
                sources: vec!["[mask2]".into()],
                chain: chain!("lut=y=negval"),
                sinks: vec!["[maskneg]".into()],
            },
            Stream {
                sources: vec!["[red]".into(), "[maskneg]".into()],
                chain: chain!("alphamerge"),
                sinks: vec!["[maskedred]".into()],
            },
            Stream {
                sources: vec!["[motion]".into(), "[maskedred]".into()],
                chain: chain!("overlay", "scale=iw*2:ih*2"),
                sinks: vec!["[out]".into()],
            },
        ]),
        Style::Overlay => FilterGraph(vec![
            Stream {
                sources: vec!["[0:v]".into()],
                chain: chain!("hqdn3d", "split=2"),
                sinks: vec!["[src1]".into(), "[src2]".into()],
            },
            Stream {
                sources: vec!["[1:v]".into()],
                chain: chain!(format!("scale={half_size}")),
                sinks: vec!["[mask]".into()],
            },
            Stream {
                sources: vec!["[src1]".into()],
                chain: chain!(SCALE_HALF),
                sinks: vec!["[srcHalf]".into()],
            },
            Stream {
                sources: vec!["[srcHalf]".into(), "[mask]".into()],
                chain: chain!("alphamerge"),
                sinks: vec!["[alpha]".into()],
            },
            Stream {
                chain: chain!(format!("color=color=black:size={half_size}")),
                sinks: vec!["[black]".into()],
                ..Default::default()
            },
            Stream {
                sources: vec!["[black]".into(), "[alpha]".into()],
                chain: chain!("overlay"),
                sinks: vec!["[masked]".into()],
            },
            Stream {
                sources: vec!["[masked]".into()],
                chain: chain!(
                    motion_edge_detect(),
                    "signalstats",
                    PRINT_YAVG_TO_PIPE,
                    DRAW_YAVG,
                    "scale=iw*2:ih*2"
                ),
                sinks: vec!["[motion]".into()],
            },
            Stream {
                sources: vec!["[src2]".into(), "[motion]".into()],
                chain: chain!("blend=lighten", DRAW_TIMESTAMP),
                sinks: vec!["[out]".into()],
            },
        ]),
        Style::Both => FilterGraph(vec![
            Stream {
                sources: vec!["[0:v]".into()],
                chain: chain!("hqdn3d", "split=2"),
                sinks: vec!["[src1]".into(), "[src2]".into()],
            },
            Stream {
                sources: vec!["[1:v]".into()],
                chain: chain!(format!("scale={half_size}"), "split=2"),
                sinks: vec!["[mask1]".into(), "[mask2]".into()],
            },
            Stream {
                sources: vec!["[src1]".into()],
                chain: chain!(SCALE_HALF),
                sinks: vec!["[srcHalf]".into()],
            },
            Stream {
                sources: vec!["[srcHalf]".into(), "[mask1]".into()],
                chain: chain!("alphamerge"),
                sinks: vec!["[alpha]".into()],
            },
            Stream {
                chain: chain!(format!("color=color=black:size={half_size}")),
                sinks: vec!["[black]".into()],
                ..Default::default()
            },
            Stream {
                sources: vec!["[black]".into(), "[alpha]".into()],
                chain: chain!("overlay"),
                sinks: vec!["[masked]".into()],
            },
            Stream {
                sources: vec!["[masked]".into()],
                chain: chain!(
                    motion_edge_detect(),
                    "signalstats",
                    PRINT_YAVG_TO_PIPE,
                    DRAW_YAVG
                ),
                sinks: vec!["[motion]".into()],
            },
            Stream {
                sources: vec!["[src2]".into()],
                chain: chain!(DRAW_TIMESTAMP, "pad='iw*2':ih"),
                sinks: vec!["[overlay1]".into()],
            },
            Stream {
                chain: chain!(format!("color=color=red:size={half_size}")),
                sinks: vec!["[red]".into()],
                ..Default::default()
            },
            Stream {
                sources: vec!["[mask2]".into()],
                chain: chain!("lut=y=negval"),
                sinks: vec!["[maskneg]".into()],
            },
            Stream {
                sources: vec!["[red]".into(), "[maskneg]".into()],
                chain: chain!("alphamerge"),
                sinks: vec!["[maskedred]".into()],
            },
            Stream {
                sources: vec!["[motion]".into(), "[maskedred]".into()],
                chain: chain!("overlay", "scale=iw*2:ih*2"),
                sinks: vec!["[overlay2]".into()],
            },
            Stream {
                sources: vec!["[overlay1]".into(), "[overlay2]".into()],
                chain: chain!("overlay='w'"),
                sinks: vec!["[out]".into()],
            },
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construct_all_styles() {
        // Every style must render to a non-empty graph ending in [out].
        for s in Style::ALL {
            let g = construct_filter_graph(s, 640, 480).to_string();
            assert!(!g.is_empty(), "{s}");
            assert!(g.ends_with("[out]"), "{s}: {g}");
            assert!(g.contains("pipe\\:3"), "{s}: {g}");
        }
    }

    #[test]
    fn test_style_round_trip() {
        for s in Style::ALL {
            assert_eq!(s.as_str().parse::<Style>().unwrap(), s);
        }
        assert!("plasma".parse::<Style>().is_err());
    }

    #[test]
    fn test_normal_no_mask_shape() {
        let g = construct_filter_graph(Style::NormalNoMask, 1280, 720).to_string();
        // The detection leg is scaled to half size and terminated in nullsink.
        assert!(g.contains("scale=w=iw/2:h=ih/2,tblend=all_mode=difference"));
        assert!(g.contains("nullsink"));
        // The mask input is unused in this style.
        assert!(!g.contains("[1:v]"));
    }
}

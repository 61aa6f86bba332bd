use std::path::PathBuf;

use mjpeg_tee::MimeTee;

/// Shared state for all HTTP handlers.
pub struct ServerState {
    /// Directory holding the HLS segments and playlists.
    pub root: PathBuf,
    /// Source of live MJPEG frames.
    pub tee: MimeTee,
}

impl ServerState {
    pub fn new(root: PathBuf, tee: MimeTee) -> Self {
        Self { root, tee }
    }
}

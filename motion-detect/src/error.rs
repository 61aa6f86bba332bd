use thiserror::Error;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("unexpected metadata output: {0:?}")]
    MalformedMetadata(String),

    #[error("no frame statistics for more than {0:?}")]
    DeadStream(std::time::Duration),

    #[error(transparent)]
    Playlist(#[from] hls_playlist::PlaylistError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

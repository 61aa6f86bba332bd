use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("video capture is not implemented for this OS")]
    UnsupportedPlatform,

    #[error("empty command line")]
    EmptyCommand,

    #[error("failed to create pipe: {0}")]
    PipeSetup(std::io::Error),

    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn pipe_setup(e: nix::Error) -> Self {
        PipelineError::PipeSetup(std::io::Error::from_raw_os_error(e as i32))
    }
}

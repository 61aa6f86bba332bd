use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {err}")]
    Bind { addr: String, err: std::io::Error },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TeeError {
    #[error("malformed multipart stream: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

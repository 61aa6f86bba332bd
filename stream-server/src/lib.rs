//! HTTP server for the motion recorder.
//!
//! Serves the recorded playlists and segments straight off the recording
//! root, plus the live MJPEG feed relayed from the [`mjpeg_tee::MimeTee`].
//! No authentication: bind it to a trusted interface.

pub mod error;
pub mod routes;
mod state;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use error::ServerError;
pub use state::ServerState;

/// Binds `addr` and serves until the token fires.
pub async fn serve(
    addr: &str,
    state: Arc<ServerState>,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| ServerError::Bind {
            addr: addr.to_string(),
            err,
        })?;
    if let Ok(local) = listener.local_addr() {
        tracing::info!(addr = %local, "http listening");
    }
    let app = routes::router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

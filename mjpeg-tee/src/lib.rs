//! Multipart MJPEG tee.
//!
//! Decodes the MIME multipart stream the recording child writes on its MJPEG
//! pipe and broadcasts the latest part to any number of late-joining
//! subscribers. The publisher never blocks on a slow subscriber; a slow
//! subscriber loses intermediate frames, never their order.

pub mod error;
pub mod reader;
pub mod tee;

pub use error::TeeError;
pub use reader::{MimePart, MultipartReader};
pub use tee::{MimeTee, TeeSubscriber};

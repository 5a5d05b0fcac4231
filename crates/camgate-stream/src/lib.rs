//! MJPEG-over-HTTP live preview server.
//!
//! Serves `GET /camera/{id}/stream` as `multipart/x-mixed-replace` from each
//! camera's latest-frame cell.  Frames are downscaled and re-encoded per
//! client; a client that cannot keep up only ever skips frames, it never
//! slows the capture side down.

pub mod encode;
pub mod server;

pub use encode::encode_jpeg;
pub use server::{DEFAULT_PORT, StreamServer};

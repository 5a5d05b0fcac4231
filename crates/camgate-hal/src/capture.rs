//! Capture capability boundary.
//!
//! A [`CaptureBackend`] opens camera handles; each handle is a
//! [`FrameSource`] owned exclusively by one `CameraDevice`.  Reads are
//! expected to complete with bounded latency — a backend whose driver call
//! can genuinely block must isolate that call behind its own worker and
//! return the most recent frame here.

use camgate_types::{CaptureProfile, Frame, GatewayError};

/// An open camera handle.  Dropping the source releases the handle.
pub trait FrameSource: Send {
    /// Read the next available frame.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Capture`] when the device has failed or been
    /// unplugged.  The owning device treats any error as a forced
    /// disconnect.
    fn read(&mut self) -> Result<Frame, GatewayError>;

    /// The settings the hardware actually negotiated, which may differ from
    /// the requested profile.
    fn actual_profile(&self) -> &CaptureProfile;
}

/// Factory for [`FrameSource`] handles.
pub trait CaptureBackend: Send + Sync {
    /// Open the camera at `index` with the requested `profile`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Capture`] when the device cannot be opened;
    /// the caller stays disconnected and may retry on a later intent.
    fn open(
        &self,
        index: camgate_types::CameraId,
        profile: &CaptureProfile,
    ) -> Result<Box<dyn FrameSource>, GatewayError>;
}

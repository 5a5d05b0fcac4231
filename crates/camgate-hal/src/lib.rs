//! `camgate-hal` – capture and recording capability boundaries.
//!
//! The gateway core never talks to a camera driver or a video encoder
//! directly; it goes through the traits defined here.  Physical backends
//! (V4L2, vendor SDKs) implement these traits out of tree; this crate ships
//! the pieces the gateway itself needs:
//!
//! # Modules
//!
//! - [`capture`] – [`CaptureBackend`][capture::CaptureBackend] /
//!   [`FrameSource`][capture::FrameSource]: open a camera handle with a
//!   requested profile and read frames from it.
//! - [`record`] – [`RecordingBackend`][record::RecordingBackend] /
//!   [`FrameSink`][record::FrameSink]: open a video file and persist a frame
//!   stream to it, plus [`MjvFileBackend`][record::MjvFileBackend], a simple
//!   length-prefixed container used when no hardware encoder is wired in.
//! - [`sim`] – [`SyntheticBackend`][sim::SyntheticBackend]: a deterministic
//!   in-process capture backend so the full gateway runs in headless tests
//!   and CI without physical cameras.
//! - [`discovery`] – V4L2 device enumeration and USB serial-number lookup
//!   via `v4l2-ctl` / `udevadm`.
//! - [`paths`] – recording output path construction.

pub mod capture;
pub mod discovery;
pub mod paths;
pub mod record;
pub mod sim;

pub use capture::{CaptureBackend, FrameSource};
pub use record::{FrameSink, MjvFileBackend, RecordingBackend};
pub use sim::{SyntheticBackend, SyntheticSinkBackend};

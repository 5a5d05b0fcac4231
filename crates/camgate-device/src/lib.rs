//! Per-camera device layer: lifecycle state machine, latest-frame sharing and
//! the bounded recording pipeline.
//!
//! # Modules
//!
//! * [`camera`] – [`CameraDevice`], the cooperative per-camera state machine.
//! * [`frame_cell`] – [`FrameCell`], single-slot latest-wins frame exchange.
//! * [`intents`] – the unbounded intent queue feeding each device.
//! * [`pipeline`] – [`RecordingPipeline`], bounded producer/consumer writer.
//! * [`stats`] – [`CaptureStats`], lock-free per-camera counters.

pub mod camera;
pub mod frame_cell;
pub mod intents;
pub mod pipeline;
pub mod stats;

pub use camera::{CameraConfig, CameraDevice, CameraHandle, CameraShared};
pub use frame_cell::FrameCell;
pub use intents::IntentSender;
pub use pipeline::RecordingPipeline;
pub use stats::{CaptureStats, StatsSnapshot};

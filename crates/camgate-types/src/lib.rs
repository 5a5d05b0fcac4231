//! Shared data model for the CamGate edge gateway.
//!
//! Everything that crosses a crate boundary lives here: the per-camera and
//! device-level state enumerations, the status structures published on the
//! bus, the command/liveness wire envelopes, capture/record/stream profiles,
//! and the crate-wide [`GatewayError`].
//!
//! Wire field names follow the external controller's contract (camelCase,
//! integer state codes), so every published structure carries explicit serde
//! renames rather than relying on Rust field names.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Index of a camera in the static camera map (1-based, matching the
/// controller's addressing).
pub type CameraId = u8;

// ────────────────────────────────────────────────────────────────────────────
// Frames
// ────────────────────────────────────────────────────────────────────────────

/// A raw captured frame (RGB24 pixel data).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Raw pixel data, `width * height * 3` bytes.
    pub data: Vec<u8>,
}

impl Frame {
    /// Expected byte length of the pixel buffer for this frame's dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-camera state machines
// ────────────────────────────────────────────────────────────────────────────

/// Connection state of a camera's capture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Streaming substate.  Only gates whether MJPEG clients are served; frame
/// movement is done by the streaming endpoint itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingState {
    Stopped,
    Streaming,
}

/// Recording substate.  `Saving` is the finalization phase between a stop
/// request (or forced disconnect) and the pipeline's file being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RecordingState {
    Stopped,
    Recording,
    Saving,
}

impl From<RecordingState> for u8 {
    fn from(state: RecordingState) -> u8 {
        match state {
            RecordingState::Stopped => 0,
            RecordingState::Recording => 1,
            RecordingState::Saving => 2,
        }
    }
}

impl TryFrom<u8> for RecordingState {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(RecordingState::Stopped),
            1 => Ok(RecordingState::Recording),
            2 => Ok(RecordingState::Saving),
            other => Err(format!("invalid recording state code: {other}")),
        }
    }
}

/// A one-shot request to a camera's state machine, consumed on the next
/// applicable scheduling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraIntent {
    Connect,
    Disconnect,
    StartStream,
    StopStream,
    StartRecord,
    StopRecord,
}

impl CameraIntent {
    /// Parse the wire-level command string used on the bus command topic.
    pub fn from_wire(cmd: &str) -> Option<Self> {
        match cmd {
            "connect" => Some(CameraIntent::Connect),
            "disconnect" => Some(CameraIntent::Disconnect),
            "start_stream" => Some(CameraIntent::StartStream),
            "stop_stream" => Some(CameraIntent::StopStream),
            "start_record" => Some(CameraIntent::StartRecord),
            "stop_record" => Some(CameraIntent::StopRecord),
            _ => None,
        }
    }

    /// The wire-level command string for this intent.
    pub fn as_wire(&self) -> &'static str {
        match self {
            CameraIntent::Connect => "connect",
            CameraIntent::Disconnect => "disconnect",
            CameraIntent::StartStream => "start_stream",
            CameraIntent::StopStream => "stop_stream",
            CameraIntent::StartRecord => "start_record",
            CameraIntent::StopRecord => "stop_record",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Published status structures
// ────────────────────────────────────────────────────────────────────────────

/// Per-camera status snapshot, recomputed from live device state on every
/// publish tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraStatus {
    pub is_connected: bool,
    pub recording_state: RecordingState,
    pub is_streaming: bool,
    /// e.g. `"/dev/video2"`, empty while disconnected.
    pub video_device_node_string: String,
}

impl Default for CameraStatus {
    fn default() -> Self {
        Self {
            is_connected: false,
            recording_state: RecordingState::Stopped,
            is_streaming: false,
            video_device_node_string: String::new(),
        }
    }
}

/// Mirrored heartbeat counters.  `input` is the value this device last
/// mirrored and echoes back; `output` is the value last received from the
/// external controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub input: u8,
    pub output: u8,
}

/// Device-level status snapshot published on the status topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    /// Per-camera status, ordered by camera id.
    pub cameras: Vec<CameraStatus>,
    pub heartbeat: Heartbeat,
    /// Wire-level supervisory step number (see [`SupervisorStep`]).
    pub step_num: u16,
}

// ────────────────────────────────────────────────────────────────────────────
// Supervisory step machine
// ────────────────────────────────────────────────────────────────────────────

/// Device-level supervisory state machine phase.
///
/// Variant order is the normal progression order, so the derived `Ord`
/// implements the `Aborting < Inactive < Resetting < Idle < Running`
/// comparison used by the forced-abort rules.  The wire-level step numbers
/// come from the controller's PLC-style state space and are *not* ordered;
/// use [`SupervisorStep::step_num`] only for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SupervisorStep {
    Aborting,
    Inactive,
    Resetting,
    Idle,
    Running,
}

impl SupervisorStep {
    /// Wire-level step number published in [`DeviceStatus`].
    pub fn step_num(&self) -> u16 {
        match self {
            SupervisorStep::Aborting => 911,
            SupervisorStep::Inactive => 0,
            SupervisorStep::Resetting => 50,
            SupervisorStep::Idle => 100,
            SupervisorStep::Running => 500,
        }
    }

    /// Parse a wire-level step number.
    pub fn from_step_num(num: u16) -> Option<Self> {
        match num {
            911 => Some(SupervisorStep::Aborting),
            0 => Some(SupervisorStep::Inactive),
            50 => Some(SupervisorStep::Resetting),
            100 => Some(SupervisorStep::Idle),
            500 => Some(SupervisorStep::Running),
            _ => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire envelopes
// ────────────────────────────────────────────────────────────────────────────

/// Generic publish envelope: every message on the status and liveness topics
/// wraps its payload with a millisecond epoch timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wrap `payload` with the current wall-clock timestamp.
    pub fn now(payload: T) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }
}

/// Inbound command envelope on the command topic.
///
/// `params` is positional; the first element addresses the target camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub cmd: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

impl CommandEnvelope {
    /// Extract the addressed camera id from `params[0]`, if present and an
    /// in-range integer.
    pub fn camera_id(&self) -> Option<CameraId> {
        self.params
            .first()
            .and_then(|v| v.as_u64())
            .and_then(|id| CameraId::try_from(id).ok())
    }
}

/// Liveness topic payload: the mirrored heartbeat counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessMsg {
    #[serde(rename = "heartbeatVal")]
    pub heartbeat_val: u8,
}

// ────────────────────────────────────────────────────────────────────────────
// Profiles
// ────────────────────────────────────────────────────────────────────────────

/// Requested capture settings applied when a camera handle is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureProfile {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// FourCC-style compression hint requested from the driver (e.g. "MJPG").
    pub pixel_format: String,
}

impl Default for CaptureProfile {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: 30.0,
            pixel_format: "MJPG".to_string(),
        }
    }
}

/// Settings for an open recording sink, derived from the camera's actual
/// capture dimensions at the moment recording starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordProfile {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl Default for RecordProfile {
    fn default() -> Self {
        let capture = CaptureProfile::default();
        Self {
            width: capture.width,
            height: capture.height,
            frame_rate: capture.frame_rate,
        }
    }
}

/// MJPEG streaming settings.  Deliberately lighter than the capture profile:
/// streaming re-encodes at reduced width/quality and a lower frame rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamProfile {
    pub target_width: u32,
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
    pub frame_rate: f64,
}

impl Default for StreamProfile {
    fn default() -> Self {
        Self {
            target_width: 1280,
            jpeg_quality: 60,
            frame_rate: 20.0,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Crate-wide error type spanning capture faults, recording failures, bus
/// problems, and protocol violations.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("capture fault on camera {camera}: {details}")]
    Capture { camera: CameraId, details: String },

    #[error("recording error: {0}")]
    Recording(String),

    #[error("frame encode error: {0}")]
    Encode(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("unknown camera id: {0}")]
    UnknownCamera(CameraId),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

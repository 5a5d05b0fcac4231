//! Per-camera lifecycle state machine.
//!
//! A [`CameraDevice`] owns the capture handle and the recording pipeline for
//! one camera and advances on every supervisor tick: it drains queued
//! intents, applies state transitions, reads at most one frame and routes it
//! to the latest-frame cell and the recording queue.  Nothing in the tick
//! waits on hardware, disk or clients.
//!
//! State is split across three axes that move independently:
//! connection (via the capture handle), streaming (a flag read by the stream
//! server) and [`RecordingState`].  The one coupling rule is that losing the
//! connection forces an active recording into `Saving` so the file gets
//! closed.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use camgate_hal::{CaptureBackend, FrameSource, RecordingBackend, paths};
use camgate_types::{
    CameraId, CameraIntent, CameraStatus, CaptureProfile, RecordProfile, RecordingState,
};
use tracing::{debug, info, warn};

use crate::frame_cell::FrameCell;
use crate::intents::{IntentQueue, IntentSender, intent_channel};
use crate::pipeline::RecordingPipeline;
use crate::stats::CaptureStats;

/// Static per-camera settings.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub id: CameraId,
    /// Device node string reported in status, e.g. `/dev/video0`.
    pub node: String,
    pub capture: CaptureProfile,
    /// Directory recordings are written into.
    pub video_dir: PathBuf,
    /// Bound on frames queued ahead of the recording sink.
    pub queue_capacity: usize,
    /// How long a stopping recording may take to drain and finalize.
    pub stop_timeout: Duration,
}

impl CameraConfig {
    pub fn new(id: CameraId, node: impl Into<String>, video_dir: PathBuf) -> Self {
        Self {
            id,
            node: node.into(),
            capture: CaptureProfile::default(),
            video_dir,
            queue_capacity: 12,
            stop_timeout: Duration::from_secs(3),
        }
    }
}

/// State shared with the stream server and the supervisor.
#[derive(Debug)]
pub struct CameraShared {
    /// Most recent captured frame.
    pub cell: FrameCell,
    /// Per-camera counters.
    pub stats: Arc<CaptureStats>,
    connected: AtomicBool,
    streaming: AtomicBool,
    node: String,
}

impl CameraShared {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub fn node(&self) -> &str {
        &self.node
    }
}

/// Cloneable handle for queueing intents and observing a camera.
#[derive(Clone)]
pub struct CameraHandle {
    intents: IntentSender,
    shared: Arc<CameraShared>,
}

impl CameraHandle {
    /// Queue an intent for the device's next tick.
    pub fn send(&self, intent: CameraIntent) {
        self.intents.send(intent);
    }

    pub fn shared(&self) -> Arc<CameraShared> {
        Arc::clone(&self.shared)
    }
}

/// One camera's state machine.  Owned and ticked by the supervisor.
pub struct CameraDevice {
    config: CameraConfig,
    shared: Arc<CameraShared>,
    intents: IntentQueue,
    handle: CameraHandle,
    capture_backend: Arc<dyn CaptureBackend>,
    record_backend: Arc<dyn RecordingBackend>,
    source: Option<Box<dyn FrameSource>>,
    pipeline: Option<RecordingPipeline>,
    recording: RecordingState,
    saving_deadline: Option<Instant>,
}

impl CameraDevice {
    pub fn new(
        config: CameraConfig,
        capture_backend: Arc<dyn CaptureBackend>,
        record_backend: Arc<dyn RecordingBackend>,
    ) -> Self {
        let shared = Arc::new(CameraShared {
            cell: FrameCell::new(),
            stats: Arc::new(CaptureStats::default()),
            connected: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            node: config.node.clone(),
        });
        let (sender, intents) = intent_channel();
        let handle = CameraHandle {
            intents: sender,
            shared: Arc::clone(&shared),
        };
        Self {
            config,
            shared,
            intents,
            handle,
            capture_backend,
            record_backend,
            source: None,
            pipeline: None,
            recording: RecordingState::Stopped,
            saving_deadline: None,
        }
    }

    pub fn id(&self) -> CameraId {
        self.config.id
    }

    pub fn handle(&self) -> CameraHandle {
        self.handle.clone()
    }

    pub fn shared(&self) -> Arc<CameraShared> {
        Arc::clone(&self.shared)
    }

    /// Current status snapshot for the bus.
    pub fn status(&self) -> CameraStatus {
        CameraStatus {
            is_connected: self.shared.is_connected(),
            recording_state: self.recording,
            is_streaming: self.shared.is_streaming(),
            video_device_node_string: self.config.node.clone(),
        }
    }

    /// Advance the state machine by one step.  Never blocks.
    pub fn tick(&mut self) {
        while let Some(intent) = self.intents.try_next() {
            self.apply(intent);
        }
        if self.recording == RecordingState::Saving {
            self.poll_saving();
        }
        // A held capture handle is read every tick, streaming or not: the
        // frame cell stays fresh and a dead device is noticed while idle.
        self.capture_one();
    }

    /// Start closing down without blocking: an active recording is sent
    /// through `Saving` and the capture handle is released.  The drain
    /// completes over subsequent ticks; check [`CameraDevice::is_drained`].
    pub fn begin_shutdown(&mut self) {
        self.disconnect();
    }

    /// Whether a previously begun shutdown has fully drained.
    pub fn is_drained(&self) -> bool {
        self.recording == RecordingState::Stopped
    }

    /// Stop everything: close an active recording within the stop timeout
    /// and release the capture handle.
    pub fn shutdown(&mut self) {
        if self.recording == RecordingState::Recording {
            self.begin_saving();
        }
        if let Some(pipeline) = self.pipeline.take() {
            info!(camera = self.config.id, path = %pipeline.path().display(), "closing recording on shutdown");
            pipeline.stop(self.config.stop_timeout);
        }
        self.recording = RecordingState::Stopped;
        self.saving_deadline = None;
        self.release_capture();
    }

    // ────────────────────────────────────────────────────────────────────────
    // Transitions
    // ────────────────────────────────────────────────────────────────────────

    fn apply(&mut self, intent: CameraIntent) {
        match intent {
            CameraIntent::Connect => self.connect(),
            CameraIntent::Disconnect => self.disconnect(),
            CameraIntent::StartStream => {
                if self.shared.is_connected() {
                    // Idempotent: a second start while streaming changes nothing.
                    self.shared.streaming.store(true, Ordering::SeqCst);
                } else {
                    warn!(camera = self.config.id, "stream requested while disconnected");
                }
            }
            CameraIntent::StopStream => {
                self.shared.streaming.store(false, Ordering::SeqCst);
            }
            CameraIntent::StartRecord => self.start_recording(),
            CameraIntent::StopRecord => {
                if self.recording == RecordingState::Recording {
                    self.begin_saving();
                }
            }
        }
    }

    fn connect(&mut self) {
        if self.source.is_some() {
            return;
        }
        match self.capture_backend.open(self.config.id, &self.config.capture) {
            Ok(source) => {
                let actual = source.actual_profile();
                info!(
                    camera = self.config.id,
                    width = actual.width,
                    height = actual.height,
                    "camera connected"
                );
                self.source = Some(source);
                self.shared.connected.store(true, Ordering::SeqCst);
            }
            Err(e) => {
                // The intent is consumed; the caller may issue another one.
                warn!(camera = self.config.id, error = %e, "camera connect failed");
            }
        }
    }

    fn disconnect(&mut self) {
        if self.recording == RecordingState::Recording {
            self.begin_saving();
        }
        self.release_capture();
    }

    fn release_capture(&mut self) {
        if self.source.take().is_some() {
            info!(camera = self.config.id, "camera disconnected");
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.streaming.store(false, Ordering::SeqCst);
        self.shared.cell.clear();
    }

    fn start_recording(&mut self) {
        if self.recording != RecordingState::Stopped {
            warn!(camera = self.config.id, state = ?self.recording, "record requested while busy");
            return;
        }
        let Some(source) = self.source.as_ref() else {
            warn!(camera = self.config.id, "record requested while disconnected");
            return;
        };
        // Size the file from what the hardware actually negotiated.
        let actual = source.actual_profile();
        let profile = RecordProfile {
            width: actual.width,
            height: actual.height,
            frame_rate: actual.frame_rate,
        };
        let path = paths::recording_path(&self.config.video_dir, self.config.id);
        match self.record_backend.open(&path, &profile) {
            Ok(sink) => {
                info!(camera = self.config.id, path = %path.display(), "recording started");
                self.pipeline = Some(RecordingPipeline::spawn(
                    sink,
                    self.config.queue_capacity,
                    Arc::clone(&self.shared.stats),
                    path,
                ));
                self.recording = RecordingState::Recording;
            }
            Err(e) => {
                warn!(camera = self.config.id, path = %path.display(), error = %e, "recording start failed");
            }
        }
    }

    fn begin_saving(&mut self) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.begin_stop();
        }
        self.recording = RecordingState::Saving;
        self.saving_deadline = Some(Instant::now() + self.config.stop_timeout);
    }

    fn poll_saving(&mut self) {
        let done = match self.pipeline.as_mut() {
            Some(pipeline) => pipeline.poll_done(),
            None => true,
        };
        if done {
            if let Some(pipeline) = self.pipeline.take() {
                debug!(camera = self.config.id, path = %pipeline.path().display(), "recording saved");
            }
            self.recording = RecordingState::Stopped;
            self.saving_deadline = None;
        } else if self.saving_deadline.is_some_and(|d| Instant::now() >= d) {
            self.shared
                .stats
                .finalize_overruns
                .fetch_add(1, Ordering::Relaxed);
            if let Some(pipeline) = self.pipeline.take() {
                warn!(
                    camera = self.config.id,
                    path = %pipeline.path().display(),
                    "recording missed the stop deadline; detaching worker"
                );
            }
            self.recording = RecordingState::Stopped;
            self.saving_deadline = None;
        }
    }

    fn capture_one(&mut self) {
        let Some(source) = self.source.as_mut() else {
            return;
        };
        match source.read() {
            Ok(frame) => {
                self.shared.stats.captured.fetch_add(1, Ordering::Relaxed);
                if self.recording == RecordingState::Recording
                    && let Some(pipeline) = self.pipeline.as_ref()
                {
                    pipeline.enqueue(frame.clone());
                }
                self.shared.cell.publish(frame);
            }
            Err(e) => {
                warn!(camera = self.config.id, error = %e, "frame read failed; disconnecting");
                self.disconnect();
            }
        }
    }
}

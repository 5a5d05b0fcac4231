//! In-process synthetic backends for CI and headless testing.
//!
//! [`SyntheticBackend`] stands in for a physical capture driver: it produces
//! deterministic gradient frames tagged with a sequence number, and can be
//! scripted to fail opens or fail reads after a number of frames so the
//! gateway's disconnect/recovery paths are exercisable without unplugging
//! hardware.  [`SyntheticSinkBackend`] is the matching recording side: it
//! captures written frames in memory and can delay finalization to exercise
//! the bounded join timeout.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camgate_types::{CameraId, CaptureProfile, Frame, GatewayError, RecordProfile};

use crate::capture::{CaptureBackend, FrameSource};
use crate::record::{FrameSink, RecordingBackend};

// ────────────────────────────────────────────────────────────────────────────
// Synthetic capture
// ────────────────────────────────────────────────────────────────────────────

/// A deterministic capture backend.  Always negotiates exactly the requested
/// profile.
#[derive(Default)]
pub struct SyntheticBackend {
    /// Number of remaining `open` calls that will fail.
    failing_opens: AtomicU32,
    /// Frames served before every subsequent read fails; unset disables.
    fail_after_frames: Option<u64>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` calls to `open` return an error.
    pub fn with_failing_opens(self, count: u32) -> Self {
        self.failing_opens.store(count, Ordering::SeqCst);
        self
    }

    /// Every source opened by this backend fails its reads after serving
    /// `frames` frames, simulating a mid-session unplug.
    pub fn with_fail_after(mut self, frames: u64) -> Self {
        self.fail_after_frames = Some(frames);
        self
    }
}

impl CaptureBackend for SyntheticBackend {
    fn open(
        &self,
        index: CameraId,
        profile: &CaptureProfile,
    ) -> Result<Box<dyn FrameSource>, GatewayError> {
        let remaining = self.failing_opens.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_opens.store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::Capture {
                camera: index,
                details: "synthetic open failure".to_string(),
            });
        }
        Ok(Box::new(SyntheticSource {
            camera: index,
            profile: profile.clone(),
            sequence: 0,
            fail_after: self.fail_after_frames,
        }))
    }
}

/// Frame source producing gradient frames; byte 0 of every frame carries the
/// low bits of the sequence number so consumers can assert ordering.
pub struct SyntheticSource {
    camera: CameraId,
    profile: CaptureProfile,
    sequence: u64,
    fail_after: Option<u64>,
}

impl FrameSource for SyntheticSource {
    fn read(&mut self) -> Result<Frame, GatewayError> {
        if let Some(limit) = self.fail_after
            && self.sequence >= limit
        {
            return Err(GatewayError::Capture {
                camera: self.camera,
                details: format!("synthetic read failure after {limit} frames"),
            });
        }
        let len = self.profile.width as usize * self.profile.height as usize * 3;
        let mut data = vec![0u8; len];
        for (i, px) in data.iter_mut().enumerate() {
            *px = (self.sequence as usize + i) as u8;
        }
        if let Some(first) = data.first_mut() {
            *first = self.sequence as u8;
        }
        self.sequence += 1;
        Ok(Frame {
            width: self.profile.width,
            height: self.profile.height,
            data,
        })
    }

    fn actual_profile(&self) -> &CaptureProfile {
        &self.profile
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Synthetic recording
// ────────────────────────────────────────────────────────────────────────────

/// A recording backend that stores written frames in memory.
///
/// Every sink opened by one backend instance shares the same capture buffer,
/// so a test can hold the backend and inspect what the pipeline worker wrote.
#[derive(Default, Clone)]
pub struct SyntheticSinkBackend {
    written: Arc<Mutex<Vec<Frame>>>,
    finalized: Arc<Mutex<bool>>,
    finalize_delay: Duration,
    write_delay: Duration,
    failing_writes: bool,
}

impl SyntheticSinkBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside `finalize`, to exercise join timeouts.
    pub fn with_finalize_delay(mut self, delay: Duration) -> Self {
        self.finalize_delay = delay;
        self
    }

    /// Sleep this long per `write`, to simulate a slow disk.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Every `write` on sinks from this backend fails.
    pub fn with_failing_writes(mut self) -> Self {
        self.failing_writes = true;
        self
    }

    /// All frames written so far, in write order.
    pub fn written(&self) -> Vec<Frame> {
        self.written.lock().expect("sink buffer poisoned").clone()
    }

    /// Whether any sink opened by this backend has been finalized.
    pub fn is_finalized(&self) -> bool {
        *self.finalized.lock().expect("sink flag poisoned")
    }
}

impl RecordingBackend for SyntheticSinkBackend {
    fn open(
        &self,
        _path: &std::path::Path,
        _profile: &RecordProfile,
    ) -> Result<Box<dyn FrameSink>, GatewayError> {
        Ok(Box::new(SyntheticSink {
            written: Arc::clone(&self.written),
            finalized: Arc::clone(&self.finalized),
            finalize_delay: self.finalize_delay,
            write_delay: self.write_delay,
            failing_writes: self.failing_writes,
        }))
    }
}

struct SyntheticSink {
    written: Arc<Mutex<Vec<Frame>>>,
    finalized: Arc<Mutex<bool>>,
    finalize_delay: Duration,
    write_delay: Duration,
    failing_writes: bool,
}

impl FrameSink for SyntheticSink {
    fn write(&mut self, frame: &Frame) -> Result<(), GatewayError> {
        if !self.write_delay.is_zero() {
            std::thread::sleep(self.write_delay);
        }
        if self.failing_writes {
            return Err(GatewayError::Recording(
                "synthetic write failure".to_string(),
            ));
        }
        self.written
            .lock()
            .expect("sink buffer poisoned")
            .push(frame.clone());
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), GatewayError> {
        if !self.finalize_delay.is_zero() {
            std::thread::sleep(self.finalize_delay);
        }
        *self.finalized.lock().expect("sink flag poisoned") = true;
        Ok(())
    }
}

//! Recording capability boundary.
//!
//! A [`RecordingBackend`] opens one [`FrameSink`] per recording job.  Codec
//! internals are out of scope for the gateway: hardware-encoder backends
//! implement these traits elsewhere, and [`MjvFileBackend`] provides a
//! dependency-free length-prefixed container so recordings work end to end
//! on any host.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use camgate_types::{Frame, GatewayError, RecordProfile};

/// An open recording file.  Frames are written strictly in call order.
pub trait FrameSink: Send {
    /// Append one frame to the file.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Recording`] on a write failure.  The caller
    /// logs and counts the failure but keeps the sink open; persistence is
    /// best effort.
    fn write(&mut self, frame: &Frame) -> Result<(), GatewayError>;

    /// Flush and close the file.  Must be called exactly once, after which
    /// the sink is dropped.
    fn finalize(&mut self) -> Result<(), GatewayError>;
}

/// Factory for [`FrameSink`]s.
pub trait RecordingBackend: Send + Sync {
    /// Open a sink at `path`, sized for the given profile.
    fn open(
        &self,
        path: &Path,
        profile: &RecordProfile,
    ) -> Result<Box<dyn FrameSink>, GatewayError>;
}

// ────────────────────────────────────────────────────────────────────────────
// MJV file container
// ────────────────────────────────────────────────────────────────────────────

/// Magic bytes at the start of every `.mjv` file.
const MJV_MAGIC: &[u8; 4] = b"MJV0";

/// Opens [`MjvFileSink`]s: a minimal length-prefixed frame container.
///
/// Layout: `MJV0` magic, then the record profile header (width, height as
/// little-endian u32, frame rate as little-endian f64), then one record per
/// frame (payload length, width, height as little-endian u32, raw pixel
/// bytes).
#[derive(Debug, Default, Clone, Copy)]
pub struct MjvFileBackend;

impl RecordingBackend for MjvFileBackend {
    fn open(
        &self,
        path: &Path,
        profile: &RecordProfile,
    ) -> Result<Box<dyn FrameSink>, GatewayError> {
        let file = File::create(path)
            .map_err(|e| GatewayError::Recording(format!("create {}: {e}", path.display())))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MJV_MAGIC)?;
        writer.write_all(&profile.width.to_le_bytes())?;
        writer.write_all(&profile.height.to_le_bytes())?;
        writer.write_all(&profile.frame_rate.to_le_bytes())?;
        Ok(Box::new(MjvFileSink { writer }))
    }
}

/// A sink writing the `.mjv` container described on [`MjvFileBackend`].
pub struct MjvFileSink {
    writer: BufWriter<File>,
}

impl FrameSink for MjvFileSink {
    fn write(&mut self, frame: &Frame) -> Result<(), GatewayError> {
        let len = u32::try_from(frame.data.len())
            .map_err(|_| GatewayError::Recording("frame payload exceeds u32".to_string()))?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(&frame.width.to_le_bytes())?;
        self.writer.write_all(&frame.height.to_le_bytes())?;
        self.writer.write_all(&frame.data)?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), GatewayError> {
        self.writer.flush()?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| GatewayError::Recording(format!("sync: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame(seq: u8) -> Frame {
        Frame {
            width: 4,
            height: 2,
            data: vec![seq; 24],
        }
    }

    #[test]
    fn mjv_file_has_header_and_frames() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("out.mjv");
        let profile = RecordProfile {
            width: 4,
            height: 2,
            frame_rate: 30.0,
        };

        let backend = MjvFileBackend;
        let mut sink = backend.open(&path, &profile).expect("open");
        sink.write(&test_frame(1)).expect("write 1");
        sink.write(&test_frame(2)).expect("write 2");
        sink.finalize().expect("finalize");

        let bytes = std::fs::read(&path).expect("read back");
        assert_eq!(&bytes[..4], MJV_MAGIC);
        // header (4 + 4 + 4 + 8) + 2 frames of (12 header + 24 payload)
        assert_eq!(bytes.len(), 20 + 2 * 36);
        // first frame record starts right after the header
        assert_eq!(u32::from_le_bytes(bytes[20..24].try_into().unwrap()), 24);
    }

    #[test]
    fn open_fails_for_missing_directory() {
        let profile = RecordProfile {
            width: 1,
            height: 1,
            frame_rate: 1.0,
        };
        let result = MjvFileBackend.open(Path::new("/nonexistent/dir/out.mjv"), &profile);
        assert!(matches!(result, Err(GatewayError::Recording(_))));
    }
}

//! Recording file layout.
//!
//! Recordings land under the configured video directory.  When a job/batch
//! pair is known the files are grouped per session; otherwise they go to the
//! directory root.  File names carry the camera index and a millisecond
//! timestamp so concurrent recorders never collide.

use std::path::{Path, PathBuf};

use camgate_types::{CameraId, GatewayError};
use chrono::Utc;

/// Ensure the session directory `<video_dir>/<job>/<batch>` exists and
/// return it.
///
/// # Errors
///
/// Returns [`GatewayError::Io`] when the directory cannot be created.
pub fn session_dir(video_dir: &Path, job: &str, batch: &str) -> Result<PathBuf, GatewayError> {
    let dir = video_dir.join(job).join(batch);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Build the output path for a new recording from camera `index` inside
/// `dir`, stamped with the current wall-clock time.
pub fn recording_path(dir: &Path, index: CameraId) -> PathBuf {
    dir.join(format!("cam{index}-{}.mjv", Utc::now().timestamp_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn session_dir_creates_nested_layout() {
        let root = tempdir().unwrap();
        let dir = session_dir(root.path(), "job-17", "batch-3").unwrap();
        assert!(dir.is_dir());
        assert!(dir.ends_with("job-17/batch-3"));
    }

    #[test]
    fn session_dir_is_idempotent() {
        let root = tempdir().unwrap();
        let first = session_dir(root.path(), "j", "b").unwrap();
        let second = session_dir(root.path(), "j", "b").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn recording_path_carries_camera_index_and_extension() {
        let dir = PathBuf::from("/var/video");
        let path = recording_path(&dir, 4);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("cam4-"));
        assert!(name.ends_with(".mjv"));
    }
}

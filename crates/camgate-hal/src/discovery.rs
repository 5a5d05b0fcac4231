//! V4L2 camera discovery via OS tooling.
//!
//! Cameras are addressed by USB serial number in the static camera map, but
//! the kernel assigns `/dev/videoN` indices in plug order.  This module
//! shells out to `v4l2-ctl --list-devices` and `udevadm info` to resolve one
//! into the other.  Both tools being absent is a normal condition on
//! development hosts; all failures degrade to warnings and empty results.

use std::process::Command;

use camgate_types::{CameraId, GatewayError};
use tracing::warn;

/// One physical camera found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCamera {
    /// First `/dev/videoN` index belonging to the device.
    pub index: CameraId,
    /// Human-readable device name from the driver.
    pub name: String,
    /// USB serial short id, or `"N/A"` when the device reports none.
    pub serial: String,
}

/// Look up the USB serial number for `/dev/video{index}`.
///
/// # Errors
///
/// Returns [`GatewayError::Capture`] when `udevadm` is missing or exits
/// non-zero.
pub fn camera_serial(index: CameraId) -> Result<String, GatewayError> {
    let device = format!("/dev/video{index}");
    let output = Command::new("udevadm")
        .args(["info", "--name", &device])
        .output()
        .map_err(|e| GatewayError::Capture {
            camera: index,
            details: format!("udevadm spawn failed: {e}"),
        })?;
    if !output.status.success() {
        return Err(GatewayError::Capture {
            camera: index,
            details: format!(
                "udevadm failed for {device}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(parse_serial(&String::from_utf8_lossy(&output.stdout)))
}

/// Enumerate unique cameras on the host, sorted by index, with serials
/// resolved where possible.
pub fn list_cameras() -> Vec<DiscoveredCamera> {
    let output = match Command::new("v4l2-ctl").arg("--list-devices").output() {
        Ok(out) if out.status.success() => out,
        Ok(out) => {
            warn!(
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "v4l2-ctl --list-devices failed"
            );
            return Vec::new();
        }
        Err(e) => {
            warn!(error = %e, "v4l2-ctl not available; camera discovery disabled");
            return Vec::new();
        }
    };

    let mut cameras = parse_device_list(&String::from_utf8_lossy(&output.stdout));
    for cam in &mut cameras {
        cam.serial = match camera_serial(cam.index) {
            Ok(serial) => serial,
            Err(e) => {
                warn!(index = cam.index, error = %e, "serial lookup failed");
                "N/A".to_string()
            }
        };
    }
    cameras
}

/// Resolve a camera map serial to a live `/dev/videoN` index.
pub fn index_by_serial(serial: &str) -> Option<CameraId> {
    list_cameras()
        .into_iter()
        .find(|cam| cam.serial == serial)
        .map(|cam| cam.index)
}

// ────────────────────────────────────────────────────────────────────────────
// Output parsing
// ────────────────────────────────────────────────────────────────────────────

/// Extract `ID_SERIAL_SHORT=` from `udevadm info` output, falling back to
/// `"N/A"` when the property is absent.
fn parse_serial(output: &str) -> String {
    output
        .lines()
        .find_map(|line| line.split_once("ID_SERIAL_SHORT=").map(|(_, v)| v.trim()))
        .filter(|v| !v.is_empty())
        .unwrap_or("N/A")
        .to_string()
}

/// Parse `v4l2-ctl --list-devices` output.
///
/// The tool emits a device name line followed by one or more indented
/// `/dev/*` node lines.  A single physical camera exposes several nodes;
/// only the first `/dev/videoN` per unique name is kept.
fn parse_device_list(output: &str) -> Vec<DiscoveredCamera> {
    let mut cameras: Vec<DiscoveredCamera> = Vec::new();
    let mut current_name: Option<String> = None;

    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with("/dev/") {
            // Strip the trailing bus id "(usb-...)" and colon.
            let name = line
                .split('(')
                .next()
                .unwrap_or(line)
                .trim_end_matches(':')
                .trim()
                .to_string();
            current_name = Some(name);
        } else if let Some(rest) = line.strip_prefix("/dev/video")
            && let Ok(index) = rest.parse::<CameraId>()
            && let Some(name) = current_name.as_ref()
            && !cameras.iter().any(|c| &c.name == name)
        {
            cameras.push(DiscoveredCamera {
                index,
                name: name.clone(),
                serial: String::new(),
            });
        }
    }

    cameras.sort_by_key(|c| c.index);
    cameras
}

//! Preview frame encoding: downscale to the stream width and JPEG-compress.

use camgate_types::{Frame, GatewayError, StreamProfile};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Encode `frame` for a stream client.
///
/// Frames wider than the profile width are downscaled (aspect preserved)
/// before encoding; smaller frames are passed through at native size.
///
/// # Errors
///
/// Returns [`GatewayError::Encode`] when the frame buffer does not match
/// its declared dimensions or the JPEG encoder fails.
pub fn encode_jpeg(frame: &Frame, profile: &StreamProfile) -> Result<Vec<u8>, GatewayError> {
    let image =
        RgbImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or_else(|| {
            GatewayError::Encode(format!(
                "frame buffer is {} bytes for {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            ))
        })?;

    let image = if frame.width > profile.target_width {
        let height =
            ((frame.height as f64 * profile.target_width as f64 / frame.width as f64).round() as u32)
                .max(1);
        imageops::resize(&image, profile.target_width, height, FilterType::Triangle)
    } else {
        image
    };

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, profile.jpeg_quality)
        .encode_image(&image)
        .map_err(|e| GatewayError::Encode(e.to_string()))?;
    Ok(jpeg)
}

use chrono::Utc;

use crate::types::{Frame, FrameFormat};

/// Decode an encoded image payload (JPEG from the camera, PNG accepted too) into an RGB frame.
pub fn decode_frame(payload: &[u8], sequence: u64) -> Result<Frame, image::ImageError> {
    let rgb = image::load_from_memory(payload)?.into_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(Frame {
        data: rgb.into_raw(),
        width: width as i32,
        height: height as i32,
        timestamp_ms: Utc::now().timestamp_millis(),
        sequence,
        format: FrameFormat::Rgb8,
    })
}

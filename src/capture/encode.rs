use crate::config::CaptureConfig;
use crate::error::CaptureError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::{debug, warn};

/// One frame encoded for transmission
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Base64 text payload
    pub data: String,
    /// JPEG quality the emitted encoding used
    pub quality: u8,
    /// Encoded size before base64 expansion
    pub byte_len: usize,
}

/// Render the source image into the fixed-size target canvas.
///
/// Downstream encoding behavior stays consistent regardless of the native
/// source resolution.
pub(crate) fn render_canvas(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        image.clone()
    } else {
        imageops::resize(image, width, height, FilterType::Triangle)
    }
}

/// Encode a rendered canvas at the primary quality, re-encoding exactly once
/// at the fallback quality if the result exceeds the payload budget. The
/// budget is best-effort: an over-budget fallback encoding still emits.
pub(crate) fn encode_adaptive(
    canvas: &RgbImage,
    config: &CaptureConfig,
) -> Result<EncodedFrame, CaptureError> {
    let primary = encode_jpeg(canvas, config.primary_quality)?;

    let (bytes, quality) = if primary.len() > config.max_payload_bytes {
        debug!(
            "Frame of {} bytes over {} byte budget, re-encoding at quality {}",
            primary.len(),
            config.max_payload_bytes,
            config.fallback_quality
        );
        (
            encode_jpeg(canvas, config.fallback_quality)?,
            config.fallback_quality,
        )
    } else {
        (primary, config.primary_quality)
    };

    if bytes.len() > config.max_payload_bytes {
        warn!(
            "Fallback encoding still {} bytes over budget, emitting anyway",
            bytes.len() - config.max_payload_bytes
        );
    }

    let data = BASE64.encode(&bytes);
    if !is_base64_alphabet(&data) {
        return Err(CaptureError::InvalidPayload);
    }

    Ok(EncodedFrame {
        data,
        quality,
        byte_len: bytes.len(),
    })
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode_image(image)
        .map_err(|e| CaptureError::Encoding {
            details: e.to_string(),
        })?;
    Ok(buf)
}

/// Validate the payload against the expected transport alphabet
pub(crate) fn is_base64_alphabet(payload: &str) -> bool {
    payload
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VisionConfig;

    fn canvas(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
        })
    }

    #[test]
    fn test_render_canvas_resizes_to_target() {
        let rendered = render_canvas(&canvas(1280, 720), 640, 480);
        assert_eq!(rendered.dimensions(), (640, 480));

        let rendered = render_canvas(&canvas(320, 240), 640, 480);
        assert_eq!(rendered.dimensions(), (640, 480));
    }

    #[test]
    fn test_within_budget_keeps_primary_quality() {
        let config = VisionConfig::default().capture;
        let frame = encode_adaptive(&canvas(640, 480), &config).unwrap();
        assert_eq!(frame.quality, config.primary_quality);
        assert!(frame.byte_len <= config.max_payload_bytes);
    }

    #[test]
    fn test_over_budget_falls_back_exactly_one_step() {
        let mut config = VisionConfig::default().capture;
        // Force the primary encoding over budget
        config.max_payload_bytes = 1;
        let frame = encode_adaptive(&canvas(640, 480), &config).unwrap();

        // The fallback emits even though it is still over the cap
        assert_eq!(frame.quality, config.fallback_quality);
        assert!(frame.byte_len > config.max_payload_bytes);
    }

    #[test]
    fn test_fallback_shrinks_payload() {
        let config = VisionConfig::default().capture;
        let primary = encode_jpeg(&canvas(640, 480), config.primary_quality).unwrap();
        let fallback = encode_jpeg(&canvas(640, 480), config.fallback_quality).unwrap();
        assert!(fallback.len() < primary.len());
    }

    #[test]
    fn test_payload_is_transport_safe() {
        let config = VisionConfig::default().capture;
        let frame = encode_adaptive(&canvas(640, 480), &config).unwrap();
        assert!(is_base64_alphabet(&frame.data));
    }

    #[test]
    fn test_alphabet_validation() {
        assert!(is_base64_alphabet("QUJDRA=="));
        assert!(is_base64_alphabet(""));
        assert!(!is_base64_alphabet("not base64!"));
        assert!(!is_base64_alphabet("line\nbreak"));
    }
}

//! JPEG encoding of sampled frames

use crate::error::{MediaError, MediaResult};
use crate::frame::{EncodedFrame, RawFrame};
use bytes::Bytes;
use image::codecs::jpeg;

/// Quality used when the requested fraction is outside 0.0..=1.0
pub const DEFAULT_QUALITY: f32 = 0.92;

/// Map a 0.0..=1.0 quality fraction onto the encoder's 1..=100 scale
///
/// Out-of-range or NaN fractions fall back to [`DEFAULT_QUALITY`].
pub fn encoder_quality(quality: f32) -> u8 {
    let fraction = if (0.0..=1.0).contains(&quality) {
        quality
    } else {
        DEFAULT_QUALITY
    };
    ((fraction * 100.0).round() as u8).clamp(1, 100)
}

/// Reusable JPEG encoder
#[derive(Debug, Default)]
pub struct JpegEncoder {
    last_size: usize,
}

impl JpegEncoder {
    /// Create new encoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `frame` at `quality`
    pub fn encode(
        &mut self,
        frame: &RawFrame,
        quality: f32,
        sequence: u64,
    ) -> MediaResult<EncodedFrame> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(MediaError::EncodingFailed {
                codec: "JPEG".to_string(),
                reason: "empty frame".to_string(),
            });
        }

        let mut data = Vec::with_capacity(self.last_size);
        {
            let mut encoder = jpeg::JpegEncoder::new_with_quality(&mut data, encoder_quality(quality));
            encoder
                .encode_image(&frame.image)
                .map_err(|e| MediaError::EncodingFailed {
                    codec: "JPEG".to_string(),
                    reason: e.to_string(),
                })?;
        }
        self.last_size = data.len();

        Ok(EncodedFrame {
            data: Bytes::from(data),
            width: frame.width(),
            height: frame.height(),
            quality,
            sequence,
            timestamp: frame.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::time::Duration;

    fn gradient(width: u32, height: u32) -> RawFrame {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
        });
        RawFrame::new(image, Duration::from_millis(40), 3)
    }

    #[test]
    fn test_encoder_quality_mapping() {
        assert_eq!(encoder_quality(0.5), 50);
        assert_eq!(encoder_quality(1.0), 100);
        assert_eq!(encoder_quality(0.0), 1);
        assert_eq!(encoder_quality(0.85), 85);
        assert_eq!(encoder_quality(1.5), 92);
        assert_eq!(encoder_quality(f32::NAN), 92);
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let mut encoder = JpegEncoder::new();
        let frame = encoder.encode(&gradient(64, 48), 0.8, 7).unwrap();

        assert!(frame.is_jpeg());
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.timestamp, Duration::from_millis(40));
        assert_eq!(frame.quality, 0.8);
    }

    #[test]
    fn test_lower_quality_is_smaller() {
        let mut encoder = JpegEncoder::new();
        let source = gradient(160, 120);
        let high = encoder.encode(&source, 1.0, 1).unwrap();
        let low = encoder.encode(&source, 0.1, 2).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_empty_frame_rejected() {
        let mut encoder = JpegEncoder::new();
        let empty = RawFrame::new(RgbImage::new(0, 0), Duration::ZERO, 0);
        assert!(matches!(
            encoder.encode(&empty, 0.8, 1),
            Err(MediaError::EncodingFailed { .. })
        ));
    }
}

//! Frame types
//!
//! [`RawFrame`] is what a capture stream exposes as its current picture;
//! [`EncodedFrame`] is the JPEG payload handed to the transport.

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use image::RgbImage;
use std::time::Duration;

/// MIME type of encoded frames
pub const JPEG_MIME: &str = "image/jpeg";

/// Uncompressed frame sampled from a capture stream
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// RGB pixel data
    pub image: RgbImage,
    /// Time since the stream was opened
    pub timestamp: Duration,
    /// Frame number assigned by the stream
    pub frame_number: u64,
}

impl RawFrame {
    /// Create a new frame
    pub fn new(image: RgbImage, timestamp: Duration, frame_number: u64) -> Self {
        Self {
            image,
            timestamp,
            frame_number,
        }
    }

    /// Frame width in pixels
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Frame height in pixels
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// JPEG-compressed frame
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    /// JPEG bytes
    pub data: Bytes,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Quality fraction the frame was encoded with
    pub quality: f32,
    /// Capture-source sequence number
    pub sequence: u64,
    /// Time since the stream was opened
    pub timestamp: Duration,
}

impl EncodedFrame {
    /// Encoded size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no data
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the payload starts with a JPEG start-of-image marker
    pub fn is_jpeg(&self) -> bool {
        self.data.starts_with(&[0xFF, 0xD8])
    }

    /// Render as a `data:image/jpeg;base64,...` URL
    pub fn to_data_url(&self) -> String {
        let mut url = String::with_capacity(23 + self.data.len().div_ceil(3) * 4);
        url.push_str("data:");
        url.push_str(JPEG_MIME);
        url.push_str(";base64,");
        STANDARD.encode_string(&self.data, &mut url);
        url
    }
}

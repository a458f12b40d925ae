//! Configuration types and defaults

use crate::{CamcastError, CamcastResult, CaptureConfig, ConnectionConfig, EncodedFrame, Payload};
use serde::Serialize;
use std::time::Duration;

/// Lowest accepted frame rate
pub const MIN_FRAME_RATE: u32 = 1;
/// Highest accepted frame rate
pub const MAX_FRAME_RATE: u32 = 30;
/// Frame rate used when none is given
pub const DEFAULT_FRAME_RATE: u32 = 15;

/// Lowest accepted JPEG quality
pub const MIN_QUALITY: f32 = 0.10;
/// Highest accepted JPEG quality
pub const MAX_QUALITY: f32 = 1.00;
/// Quality used when none is given
pub const DEFAULT_QUALITY: f32 = 0.80;

// Quality is kept on a 0.05 grid.
const QUALITY_STEPS: f32 = 20.0;
const QUALITY_TOLERANCE: f32 = 1e-4;

/// Check a frame rate against the accepted range
pub fn validate_frame_rate(frame_rate: u32) -> CamcastResult<u32> {
    if !(MIN_FRAME_RATE..=MAX_FRAME_RATE).contains(&frame_rate) {
        return Err(CamcastError::InvalidConfiguration {
            field: "frame_rate".to_string(),
            reason: format!(
                "{} is outside {}-{} fps",
                frame_rate, MIN_FRAME_RATE, MAX_FRAME_RATE
            ),
        });
    }
    Ok(frame_rate)
}

/// Check a quality fraction against the accepted range and snap it to the 0.05 grid
pub fn normalize_quality(quality: f32) -> CamcastResult<f32> {
    let in_range = quality >= MIN_QUALITY - QUALITY_TOLERANCE
        && quality <= MAX_QUALITY + QUALITY_TOLERANCE;
    if !in_range {
        return Err(CamcastError::InvalidConfiguration {
            field: "quality".to_string(),
            reason: format!(
                "{} is outside {:.2}-{:.2}",
                quality, MIN_QUALITY, MAX_QUALITY
            ),
        });
    }
    let steps = (quality * QUALITY_STEPS).round().clamp(2.0, QUALITY_STEPS);
    Ok(steps / QUALITY_STEPS)
}

/// Frame cadence and encode quality
///
/// Always holds validated values; build through [`StreamSettings::new`] or the
/// `with_*` methods.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StreamSettings {
    frame_rate: u32,
    quality: f32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl StreamSettings {
    /// Create validated settings
    pub fn new(frame_rate: u32, quality: f32) -> CamcastResult<Self> {
        Ok(Self {
            frame_rate: validate_frame_rate(frame_rate)?,
            quality: normalize_quality(quality)?,
        })
    }

    /// Copy with a different frame rate
    pub fn with_frame_rate(self, frame_rate: u32) -> CamcastResult<Self> {
        Ok(Self {
            frame_rate: validate_frame_rate(frame_rate)?,
            ..self
        })
    }

    /// Copy with a different quality
    pub fn with_quality(self, quality: f32) -> CamcastResult<Self> {
        Ok(Self {
            quality: normalize_quality(quality)?,
            ..self
        })
    }

    /// Frames per second
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// JPEG quality fraction
    pub fn quality(&self) -> f32 {
        self.quality
    }

    /// Time between ticks, `1000 / frame_rate` milliseconds
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.frame_rate))
    }
}

/// How encoded frames are put on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum PayloadFormat {
    /// `data:image/jpeg;base64,...` in a text frame
    #[default]
    DataUrl,
    /// Raw JPEG bytes in a binary frame
    Binary,
}

impl PayloadFormat {
    /// Wrap `frame` for the transport
    pub fn encode(&self, frame: &EncodedFrame) -> Payload {
        match self {
            PayloadFormat::DataUrl => Payload::Text(frame.to_data_url()),
            PayloadFormat::Binary => Payload::Binary(frame.data.clone()),
        }
    }
}

/// When the streaming loop gives up on a dead connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailurePolicy {
    /// Failed sends in a row that stop streaming; `None` never stops
    pub max_consecutive_send_failures: Option<u32>,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            max_consecutive_send_failures: Some(30),
        }
    }
}

impl FailurePolicy {
    /// Keep ticking regardless of send failures
    pub fn unlimited() -> Self {
        Self {
            max_consecutive_send_failures: None,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> CamcastResult<()> {
        if self.max_consecutive_send_failures == Some(0) {
            return Err(CamcastError::InvalidConfiguration {
                field: "failure_policy.max_consecutive_send_failures".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Whether `consecutive_failures` reaches the limit
    pub fn exceeded(&self, consecutive_failures: u32) -> bool {
        self.max_consecutive_send_failures
            .is_some_and(|limit| consecutive_failures >= limit)
    }
}

/// Streamer configuration
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamerConfig {
    /// Endpoint used by `connect` when no address is given
    pub endpoint: Option<String>,
    /// Transport settings
    pub connection: ConnectionConfig,
    /// Camera request
    pub capture: CaptureConfig,
    /// Initial cadence and quality
    pub settings: StreamSettings,
    /// Wire format of frames
    pub payload_format: PayloadFormat,
    /// Send failure handling
    pub failure_policy: FailurePolicy,
}

impl StreamerConfig {
    /// Validate configuration
    pub fn validate(&self) -> CamcastResult<()> {
        self.connection.validate()?;
        self.capture
            .validate()
            .map_err(|e| CamcastError::InvalidConfiguration {
                field: "capture".to_string(),
                reason: e.to_string(),
            })?;
        self.failure_policy.validate()?;
        if let Some(endpoint) = &self.endpoint {
            camcast_core::validate_address(endpoint)?;
        }
        Ok(())
    }
}

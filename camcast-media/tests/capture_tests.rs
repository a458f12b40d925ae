//! Integration tests for the capture source
//!
//! Exercises the camera lifecycle, failure reporting and frame encoding against
//! the synthetic backend.

use camcast_media::*;
use std::sync::Arc;
use std::time::Duration;

fn small_config() -> CaptureConfig {
    CaptureConfig {
        resolution: VideoResolution::new(64, 48),
        ..CaptureConfig::default()
    }
}

fn synthetic_source() -> (CaptureSource, SyntheticBackend) {
    let backend = SyntheticBackend::new();
    let source = CaptureSource::new(Arc::new(backend.clone()), small_config());
    (source, backend)
}

// ============================================================================
// LIFECYCLE TESTS
// ============================================================================

#[tokio::test]
async fn test_capture_config_default() {
    let config = CaptureConfig::default();

    assert_eq!(config.resolution.width, 1280);
    assert_eq!(config.resolution.height, 720);
    assert_eq!(config.facing, FacingMode::User);
    assert!(config.device_index.is_none());
    assert_eq!(config.open_timeout, Duration::from_secs(10));
}

#[tokio::test]
async fn test_start_emits_events() {
    let (source, _backend) = synthetic_source();
    let mut events = source.subscribe_events();

    source.start().await.unwrap();
    assert_eq!(events.recv().await.unwrap(), CaptureEvent::Starting);
    match events.recv().await.unwrap() {
        CaptureEvent::Started { resolution, device } => {
            assert_eq!(resolution, VideoResolution::new(64, 48));
            assert!(device.contains("front"));
        }
        other => panic!("expected Started, got {:?}", other),
    }

    source.stop();
    assert_eq!(events.recv().await.unwrap(), CaptureEvent::Stopped);
}

#[tokio::test]
async fn test_denied_access_sets_generic_error() {
    let (source, backend) = synthetic_source();
    backend.deny_access();

    let err = source.start().await.unwrap_err();
    assert!(err.is_access_failure());

    let session = source.session();
    assert!(!session.active);
    assert!(!session.loading);
    assert_eq!(session.error.as_deref(), Some(CAPTURE_ERROR_MESSAGE));

    // A later successful start clears the error.
    backend.grant_access();
    source.start().await.unwrap();
    assert!(source.is_active());
    assert!(source.error().is_none());
}

#[tokio::test]
async fn test_missing_device_uses_same_message() {
    let (source, backend) = synthetic_source();
    backend.disconnect_device();

    assert!(matches!(
        source.start().await,
        Err(MediaError::DeviceNotFound { .. })
    ));
    assert_eq!(source.error().as_deref(), Some(CAPTURE_ERROR_MESSAGE));
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_inflight_start() {
    let (source, backend) = synthetic_source();
    backend.set_open_delay(Some(Duration::from_millis(500)));

    let starter = source.clone();
    let start = tokio::spawn(async move { starter.start().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(source.is_loading());

    // A second start while loading does not open again.
    source.start().await.unwrap();

    source.stop();
    assert!(!source.is_loading());

    let result = start.await.unwrap();
    assert!(matches!(result, Err(MediaError::StartCancelled)));
    assert!(!source.is_active());
    assert_eq!(backend.live_streams(), 0);
    assert_eq!(backend.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_timeout() {
    let backend = SyntheticBackend::new();
    backend.set_open_delay(Some(Duration::from_secs(60)));
    let config = CaptureConfig {
        open_timeout: Duration::from_secs(2),
        ..small_config()
    };
    let source = CaptureSource::new(Arc::new(backend), config);

    assert!(matches!(
        source.start().await,
        Err(MediaError::Timeout { .. })
    ));
    assert_eq!(source.error().as_deref(), Some(CAPTURE_ERROR_MESSAGE));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_start_can_be_retried() {
    let (source, backend) = synthetic_source();
    backend.set_open_delay(Some(Duration::from_millis(200)));

    let abandoned = tokio::time::timeout(Duration::from_millis(20), source.start()).await;
    assert!(abandoned.is_err());
    assert!(!source.is_loading());
    assert!(!source.is_active());
    assert_eq!(backend.live_streams(), 0);

    source.start().await.unwrap();
    assert!(source.is_active());
    assert_eq!(backend.open_count(), 2);
    assert_eq!(backend.live_streams(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_aborted_start_task_can_be_retried() {
    let (source, backend) = synthetic_source();
    backend.set_open_delay(Some(Duration::from_millis(200)));

    let starter = source.clone();
    let start = tokio::spawn(async move { starter.start().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(source.is_loading());

    start.abort();
    assert!(start.await.unwrap_err().is_cancelled());
    assert!(!source.is_loading());

    source.start().await.unwrap();
    assert!(source.is_active());
}

#[tokio::test]
async fn test_drop_releases_device() {
    let (source, backend) = synthetic_source();
    source.start().await.unwrap();
    assert_eq!(backend.live_streams(), 1);

    drop(source);
    assert_eq!(backend.live_streams(), 0);
}

// ============================================================================
// FRAME CAPTURE TESTS
// ============================================================================

#[tokio::test]
async fn test_capture_returns_none_when_inactive() {
    let (source, _backend) = synthetic_source();
    assert!(source.capture_frame(0.8).is_none());

    source.start().await.unwrap();
    assert!(source.capture_frame(0.8).is_some());

    source.stop();
    assert!(source.capture_frame(0.8).is_none());
    assert!(source.capture_frame(0.8).is_none());
}

#[tokio::test]
async fn test_capture_produces_data_url() {
    let (source, _backend) = synthetic_source();
    source.start().await.unwrap();

    let frame = source.capture_frame(0.5).unwrap();
    assert!(frame.is_jpeg());
    assert_eq!((frame.width, frame.height), (64, 48));
    assert!(frame.to_data_url().starts_with("data:image/jpeg;base64,/9j/"));

    let next = source.capture_frame(0.5).unwrap();
    assert_eq!(next.sequence, frame.sequence + 1);
}

#[tokio::test]
async fn test_device_loss_stops_source() {
    let (source, backend) = synthetic_source();
    source.start().await.unwrap();
    let mut active = source.subscribe_active();
    let mut events = source.subscribe_events();

    backend.disconnect_device();
    assert!(source.capture_frame(0.8).is_none());

    assert!(!source.is_active());
    active.wait_for(|active| !*active).await.unwrap();
    assert!(matches!(
        events.recv().await.unwrap(),
        CaptureEvent::Failed { .. }
    ));
    assert_eq!(backend.live_streams(), 0);
    tokio_test::assert_err!(source.start().await);
}

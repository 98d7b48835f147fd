use super::*;
use crate::config::VisionConfig;
use crate::error::CaptureError;
use crate::events::EventBus;
use crate::frame::FrameStore;
use async_trait::async_trait;
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Capture source with test-controllable dimensions and failure modes
struct MockSource {
    fail_open: bool,
    dims: Arc<parking_lot::Mutex<(u32, u32)>>,
    grabs: Arc<AtomicU64>,
}

impl MockSource {
    fn new(fail_open: bool, dims: Arc<parking_lot::Mutex<(u32, u32)>>) -> Self {
        Self {
            fail_open,
            dims,
            grabs: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl CaptureSource for MockSource {
    async fn open(&mut self, _constraints: &CaptureConstraints) -> Result<(), CaptureError> {
        if self.fail_open {
            return Err(CaptureError::Unavailable {
                details: "permission denied".to_string(),
            });
        }
        Ok(())
    }

    fn dimensions(&self) -> (u32, u32) {
        *self.dims.lock()
    }

    fn grab(&mut self) -> Result<RgbImage, CaptureError> {
        self.grabs.fetch_add(1, Ordering::Relaxed);
        let (width, height) = *self.dims.lock();
        Ok(RgbImage::from_pixel(width, height, image::Rgb([40, 80, 120])))
    }

    async fn close(&mut self) {}
}

fn test_pipeline(
    source: Box<dyn CaptureSource>,
) -> (CapturePipeline, Arc<FrameStore>, Arc<EventBus>) {
    let mut config = VisionConfig::default().capture;
    config.fps = 100; // fast cadence to keep tests short
    let frame_store = Arc::new(FrameStore::new());
    let event_bus = Arc::new(EventBus::new(256));
    let pipeline = CapturePipeline::new(
        config,
        source,
        Arc::clone(&frame_store),
        Arc::clone(&event_bus),
    );
    (pipeline, frame_store, event_bus)
}

#[tokio::test]
async fn test_start_failure_leaves_pipeline_inactive() {
    let dims = Arc::new(parking_lot::Mutex::new((640, 480)));
    let (pipeline, frame_store, _bus) = test_pipeline(Box::new(MockSource::new(true, dims)));

    let result = pipeline.start().await;
    assert!(matches!(result, Err(CaptureError::Unavailable { .. })));
    assert!(!pipeline.is_active());
    assert!(!frame_store.has_frame());
}

#[tokio::test]
async fn test_start_while_active_is_noop() {
    let dims = Arc::new(parking_lot::Mutex::new((640, 480)));
    let (pipeline, _store, _bus) = test_pipeline(Box::new(MockSource::new(false, dims)));

    pipeline.start().await.unwrap();
    assert!(pipeline.is_active());
    // Second start must not disturb the running loop
    pipeline.start().await.unwrap();
    assert!(pipeline.is_active());

    pipeline.stop().await;
    assert!(!pipeline.is_active());
}

#[tokio::test]
async fn test_frame_produced_once_dimensions_are_valid() {
    let dims = Arc::new(parking_lot::Mutex::new((1280, 720)));
    let (pipeline, frame_store, _bus) = test_pipeline(Box::new(MockSource::new(false, dims)));

    pipeline.start().await.unwrap();

    let mut waited = Duration::ZERO;
    while !frame_store.has_frame() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    pipeline.stop().await;

    let frame = frame_store.latest().expect("no frame produced");
    // Local frames always carry the quality they were encoded at
    assert!(frame.quality.is_some());

    // The emitted canvas is bounded to the target size regardless of the
    // native source resolution
    use base64::Engine as _;
    let jpeg = base64::engine::general_purpose::STANDARD
        .decode(frame.data.as_str())
        .unwrap();
    let decoded = image::load_from_memory(&jpeg).unwrap();
    assert_eq!(
        (decoded.width(), decoded.height()),
        (640, 480)
    );
}

#[tokio::test]
async fn test_zero_dimension_ticks_emit_nothing() {
    let dims = Arc::new(parking_lot::Mutex::new((0, 0)));
    let shared_dims = Arc::clone(&dims);
    let (pipeline, frame_store, _bus) = test_pipeline(Box::new(MockSource::new(false, dims)));

    pipeline.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        !frame_store.has_frame(),
        "frame emitted while source reported zero dimensions"
    );

    // Source warms up; frames start flowing
    *shared_dims.lock() = (640, 480);
    let mut waited = Duration::ZERO;
    while !frame_store.has_frame() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    pipeline.stop().await;
    assert!(frame_store.has_frame());
}

#[tokio::test]
async fn test_stop_prevents_further_emission() {
    let dims = Arc::new(parking_lot::Mutex::new((640, 480)));
    let (pipeline, frame_store, _bus) = test_pipeline(Box::new(MockSource::new(false, dims)));

    pipeline.start().await.unwrap();
    let mut waited = Duration::ZERO;
    while !frame_store.has_frame() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    pipeline.stop().await;

    frame_store.clear();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        !frame_store.has_frame(),
        "frame emitted after the pipeline was stopped"
    );
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let dims = Arc::new(parking_lot::Mutex::new((640, 480)));
    let (pipeline, _store, _bus) = test_pipeline(Box::new(MockSource::new(false, dims)));

    pipeline.start().await.unwrap();
    pipeline.stop().await;
    pipeline.stop().await;
    assert!(!pipeline.is_active());
}

#[tokio::test]
async fn test_test_pattern_source_round_trip() {
    let mut source = TestPatternSource::new();
    assert_eq!(source.dimensions(), (0, 0));

    source.open(&CaptureConstraints::default()).await.unwrap();
    assert_eq!(source.dimensions(), (640, 480));

    let image = source.grab().unwrap();
    assert_eq!(image.dimensions(), (640, 480));

    source.close().await;
    assert_eq!(source.dimensions(), (0, 0));
}

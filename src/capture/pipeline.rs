use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::events::{EventBus, SessionEvent};
use crate::frame::{Frame, FrameStore};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::encode;
use super::source::{CaptureConstraints, CaptureSource};

/// Produces encoded frames from the capture source on a fixed cadence.
///
/// While active, each tick renders the current source image into the target
/// canvas, encodes it under the payload budget, and replaces the held frame
/// (latest-wins). Stopping cancels the loop; an encode already in flight
/// checks the cancellation guard again immediately before emission.
pub struct CapturePipeline {
    config: CaptureConfig,
    event_bus: Arc<EventBus>,
    frame_store: Arc<FrameStore>,
    source: Arc<Mutex<Box<dyn CaptureSource>>>,
    active: parking_lot::Mutex<Option<CancellationToken>>,
}

impl CapturePipeline {
    pub fn new(
        config: CaptureConfig,
        source: Box<dyn CaptureSource>,
        frame_store: Arc<FrameStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            event_bus,
            frame_store,
            source: Arc::new(Mutex::new(source)),
            active: parking_lot::Mutex::new(None),
        }
    }

    /// Whether the capture loop is currently running
    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .map(|token| !token.is_cancelled())
            .unwrap_or(false)
    }

    /// Acquire the source and start the capture loop.
    ///
    /// Starting while already active is a no-op. Acquisition failure leaves
    /// the pipeline inactive.
    pub async fn start(&self) -> Result<(), CaptureError> {
        if self.is_active() {
            debug!("Capture pipeline already active");
            return Ok(());
        }

        let constraints = CaptureConstraints {
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
        };

        {
            let mut source = self.source.lock().await;
            source.open(&constraints).await?;
        }

        let token = CancellationToken::new();
        *self.active.lock() = Some(token.clone());

        info!(
            "Capture pipeline started ({}x{} @ {}fps)",
            self.config.width, self.config.height, self.config.fps
        );

        let config = self.config.clone();
        let source = Arc::clone(&self.source);
        let frame_store = Arc::clone(&self.frame_store);
        let event_bus = Arc::clone(&self.event_bus);

        tokio::spawn(async move {
            run_capture_loop(config, source, frame_store, event_bus, token).await;
        });

        self.event_bus.publish(SessionEvent::CameraStarted {
            timestamp: SystemTime::now(),
        });
        Ok(())
    }

    /// Cancel the capture loop and release the source. Idempotent.
    pub async fn stop(&self) {
        let token = self.active.lock().take();
        let Some(token) = token else {
            debug!("Capture pipeline already stopped");
            return;
        };
        token.cancel();

        let mut source = self.source.lock().await;
        source.close().await;

        info!("Capture pipeline stopped");
        self.event_bus.publish(SessionEvent::CameraStopped {
            timestamp: SystemTime::now(),
        });
    }
}

/// Cadenced capture loop; the cancellation token is checked at loop entry
/// and again right before each emission.
async fn run_capture_loop(
    config: CaptureConfig,
    source: Arc<Mutex<Box<dyn CaptureSource>>>,
    frame_store: Arc<FrameStore>,
    event_bus: Arc<EventBus>,
    token: CancellationToken,
) {
    let mut ticker = interval(config.frame_interval());
    // A slow tick defers; ticks never queue up behind each other
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let image = {
            let mut source = source.lock().await;
            let (width, height) = source.dimensions();
            if width == 0 || height == 0 {
                debug!("Capture source warming up, skipping tick");
                continue;
            }
            match source.grab() {
                Ok(image) => image,
                Err(e) => {
                    debug!("Frame grab failed, dropping frame: {}", e);
                    continue;
                }
            }
        };

        let canvas = encode::render_canvas(&image, config.width, config.height);
        let encoded = match encode::encode_adaptive(&canvas, &config) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                continue;
            }
        };

        // stop() may have landed while encoding; a cancelled loop must not emit
        if token.is_cancelled() {
            break;
        }

        let byte_len = encoded.byte_len;
        let quality = encoded.quality;
        frame_store.replace(Frame::captured(encoded.data, quality));
        event_bus.publish(SessionEvent::FrameCaptured {
            byte_len,
            quality,
            timestamp: SystemTime::now(),
        });
    }

    debug!("Capture loop finished");
}

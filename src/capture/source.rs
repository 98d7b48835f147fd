use crate::error::CaptureError;
use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Requested capture parameters for source acquisition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 15,
        }
    }
}

/// Seam between the capture pipeline and the underlying camera device.
///
/// Implementations report zero dimensions while the device is still warming
/// up; the pipeline skips those ticks without emitting a frame.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Acquire the underlying device at the requested parameters
    async fn open(&mut self, constraints: &CaptureConstraints) -> Result<(), CaptureError>;

    /// Reported source dimensions; zero until the source has warmed up
    fn dimensions(&self) -> (u32, u32);

    /// Grab the current image from the source
    fn grab(&mut self) -> Result<RgbImage, CaptureError>;

    /// Release the device deterministically
    async fn close(&mut self);
}

/// Synthetic capture source producing an animated gradient pattern.
///
/// Stands in for real camera hardware during development and testing.
pub struct TestPatternSource {
    dimensions: (u32, u32),
    tick: u64,
}

impl TestPatternSource {
    pub fn new() -> Self {
        Self {
            dimensions: (0, 0),
            tick: 0,
        }
    }
}

impl Default for TestPatternSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureSource for TestPatternSource {
    async fn open(&mut self, constraints: &CaptureConstraints) -> Result<(), CaptureError> {
        info!(
            "Opening test pattern source at {}x{}",
            constraints.width, constraints.height
        );
        self.dimensions = (constraints.width, constraints.height);
        self.tick = 0;
        Ok(())
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn grab(&mut self) -> Result<RgbImage, CaptureError> {
        let (width, height) = self.dimensions;
        if width == 0 || height == 0 {
            return Err(CaptureError::Unavailable {
                details: "source not opened".to_string(),
            });
        }

        let phase = (self.tick % 256) as u32;
        self.tick += 1;
        Ok(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([
                ((x + phase) % 256) as u8,
                ((y + phase) % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        }))
    }

    async fn close(&mut self) {
        info!("Closing test pattern source");
        self.dimensions = (0, 0);
    }
}

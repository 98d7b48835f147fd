use parking_lot::RwLock;
use std::sync::Arc;
use std::time::SystemTime;

/// One encoded camera frame, immutable once produced
#[derive(Debug, Clone)]
pub struct Frame {
    /// Base64-encoded JPEG payload (shared ownership for efficiency)
    pub data: Arc<String>,
    /// JPEG quality the frame was encoded at; unknown for server-relayed frames
    pub quality: Option<u8>,
    /// Timestamp when the frame was captured
    pub captured_at: SystemTime,
}

impl Frame {
    /// Create a frame produced by the local capture pipeline
    pub fn captured(data: String, quality: u8) -> Self {
        Self {
            data: Arc::new(data),
            quality: Some(quality),
            captured_at: SystemTime::now(),
        }
    }

    /// Create a frame relayed by the server over the persistent link
    pub fn relayed(data: String) -> Self {
        Self {
            data: Arc::new(data),
            quality: None,
            captured_at: SystemTime::now(),
        }
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.captured_at)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Check if frame is older than the specified duration
    pub fn is_older_than(&self, duration: std::time::Duration) -> bool {
        SystemTime::now()
            .duration_since(self.captured_at)
            .map(|age| age > duration)
            .unwrap_or(false)
    }
}

/// Latest-wins holder for the current frame.
///
/// A new frame unconditionally replaces the previous one; frames are never
/// queued, so a reader always observes the most recent available frame.
#[derive(Default)]
pub struct FrameStore {
    current: RwLock<Option<Frame>>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame; the previous frame is discarded, not buffered
    pub fn replace(&self, frame: Frame) {
        *self.current.write() = Some(frame);
    }

    /// Get the most recent frame, if any
    pub fn latest(&self) -> Option<Frame> {
        self.current.read().clone()
    }

    /// Discard the held frame
    pub fn clear(&self) {
        *self.current.write() = None;
    }

    pub fn has_frame(&self) -> bool {
        self.current.read().is_some()
    }
}

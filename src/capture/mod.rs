mod encode;
mod pipeline;
mod source;

#[cfg(test)]
mod tests;

pub use encode::EncodedFrame;
pub use pipeline::CapturePipeline;
pub use source::{CaptureConstraints, CaptureSource, TestPatternSource};

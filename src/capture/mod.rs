//! Capture device seam
//!
//! The video acquisition hardware and its driver are external collaborators;
//! the pipeline only depends on this trait.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Acquisition failure reported by the capture collaborator
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No further frames will arrive; the pipeline winds down normally
    #[error("end of stream")]
    EndOfStream,

    /// The capture hardware failed; fatal to the pipeline
    #[error("capture device error: {0}")]
    Device(String),
}

/// Video frame producer
///
/// Implementations deliver pixel buffers already normalized to the
/// pipeline's working resolution; the acquisition stage owns sequence
/// numbering and timestamps.
#[async_trait]
pub trait FrameSource: Send {
    /// Resolution of delivered frames, in pixels
    fn resolution(&self) -> (u32, u32);

    /// Block until the next frame is available
    async fn next_frame(&mut self) -> Result<Bytes, CaptureError>;
}

//! Object tracking and region selection seams
//!
//! The tracking algorithm and the interactive region selection are external
//! collaborators. The tracker is an opaque capability: given a frame and an
//! initial region it produces updated regions; its internal robustness is
//! not this pipeline's concern and failures are reported, never retried
//! here.

use crate::pipeline::types::{Frame, Region};
use async_trait::async_trait;

/// One successful tracking update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackUpdate {
    /// Updated target region in frame coordinates
    pub region: Region,
    /// Tracker-reported confidence in [0, 1]
    pub confidence: f64,
}

/// Opaque visual-object-tracking capability
#[async_trait]
pub trait ObjectTracker: Send {
    /// Prime the tracker with the initial target region
    async fn init(&mut self, frame: &Frame, region: Region) -> anyhow::Result<()>;

    /// Advance the tracker by one frame
    ///
    /// `None` means the target was lost this frame.
    async fn update(&mut self, frame: &Frame) -> Option<TrackUpdate>;
}

/// Supplies the operator-selected initial region of interest
#[async_trait]
pub trait RoiSource: Send {
    /// Offer a frame for selection
    ///
    /// Returns the chosen region once the operator has made one. Frames
    /// offered before that are discarded by the caller, never buffered.
    async fn select(&mut self, frame: &Frame) -> Option<Region>;
}

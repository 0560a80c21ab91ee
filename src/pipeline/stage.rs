//! Pipeline stage trait
//!
//! Defines the interface the coordinator uses to spawn and narrate stage
//! tasks.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for pipeline stages that process data until shutdown
#[async_trait]
pub trait PipelineStage: Send {
    /// Run the stage until upstream end-of-stream, a fatal error, or
    /// cancellation
    async fn run(&mut self) -> Result<()>;

    /// Get the name of this stage for logging
    fn name(&self) -> &'static str;
}

//! Acquisition stage
//!
//! Pulls frames from the capture device, stamps sequence numbers, and feeds
//! the bounded frame channel. A full channel blocks the push (back-pressure)
//! rather than dropping frames: the pipeline favors completeness over
//! latency, and the channel capacity bounds how stale a frame can get.
//! On stop the stage closes its sender so the tracking stage observes
//! end-of-stream instead of blocking forever.

use crate::capture::{CaptureError, FrameSource};
use crate::pipeline::error::PipelineError;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::state::{StageState, advance};
use crate::pipeline::types::{Frame, Timestamp};
use anyhow::Result;
use async_trait::async_trait;
use log::{error, info};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Acquisition stage: capture device → frame channel
pub struct AcquireStage {
    source: Box<dyn FrameSource>,
    output_tx: Option<mpsc::Sender<Frame>>,
    state: watch::Sender<StageState>,
    health: Arc<PipelineHealth>,
    cancel: CancellationToken,
    base: Instant,
}

impl AcquireStage {
    /// Create a new acquisition stage
    pub fn new(
        source: Box<dyn FrameSource>,
        output_tx: mpsc::Sender<Frame>,
        state: watch::Sender<StageState>,
        health: Arc<PipelineHealth>,
        cancel: CancellationToken,
        base: Instant,
    ) -> Self {
        Self {
            source,
            output_tx: Some(output_tx),
            state,
            health,
            cancel,
            base,
        }
    }
}

#[async_trait]
impl PipelineStage for AcquireStage {
    async fn run(&mut self) -> Result<()> {
        advance(&self.state, StageState::AwaitingPeer);
        let output_tx = self
            .output_tx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No output channel"))?;

        // Leaf stage: the device handed over at construction is its only peer
        let (width, height) = self.source.resolution();
        advance(&self.state, StageState::Running);
        info!("AcquireStage: running at {width}x{height}");

        let mut seq: u64 = 0;
        let mut result = Ok(());

        loop {
            let data = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("AcquireStage: cancelled after {seq} frames");
                    break;
                }
                res = self.source.next_frame() => match res {
                    Ok(data) => data,
                    Err(CaptureError::EndOfStream) => {
                        info!("AcquireStage: end of stream after {seq} frames");
                        break;
                    }
                    Err(CaptureError::Device(message)) => {
                        error!("AcquireStage: device error: {message}");
                        self.cancel.cancel();
                        result = Err(PipelineError::Device(message).into());
                        break;
                    }
                }
            };

            seq += 1;
            let frame = Frame::new(
                seq,
                data,
                width,
                height,
                Timestamp::from_instant(Instant::now(), self.base),
            );
            if seq == 1 {
                info!("AcquireStage: first frame captured");
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                sent = output_tx.send(frame) => {
                    if sent.is_err() {
                        info!("AcquireStage: frame channel closed downstream");
                        break;
                    }
                    self.health.record_frame_captured();
                }
            }
        }

        advance(&self.state, StageState::Stopping);
        // Dropping the sender is what turns into end-of-stream downstream
        drop(output_tx);
        advance(&self.state, StageState::Stopped);
        result
    }

    fn name(&self) -> &'static str {
        "AcquireStage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimFrameSource;
    use std::time::Duration;

    fn spawn_stage(
        source: SimFrameSource,
        capacity: usize,
    ) -> (
        mpsc::Receiver<Frame>,
        CancellationToken,
        Arc<PipelineHealth>,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let (tx, rx) = mpsc::channel(capacity);
        let (state_tx, _state_rx) = watch::channel(StageState::NotStarted);
        let health = Arc::new(PipelineHealth::new());
        let cancel = CancellationToken::new();
        let mut stage = AcquireStage::new(
            Box::new(source),
            tx,
            state_tx,
            health.clone(),
            cancel.clone(),
            Instant::now(),
        );
        let handle = tokio::spawn(async move { stage.run().await });
        (rx, cancel, health, handle)
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_fifo_through_a_full_channel() {
        let source = SimFrameSource::new(64, 64, 20, Duration::ZERO);
        let (mut rx, _cancel, health, handle) = spawn_stage(source, 4);

        let mut seen = Vec::new();
        while let Some(frame) = rx.recv().await {
            // Drain slowly so the capacity-4 channel fills and the push
            // blocks; order must still hold
            tokio::time::sleep(Duration::from_millis(1)).await;
            seen.push(frame.seq);
        }

        assert_eq!(seen, (1..=20).collect::<Vec<u64>>());
        assert_eq!(health.frames_captured(), 20);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_device_error_is_fatal_and_cancels() {
        let source = SimFrameSource::new(64, 64, 0, Duration::ZERO).failing_after(3);
        let (mut rx, cancel, health, handle) = spawn_stage(source, 8);

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }

        assert_eq!(received, 3);
        assert_eq!(health.frames_captured(), 3);
        assert!(cancel.is_cancelled());
        assert!(handle.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_cancellation_closes_the_channel() {
        let source = SimFrameSource::new(64, 64, 0, Duration::from_millis(1));
        let (mut rx, cancel, _health, handle) = spawn_stage(source, 8);

        let first = rx.recv().await;
        assert!(first.is_some());
        cancel.cancel();

        // The sender closes once the stage winds down
        while rx.recv().await.is_some() {}
        handle.await.unwrap().unwrap();
    }
}

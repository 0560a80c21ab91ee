//! Tracking stage
//!
//! Consumes frames, runs the tracking collaborator, and emits target
//! observations. Until the operator supplies an initial region the stage is
//! uninitialized and discards frames instead of buffering them; once
//! initialized, each frame is passed to the tracker exactly once and
//! released the moment the update returns. An emission hysteresis keeps
//! negligible corrections from saturating the actuator.

use crate::config::ControlConfig;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::state::{StageState, advance, await_peer};
use crate::pipeline::types::{Frame, TargetObservation};
use crate::tracker::{ObjectTracker, RoiSource};
use anyhow::Result;
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Decides whether an observation is worth forwarding
///
/// Forward when the kind changed (located/lost edges always pass), when the
/// target sits meaningfully off-center (beyond the dead-zone radius on
/// either axis), or when it moved meaningfully since the last forwarded
/// observation. Everything else is suppressed.
struct EmissionPolicy {
    center_x: f64,
    center_y: f64,
    dead_zone_px: f64,
    min_delta_px: f64,
    last_sent: Option<TargetObservation>,
}

impl EmissionPolicy {
    fn new(cfg: &ControlConfig) -> Self {
        Self {
            center_x: cfg.center_x,
            center_y: cfg.center_y,
            dead_zone_px: cfg.dead_zone_px,
            min_delta_px: cfg.min_emit_delta_px,
            last_sent: None,
        }
    }

    fn should_emit(&self, obs: TargetObservation) -> bool {
        let Some(last) = self.last_sent else {
            return true;
        };
        match (last, obs) {
            (TargetObservation::Lost, TargetObservation::Lost) => false,
            (TargetObservation::Lost, TargetObservation::Located { .. })
            | (TargetObservation::Located { .. }, TargetObservation::Lost) => true,
            (
                TargetObservation::Located {
                    x: last_x,
                    y: last_y,
                    ..
                },
                TargetObservation::Located { x, y, .. },
            ) => {
                let off_center = (x - self.center_x).abs() > self.dead_zone_px
                    || (y - self.center_y).abs() > self.dead_zone_px;
                let moved = (x - last_x).abs() > self.min_delta_px
                    || (y - last_y).abs() > self.min_delta_px;
                off_center || moved
            }
        }
    }

    fn note_sent(&mut self, obs: TargetObservation) {
        self.last_sent = Some(obs);
    }
}

/// Tracking stage: frame channel → tracker → observation channel
pub struct TrackStage {
    tracker: Box<dyn ObjectTracker>,
    roi: Box<dyn RoiSource>,
    input_rx: Option<mpsc::Receiver<Frame>>,
    output_tx: Option<mpsc::Sender<TargetObservation>>,
    peer: watch::Receiver<StageState>,
    state: watch::Sender<StageState>,
    health: Arc<PipelineHealth>,
    cancel: CancellationToken,
    policy: EmissionPolicy,
    startup_timeout: Duration,
}

impl TrackStage {
    /// Create a new tracking stage
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tracker: Box<dyn ObjectTracker>,
        roi: Box<dyn RoiSource>,
        input_rx: mpsc::Receiver<Frame>,
        output_tx: mpsc::Sender<TargetObservation>,
        peer: watch::Receiver<StageState>,
        state: watch::Sender<StageState>,
        health: Arc<PipelineHealth>,
        cancel: CancellationToken,
        control: &ControlConfig,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            tracker,
            roi,
            input_rx: Some(input_rx),
            output_tx: Some(output_tx),
            peer,
            state,
            health,
            cancel,
            policy: EmissionPolicy::new(control),
            startup_timeout,
        }
    }
}

#[async_trait]
impl PipelineStage for TrackStage {
    async fn run(&mut self) -> Result<()> {
        advance(&self.state, StageState::AwaitingPeer);
        let mut input_rx = self
            .input_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No input channel"))?;
        let output_tx = self
            .output_tx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No output channel"))?;

        if let Err(err) = await_peer(
            self.name(),
            "AcquireStage",
            &mut self.peer,
            self.startup_timeout,
        )
        .await
        {
            error!("TrackStage: {err}");
            self.cancel.cancel();
            advance(&self.state, StageState::Stopping);
            advance(&self.state, StageState::Stopped);
            return Err(err.into());
        }

        advance(&self.state, StageState::Running);
        info!("TrackStage: running, waiting for initial region");

        let mut initialized = false;
        let mut frames_seen = 0u64;

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("TrackStage: cancelled after {frames_seen} frames");
                    break;
                }
                frame = input_rx.recv() => match frame {
                    Some(frame) => frame,
                    None => {
                        info!("TrackStage: upstream end of stream after {frames_seen} frames");
                        break;
                    }
                }
            };
            frames_seen += 1;

            if !initialized {
                match self.roi.select(&frame).await {
                    Some(region) => match self.tracker.init(&frame, region).await {
                        Ok(()) => {
                            initialized = true;
                            info!(
                                "TrackStage: tracker initialized on frame {} at {region:?}",
                                frame.seq
                            );
                        }
                        Err(err) => {
                            warn!("TrackStage: tracker init failed: {err:#}");
                        }
                    },
                    None => {
                        self.health.record_frame_discarded();
                    }
                }
                // Selection consumed this frame either way
                continue;
            }

            let observation = match self.tracker.update(&frame).await {
                Some(update) => {
                    let (x, y) = update.region.center();
                    TargetObservation::Located {
                        x,
                        y,
                        confidence: update.confidence,
                    }
                }
                None => {
                    self.health.record_tracking_loss();
                    TargetObservation::Lost
                }
            };
            // The frame is released as soon as the update returns; it is
            // never forwarded further
            drop(frame);

            if self.policy.should_emit(observation) {
                if observation.is_lost() {
                    warn!("TrackStage: tracking failure, downstream holds position");
                }
                let closed = tokio::select! {
                    _ = self.cancel.cancelled() => true,
                    sent = output_tx.send(observation) => sent.is_err(),
                };
                if closed {
                    info!("TrackStage: observation channel closed");
                    break;
                }
                self.policy.note_sent(observation);
                self.health.record_observation_emitted();
            } else {
                self.health.record_observation_suppressed();
            }
        }

        advance(&self.state, StageState::Stopping);
        drop(output_tx);
        advance(&self.state, StageState::Stopped);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "TrackStage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Region;
    use crate::sim::{PresetRoi, Scene, SimTracker};
    use bytes::Bytes;
    use std::time::Instant;

    fn make_frame(seq: u64) -> Frame {
        Frame::new(
            seq,
            Bytes::from_static(&[0u8; 16]),
            1280,
            720,
            crate::pipeline::types::Timestamp::from_instant(Instant::now(), Instant::now()),
        )
    }

    struct Harness {
        frame_tx: mpsc::Sender<Frame>,
        obs_rx: mpsc::Receiver<TargetObservation>,
        health: Arc<PipelineHealth>,
        handle: tokio::task::JoinHandle<Result<()>>,
    }

    fn spawn_stage(tracker: SimTracker, roi: PresetRoi) -> Harness {
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (obs_tx, obs_rx) = mpsc::channel(8);
        let (peer_tx, peer_rx) = watch::channel(StageState::Running);
        let (state_tx, _state_rx) = watch::channel(StageState::NotStarted);
        let health = Arc::new(PipelineHealth::new());
        let mut stage = TrackStage::new(
            Box::new(tracker),
            Box::new(roi),
            frame_rx,
            obs_tx,
            peer_rx,
            state_tx,
            health.clone(),
            CancellationToken::new(),
            &ControlConfig::default(),
            Duration::from_millis(100),
        );
        let handle = tokio::spawn(async move {
            let res = stage.run().await;
            drop(peer_tx);
            res
        });
        Harness {
            frame_tx,
            obs_rx,
            health,
            handle,
        }
    }

    #[tokio::test]
    async fn test_frames_discarded_until_region_selected() {
        let tracker = SimTracker::new(Scene::fixed(700.0, 360.0));
        let roi = PresetRoi::new(Region::new(670.0, 330.0, 60.0, 60.0), 2);
        let mut h = spawn_stage(tracker, roi);

        for seq in 1..=5 {
            h.frame_tx.send(make_frame(seq)).await.unwrap();
        }
        drop(h.frame_tx);

        // Frames 1-2 discarded, frame 3 initializes, frames 4-5 observed
        let mut observations = Vec::new();
        while let Some(obs) = h.obs_rx.recv().await {
            observations.push(obs);
        }
        assert_eq!(h.health.frames_discarded(), 2);
        assert!(!observations.is_empty());
        assert!(matches!(
            observations[0],
            TargetObservation::Located { .. }
        ));
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_frames_processed_in_order_exactly_once() {
        struct RecordingTracker {
            seqs: Arc<std::sync::Mutex<Vec<u64>>>,
        }
        #[async_trait]
        impl ObjectTracker for RecordingTracker {
            async fn init(&mut self, _frame: &Frame, _region: Region) -> Result<()> {
                Ok(())
            }
            async fn update(&mut self, frame: &Frame) -> Option<crate::tracker::TrackUpdate> {
                self.seqs.lock().unwrap().push(frame.seq);
                Some(crate::tracker::TrackUpdate {
                    region: Region::new(0.0, 0.0, 10.0, 10.0),
                    confidence: 1.0,
                })
            }
        }

        let seqs = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (frame_tx, frame_rx) = mpsc::channel(16);
        let (obs_tx, mut obs_rx) = mpsc::channel(16);
        let (_peer_tx, peer_rx) = watch::channel(StageState::Running);
        let (state_tx, _state_rx) = watch::channel(StageState::NotStarted);
        let mut stage = TrackStage::new(
            Box::new(RecordingTracker { seqs: seqs.clone() }),
            Box::new(PresetRoi::new(Region::new(0.0, 0.0, 10.0, 10.0), 0)),
            frame_rx,
            obs_tx,
            peer_rx,
            state_tx,
            Arc::new(PipelineHealth::new()),
            CancellationToken::new(),
            &ControlConfig::default(),
            Duration::from_millis(100),
        );
        let handle = tokio::spawn(async move { stage.run().await });

        for seq in 1..=10 {
            frame_tx.send(make_frame(seq)).await.unwrap();
        }
        drop(frame_tx);
        while obs_rx.recv().await.is_some() {}
        handle.await.unwrap().unwrap();

        // Frame 1 went to selection; 2..=10 each updated exactly once, in order
        assert_eq!(*seqs.lock().unwrap(), (2..=10).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_hysteresis_suppresses_centered_repeats() {
        let tracker = SimTracker::new(Scene::fixed(640.0, 360.0));
        let roi = PresetRoi::new(Region::new(610.0, 330.0, 60.0, 60.0), 0);
        let mut h = spawn_stage(tracker, roi);

        for seq in 1..=6 {
            h.frame_tx.send(make_frame(seq)).await.unwrap();
        }
        drop(h.frame_tx);

        let mut emitted = 0;
        while h.obs_rx.recv().await.is_some() {
            emitted += 1;
        }
        // Frame 1 initializes; the first centered observation passes (no
        // prior), the remaining four are suppressed
        assert_eq!(emitted, 1);
        assert_eq!(h.health.observations_suppressed(), 4);
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_loss_edge_emitted_once() {
        let tracker = SimTracker::new(Scene::fixed(700.0, 360.0)).losing_after(5);
        let roi = PresetRoi::new(Region::new(670.0, 330.0, 60.0, 60.0), 0);
        let mut h = spawn_stage(tracker, roi);

        for seq in 1..=8 {
            h.frame_tx.send(make_frame(seq)).await.unwrap();
        }
        drop(h.frame_tx);

        let mut observations = Vec::new();
        while let Some(obs) = h.obs_rx.recv().await {
            observations.push(obs);
        }
        let lost_count = observations.iter().filter(|o| o.is_lost()).count();
        assert_eq!(lost_count, 1);
        // Frames 5..=8 all lost the target, only the edge was forwarded
        assert_eq!(h.health.tracking_losses(), 4);
        h.handle.await.unwrap().unwrap();
    }
}

//! Pipeline coordinator
//!
//! Owns the two bounded hand-off channels and the lifecycle of the three
//! stages: dependency-ordered start (Acquisition before Tracking before
//! Servo Control, so each consumer can observe its producer's readiness),
//! the readiness rendezvous, and an idempotent shutdown that always ends by
//! forcing the actuator into its safe state.

use crate::capture::FrameSource;
use crate::config::PipelineConfig;
use crate::pipeline::acquire_stage::AcquireStage;
use crate::pipeline::error::PipelineError;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::servo_stage::ServoStage;
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::state::{StageState, advance, await_peer};
use crate::pipeline::track_stage::TrackStage;
use crate::servo::bus::ActuatorBus;
use crate::servo::controller::ServoController;
use crate::tracker::{ObjectTracker, RoiSource};
use anyhow::Result;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The control stage never queues more than one observation: a new one
/// arriving while a motion is in progress blocks the tracking stage, which
/// is the intended back-pressure.
const OBSERVATION_QUEUE_DEPTH: usize = 1;

/// How often the coordinator logs a health summary while running
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Frames older than this trigger a stall warning in the health log
const STALL_THRESHOLD: Duration = Duration::from_secs(5);

/// Spawn a stage task with start/finish narration
fn spawn_stage(mut stage: Box<dyn PipelineStage>) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let name = stage.name();
        let result = stage.run().await;
        match &result {
            Ok(()) => info!("{name}: task finished"),
            Err(err) => error!("{name}: task failed: {err:#}"),
        }
        result
    })
}

/// Coordinates the pipeline: Acquisition → Tracking → Servo Control
pub struct PipelineCoordinator<B: ActuatorBus + 'static> {
    config: PipelineConfig,
    controller: Arc<ServoController<B>>,
    cancel: CancellationToken,
    health: Arc<PipelineHealth>,
    state: watch::Sender<StageState>,
    stages: Vec<Box<dyn PipelineStage>>,
    stage_watch: Vec<(&'static str, watch::Receiver<StageState>)>,
    handles: Vec<JoinHandle<Result<()>>>,
    finalized: bool,
}

impl<B: ActuatorBus + 'static> PipelineCoordinator<B> {
    /// Wire the channels and build the three stages in dependency order
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn FrameSource>,
        tracker: Box<dyn ObjectTracker>,
        roi: Box<dyn RoiSource>,
        bus: B,
    ) -> Self {
        let cancel = CancellationToken::new();
        let health = Arc::new(PipelineHealth::new());
        let controller = Arc::new(ServoController::new(bus, config.servo.clone()));
        let base = Instant::now();

        let (frame_tx, frame_rx) = mpsc::channel(config.video.frame_channel_capacity);
        let (obs_tx, obs_rx) = mpsc::channel(OBSERVATION_QUEUE_DEPTH);

        let (acquire_state, acquire_watch) = watch::channel(StageState::NotStarted);
        let (track_state, track_watch) = watch::channel(StageState::NotStarted);
        let (servo_state, servo_watch) = watch::channel(StageState::NotStarted);

        let acquire = AcquireStage::new(
            source,
            frame_tx,
            acquire_state,
            health.clone(),
            cancel.clone(),
            base,
        );
        let track = TrackStage::new(
            tracker,
            roi,
            frame_rx,
            obs_tx,
            acquire_watch.clone(),
            track_state,
            health.clone(),
            cancel.clone(),
            &config.control,
            config.startup_timeout(),
        );
        let servo = ServoStage::new(
            controller.clone(),
            obs_rx,
            track_watch.clone(),
            servo_state,
            health.clone(),
            cancel.clone(),
            &config,
        );

        let (state, _) = watch::channel(StageState::NotStarted);

        Self {
            config,
            controller,
            cancel,
            health,
            state,
            stages: vec![Box::new(acquire), Box::new(track), Box::new(servo)],
            stage_watch: vec![
                ("AcquireStage", acquire_watch),
                ("TrackStage", track_watch),
                ("ServoStage", servo_watch),
            ],
            handles: Vec::new(),
            finalized: false,
        }
    }

    /// Token that cancels the whole pipeline
    ///
    /// Cancellation is idempotent and safe to trigger concurrently from any
    /// number of stages or external handlers; this is how a fatal stage
    /// failure, an operator interrupt, or both at once request shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared health metrics
    pub fn health(&self) -> Arc<PipelineHealth> {
        self.health.clone()
    }

    /// Current pipeline-level state
    pub fn state(&self) -> StageState {
        *self.state.borrow()
    }

    /// Spawn the stage tasks in dependency order
    ///
    /// Returns immediately; each consumer rendezvouses with its producer
    /// inside its own task. Use [`wait_ready`](Self::wait_ready) to block
    /// until the full pipeline is up.
    pub fn start(&mut self) {
        advance(&self.state, StageState::AwaitingPeer);
        info!("pipeline starting {} stages", self.stages.len());
        for stage in self.stages.drain(..) {
            self.handles.push(spawn_stage(stage));
        }

        let health = self.health.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_LOG_INTERVAL);
            interval.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        info!("pipeline {}", health.summary());
                        if health.is_stalled(STALL_THRESHOLD) {
                            warn!("pipeline stalled: no frame for {STALL_THRESHOLD:?}");
                        }
                    }
                }
            }
        });
    }

    /// Block until every stage reports ready
    ///
    /// Fails with `StartupTimeout` naming the stage that never became
    /// ready; the caller should then invoke [`shutdown`](Self::shutdown).
    pub async fn wait_ready(&self) -> Result<(), PipelineError> {
        for (name, rx) in &self.stage_watch {
            let mut rx = rx.clone();
            await_peer("pipeline", *name, &mut rx, self.config.startup_timeout()).await?;
        }
        advance(&self.state, StageState::Running);
        info!("pipeline running");
        Ok(())
    }

    /// Await every stage, then drive the actuator to its safe state
    ///
    /// Returns the first stage failure, after the safe state has been
    /// forced. The safe-state command is the required last step of every
    /// shutdown, orderly or not.
    pub async fn run(&mut self) -> Result<()> {
        let mut failure: Option<anyhow::Error> = None;
        for handle in self.handles.drain(..) {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failure.get_or_insert(err);
                }
                Err(err) => {
                    failure.get_or_insert_with(|| anyhow::anyhow!("stage task panicked: {err}"));
                }
            }
        }

        self.finalize().await;

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Cancel every stage and wait for the pipeline to wind down
    pub async fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        self.run().await
    }

    async fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        self.cancel.cancel();
        advance(&self.state, StageState::Stopping);

        if self.config.home_on_shutdown
            && let Err(err) = self.controller.return_home().await
        {
            warn!("shutdown homing failed: {err}");
        }
        // Torque off is the required last step, even after failures
        self.controller.safe_state().await;

        advance(&self.state, StageState::Stopped);
        info!("pipeline stopped: {}", self.health.summary());
    }
}

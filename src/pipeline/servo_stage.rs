//! Servo control stage — the closed-loop control law
//!
//! Consumes one target observation at a time; the capacity-1 observation
//! channel upstream provides the intended back-pressure while a motion is in
//! progress. Each observation runs through the pure control law, then the
//! surviving per-axis commands are driven concurrently: writes serialize on
//! the shared bus, the wait-for-goal phases overlap. Recoverable outcomes
//! (out-of-range rejection, goal timeout, an isolated communication error)
//! are reported and the stage simply awaits the next observation; only an
//! exhausted communication budget escalates to pipeline shutdown.

use crate::config::PipelineConfig;
use crate::pipeline::error::PipelineError;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::state::{StageState, advance, await_peer};
use crate::pipeline::types::TargetObservation;
use crate::servo::axis::{Axis, AxisCommand, AxisOutcome};
use crate::servo::bus::ActuatorBus;
use crate::servo::control_law::ControlLaw;
use crate::servo::controller::ServoController;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Servo control stage: observation channel → control law → actuator
pub struct ServoStage<B: ActuatorBus> {
    controller: Arc<ServoController<B>>,
    law: ControlLaw,
    input_rx: Option<mpsc::Receiver<TargetObservation>>,
    peer: watch::Receiver<StageState>,
    state: watch::Sender<StageState>,
    health: Arc<PipelineHealth>,
    cancel: CancellationToken,
    comm_cycle_budget: u32,
    home_on_start: bool,
    startup_timeout: Duration,
}

impl<B: ActuatorBus> ServoStage<B> {
    /// Create a new servo control stage
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        controller: Arc<ServoController<B>>,
        input_rx: mpsc::Receiver<TargetObservation>,
        peer: watch::Receiver<StageState>,
        state: watch::Sender<StageState>,
        health: Arc<PipelineHealth>,
        cancel: CancellationToken,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            controller,
            law: ControlLaw::new(&config.control),
            input_rx: Some(input_rx),
            peer,
            state,
            health,
            cancel,
            comm_cycle_budget: config.servo.comm_cycle_budget,
            home_on_start: config.home_on_start,
            startup_timeout: config.startup_timeout(),
        }
    }

    async fn drive_if_present(&self, command: Option<AxisCommand>) -> Option<AxisOutcome> {
        match command {
            Some(command) => Some(self.controller.drive(command).await),
            None => None,
        }
    }

    fn record(&self, outcome: AxisOutcome) {
        match outcome {
            AxisOutcome::Reached => self.health.record_command_issued(),
            AxisOutcome::TimedOut => {
                self.health.record_command_issued();
                self.health.record_goal_timeout();
            }
            AxisOutcome::RejectedOutOfRange => self.health.record_command_rejected(),
            AxisOutcome::CommError => self.health.record_comm_error(),
        }
    }

    fn stop(&self) {
        advance(&self.state, StageState::Stopping);
        advance(&self.state, StageState::Stopped);
    }
}

#[async_trait]
impl<B: ActuatorBus + 'static> PipelineStage for ServoStage<B> {
    async fn run(&mut self) -> Result<()> {
        advance(&self.state, StageState::AwaitingPeer);
        let mut input_rx = self
            .input_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No input channel"))?;

        if let Err(err) = await_peer(
            self.name(),
            "TrackStage",
            &mut self.peer,
            self.startup_timeout,
        )
        .await
        {
            error!("ServoStage: {err}");
            self.cancel.cancel();
            self.stop();
            return Err(err.into());
        }

        // Don't touch the hardware if the pipeline already failed upstream
        if !self.cancel.is_cancelled() {
            if let Err(err) = self.controller.startup().await {
                error!("ServoStage: actuator startup failed: {err}");
                self.cancel.cancel();
                self.stop();
                return Err(err.into());
            }
            if self.home_on_start
                && let Err(err) = self.controller.return_home().await
            {
                warn!("ServoStage: startup homing failed: {err}");
            }
        }

        advance(&self.state, StageState::Running);
        info!("ServoStage: running");

        let mut consecutive_comm_cycles = 0u32;

        loop {
            let observation = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("ServoStage: cancelled");
                    break;
                }
                obs = input_rx.recv() => match obs {
                    Some(obs) => obs,
                    None => {
                        info!("ServoStage: upstream end of stream");
                        break;
                    }
                }
            };

            if observation.is_lost() {
                // Hold the current position, never extrapolate
                debug!("ServoStage: target lost, holding position");
                continue;
            }

            let commands = self.law.plan(observation);
            if commands.is_empty() {
                debug!("ServoStage: {observation} within dead-zone");
                continue;
            }

            let mut pan_command = None;
            let mut tilt_command = None;
            for command in commands {
                match command.axis {
                    Axis::Pan => pan_command = Some(command),
                    Axis::Tilt => tilt_command = Some(command),
                }
            }

            // Writes serialize on the shared transport inside the
            // controller; the two wait phases proceed concurrently
            let (pan_outcome, tilt_outcome) = tokio::join!(
                self.drive_if_present(pan_command),
                self.drive_if_present(tilt_command),
            );

            let mut comm_error_this_cycle = false;
            for outcome in [pan_outcome, tilt_outcome].into_iter().flatten() {
                self.record(outcome);
                if outcome == AxisOutcome::CommError {
                    comm_error_this_cycle = true;
                }
            }

            if comm_error_this_cycle {
                consecutive_comm_cycles += 1;
                if consecutive_comm_cycles >= self.comm_cycle_budget {
                    let err = PipelineError::CommBudgetExhausted {
                        cycles: consecutive_comm_cycles,
                    };
                    error!("ServoStage: {err}");
                    self.cancel.cancel();
                    self.stop();
                    return Err(err.into());
                }
            } else {
                consecutive_comm_cycles = 0;
            }
        }

        self.stop();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ServoStage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimBusState};
    use std::sync::Mutex;

    fn located(x: f64, y: f64) -> TargetObservation {
        TargetObservation::Located {
            x,
            y,
            confidence: 1.0,
        }
    }

    struct Harness {
        obs_tx: mpsc::Sender<TargetObservation>,
        bus_state: Arc<Mutex<SimBusState>>,
        health: Arc<PipelineHealth>,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<Result<()>>,
    }

    fn spawn_stage(bus: SimBus) -> Harness {
        let bus_state = bus.shared();
        let mut config = PipelineConfig::default();
        config.servo.poll_interval_ms = 1;
        config.servo.max_poll_attempts = 50;
        config.home_on_start = false;

        let controller = Arc::new(ServoController::new(bus, config.servo.clone()));
        let (obs_tx, obs_rx) = mpsc::channel(1);
        let (_peer_tx, peer_rx) = watch::channel(StageState::Running);
        let (state_tx, _state_rx) = watch::channel(StageState::NotStarted);
        let health = Arc::new(PipelineHealth::new());
        let cancel = CancellationToken::new();

        let mut stage = ServoStage::new(
            controller,
            obs_rx,
            peer_rx,
            state_tx,
            health.clone(),
            cancel.clone(),
            &config,
        );
        let handle = tokio::spawn(async move {
            let res = stage.run().await;
            drop(_peer_tx);
            res
        });
        Harness {
            obs_tx,
            bus_state,
            health,
            cancel,
            handle,
        }
    }

    #[tokio::test]
    async fn test_target_right_of_center_pans_and_waits() {
        let h = spawn_stage(SimBus::new(511, 511));

        h.obs_tx.send(located(700.0, 360.0)).await.unwrap();
        drop(h.obs_tx);
        h.handle.await.unwrap().unwrap();

        // +2° converts to 7 units; the default profile inverts
        assert_eq!(h.bus_state.lock().unwrap().writes, vec![(Axis::Pan, 504)]);
        assert_eq!(h.health.commands_issued(), 1);
        assert_eq!(h.health.commands_rejected(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_reported_and_next_observation_processed() {
        // Pan starts at its lower bound: a rightward target is unreachable
        let h = spawn_stage(SimBus::new(5, 511));

        h.obs_tx.send(located(1100.0, 360.0)).await.unwrap();
        // A leftward target afterwards is reachable
        h.obs_tx.send(located(580.0, 360.0)).await.unwrap();
        drop(h.obs_tx);
        h.handle.await.unwrap().unwrap();

        assert_eq!(h.health.commands_rejected(), 1);
        assert_eq!(h.health.commands_issued(), 1);
        assert_eq!(h.bus_state.lock().unwrap().writes, vec![(Axis::Pan, 12)]);
    }

    #[tokio::test]
    async fn test_lost_observation_holds_position() {
        let h = spawn_stage(SimBus::new(511, 511));

        h.obs_tx.send(TargetObservation::Lost).await.unwrap();
        h.obs_tx.send(TargetObservation::Lost).await.unwrap();
        drop(h.obs_tx);
        h.handle.await.unwrap().unwrap();

        assert!(h.bus_state.lock().unwrap().writes.is_empty());
        assert_eq!(h.health.commands_issued(), 0);
    }

    #[tokio::test]
    async fn test_comm_budget_exhaustion_escalates() {
        let bus = SimBus::new(511, 511);
        // Every read fails: each cycle ends in a communication error
        bus.shared().lock().unwrap().fail_reads = (0, u32::MAX);
        let h = spawn_stage(bus);

        for _ in 0..3 {
            h.obs_tx.send(located(700.0, 360.0)).await.unwrap();
        }
        let result = h.handle.await.unwrap();

        assert!(result.is_err());
        assert!(h.cancel.is_cancelled());
        assert!(h.health.comm_errors() >= 3);
    }

    #[tokio::test]
    async fn test_transient_comm_error_does_not_escalate() {
        let bus = SimBus::new(511, 511);
        // First cycle fails its present-position read, then the bus recovers
        bus.shared().lock().unwrap().fail_reads = (0, 1);
        let h = spawn_stage(bus);

        h.obs_tx.send(located(700.0, 360.0)).await.unwrap();
        h.obs_tx.send(located(700.0, 360.0)).await.unwrap();
        drop(h.obs_tx);
        h.handle.await.unwrap().unwrap();

        assert_eq!(h.health.comm_errors(), 1);
        assert_eq!(h.health.commands_issued(), 1);
    }
}

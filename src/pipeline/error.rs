//! Typed failure taxonomy for the pipeline and the servo controller

use crate::servo::axis::Axis;
use crate::servo::bus::BusError;
use std::time::Duration;
use thiserror::Error;

/// Pipeline-level failures
///
/// Everything here is fatal: it reaches the coordinator, which drives every
/// stage to `Stopped` and forces the actuator into its safe state.
/// Recoverable conditions (dead-zone, lost tracking, a rejected or timed-out
/// axis cycle) are absorbed inside the stages and never surface as errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Capture hardware became unavailable
    #[error("capture device error: {0}")]
    Device(String),

    /// A stage's required peer never reported ready
    #[error("{stage}: peer {peer} not ready after {timeout:?}")]
    StartupTimeout {
        stage: &'static str,
        peer: &'static str,
        timeout: Duration,
    },

    /// The peer's task died before ever signaling readiness
    #[error("{stage}: peer {peer} failed to start")]
    ProducerFailed {
        stage: &'static str,
        peer: &'static str,
    },

    /// Actuator communication failed for more consecutive control cycles
    /// than the configured budget allows
    #[error("actuator bus failed {cycles} consecutive control cycles")]
    CommBudgetExhausted { cycles: u32 },
}

/// Per-axis servo command failures
#[derive(Debug, Error)]
pub enum ServoError {
    /// The converted goal position falls outside the axis's mechanical
    /// bounds. The command is rejected before transmission, never clamped:
    /// clamping would desynchronize the controller's model of the axis from
    /// where the vision system believes the target is.
    #[error("{axis}: goal {goal} outside mechanical bounds [{min}, {max}]")]
    TargetUnreachable {
        axis: Axis,
        goal: i32,
        min: u16,
        max: u16,
    },

    /// A bus call failed, or position reads failed too many times in a row
    #[error("{axis}: bus communication failed: {source}")]
    Comm {
        axis: Axis,
        #[source]
        source: BusError,
    },

    /// The axis never converged on its goal within the poll budget
    #[error("{axis}: goal {goal} not reached after {attempts} polls (last position {last:?})")]
    GoalTimeout {
        axis: Axis,
        goal: u16,
        attempts: u32,
        last: Option<u16>,
    },
}

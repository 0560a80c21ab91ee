//! Health monitoring and metrics for the pipeline

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Health metrics for the pipeline
///
/// Tracks counters across all three stages to monitor pipeline health.
/// All fields use atomic operations for thread-safe access.
pub struct PipelineHealth {
    /// Number of frames captured and handed off by the acquisition stage
    pub frames_captured: AtomicU64,

    /// Number of frames discarded before the tracker was initialized
    pub frames_discarded: AtomicU64,

    /// Number of observations forwarded to the control stage
    pub observations_emitted: AtomicU64,

    /// Number of observations suppressed by the emission hysteresis
    pub observations_suppressed: AtomicU64,

    /// Number of frames on which the tracker lost the target
    pub tracking_losses: AtomicU64,

    /// Number of goal commands written to the actuator
    pub commands_issued: AtomicU64,

    /// Number of commands rejected as outside mechanical bounds
    pub commands_rejected: AtomicU64,

    /// Number of commands whose wait-for-goal never converged
    pub goal_timeouts: AtomicU64,

    /// Number of axis cycles abandoned on bus communication failure
    pub comm_errors: AtomicU64,

    /// Timestamp (as Unix microseconds) of the last captured frame
    pub last_frame_time: AtomicU64,
}

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_micros() as u64
}

impl PipelineHealth {
    /// Create a new health metrics instance
    pub fn new() -> Self {
        Self {
            frames_captured: AtomicU64::new(0),
            frames_discarded: AtomicU64::new(0),
            observations_emitted: AtomicU64::new(0),
            observations_suppressed: AtomicU64::new(0),
            tracking_losses: AtomicU64::new(0),
            commands_issued: AtomicU64::new(0),
            commands_rejected: AtomicU64::new(0),
            goal_timeouts: AtomicU64::new(0),
            comm_errors: AtomicU64::new(0),
            last_frame_time: AtomicU64::new(now_micros()),
        }
    }

    /// Record a captured frame
    pub fn record_frame_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        self.last_frame_time.store(now_micros(), Ordering::Relaxed);
    }

    /// Record a frame discarded before tracker initialization
    pub fn record_frame_discarded(&self) {
        self.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an observation forwarded to the control stage
    pub fn record_observation_emitted(&self) {
        self.observations_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an observation suppressed by hysteresis
    pub fn record_observation_suppressed(&self) {
        self.observations_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame on which tracking failed
    pub fn record_tracking_loss(&self) {
        self.tracking_losses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a goal command written to the actuator
    pub fn record_command_issued(&self) {
        self.commands_issued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a command rejected as out of mechanical range
    pub fn record_command_rejected(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a wait-for-goal timeout
    pub fn record_goal_timeout(&self) {
        self.goal_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an axis cycle abandoned on communication failure
    pub fn record_comm_error(&self) {
        self.comm_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the number of frames captured
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    /// Get the number of frames discarded before initialization
    pub fn frames_discarded(&self) -> u64 {
        self.frames_discarded.load(Ordering::Relaxed)
    }

    /// Get the number of observations emitted
    pub fn observations_emitted(&self) -> u64 {
        self.observations_emitted.load(Ordering::Relaxed)
    }

    /// Get the number of observations suppressed
    pub fn observations_suppressed(&self) -> u64 {
        self.observations_suppressed.load(Ordering::Relaxed)
    }

    /// Get the number of tracking losses
    pub fn tracking_losses(&self) -> u64 {
        self.tracking_losses.load(Ordering::Relaxed)
    }

    /// Get the number of commands issued
    pub fn commands_issued(&self) -> u64 {
        self.commands_issued.load(Ordering::Relaxed)
    }

    /// Get the number of commands rejected out of range
    pub fn commands_rejected(&self) -> u64 {
        self.commands_rejected.load(Ordering::Relaxed)
    }

    /// Get the number of goal timeouts
    pub fn goal_timeouts(&self) -> u64 {
        self.goal_timeouts.load(Ordering::Relaxed)
    }

    /// Get the number of communication errors
    pub fn comm_errors(&self) -> u64 {
        self.comm_errors.load(Ordering::Relaxed)
    }

    /// Check if the pipeline has stalled (no frames for given duration)
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let last_frame = self.last_frame_time.load(Ordering::Relaxed);
        let elapsed_micros = now_micros().saturating_sub(last_frame);
        elapsed_micros > threshold.as_micros() as u64
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_captured: self.frames_captured(),
            frames_discarded: self.frames_discarded(),
            observations_emitted: self.observations_emitted(),
            observations_suppressed: self.observations_suppressed(),
            tracking_losses: self.tracking_losses(),
            commands_issued: self.commands_issued(),
            commands_rejected: self.commands_rejected(),
            goal_timeouts: self.goal_timeouts(),
            comm_errors: self.comm_errors(),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub frames_captured: u64,
    pub frames_discarded: u64,
    pub observations_emitted: u64,
    pub observations_suppressed: u64,
    pub tracking_losses: u64,
    pub commands_issued: u64,
    pub commands_rejected: u64,
    pub goal_timeouts: u64,
    pub comm_errors: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} frames ({} pre-init discards), {} observations ({} suppressed), \
             {} losses, {} commands ({} rejected, {} timeouts), {} comm errors",
            self.frames_captured,
            self.frames_discarded,
            self.observations_emitted,
            self.observations_suppressed,
            self.tracking_losses,
            self.commands_issued,
            self.commands_rejected,
            self.goal_timeouts,
            self.comm_errors
        )
    }
}

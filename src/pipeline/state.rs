//! Stage lifecycle state management

use crate::pipeline::error::PipelineError;
use log::warn;
use std::time::Duration;
use tokio::sync::watch;

/// Stage lifecycle state machine
///
/// Every pipeline stage is in exactly one of these states. Transitions are
/// validated to ensure consistent behavior across all stages; `Stopped` is
/// terminal and no stage re-enters `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Stage task has not been spawned yet
    NotStarted,

    /// Stage task is waiting for its producer peer (or device) to be ready
    AwaitingPeer,

    /// Stage is actively processing
    Running,

    /// Stage is winding down (upstream end-of-stream or fatal error)
    Stopping,

    /// Stage has released its channel ends and will not restart
    Stopped,
}

impl StageState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: StageState) -> bool {
        use StageState::*;

        match (self, target) {
            // From NotStarted
            (NotStarted, AwaitingPeer) => true,

            // From AwaitingPeer
            (AwaitingPeer, Running) => true,
            (AwaitingPeer, Stopping) => true, // Can abort startup

            // From Running
            (Running, Stopping) => true,

            // From Stopping
            (Stopping, Stopped) => true,

            // From Stopped - no transitions allowed
            (Stopped, _) => false,

            // Self-transitions
            (a, b) if *a == b => true,

            // All other transitions invalid
            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            StageState::NotStarted => "NotStarted",
            StageState::AwaitingPeer => "AwaitingPeer",
            StageState::Running => "Running",
            StageState::Stopping => "Stopping",
            StageState::Stopped => "Stopped",
        }
    }

    /// Check if the stage is running
    pub fn is_running(&self) -> bool {
        matches!(self, StageState::Running)
    }

    /// Check if the stage is stopped or stopping
    pub fn is_stopped(&self) -> bool {
        matches!(self, StageState::Stopped | StageState::Stopping)
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Publish a validated state transition on a stage's watch channel
pub(crate) fn advance(tx: &watch::Sender<StageState>, next: StageState) {
    let current = *tx.borrow();
    if !current.can_transition_to(next) {
        warn!("invalid stage transition {current} -> {next}, ignored");
        return;
    }
    if current != next {
        tx.send_replace(next);
    }
}

/// Readiness rendezvous: block until the peer stage has started
///
/// A consumer must not busy-spin waiting for its producer. Instead it blocks
/// on the producer's state watch until the producer has reached `Running`
/// (or has already run to completion — its channel output is still
/// observable), with a bounded timeout producing `StartupTimeout`. A peer
/// task that died before ever signaling readiness yields `ProducerFailed`.
pub(crate) async fn await_peer(
    stage: &'static str,
    peer: &'static str,
    rx: &mut watch::Receiver<StageState>,
    timeout: Duration,
) -> Result<(), PipelineError> {
    let started = rx.wait_for(|s| {
        matches!(
            s,
            StageState::Running | StageState::Stopping | StageState::Stopped
        )
    });
    match tokio::time::timeout(timeout, started).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => Err(PipelineError::ProducerFailed { stage, peer }),
        Err(_) => Err(PipelineError::StartupTimeout {
            stage,
            peer,
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let not_started = StageState::NotStarted;
        let awaiting = StageState::AwaitingPeer;
        let running = StageState::Running;
        let stopping = StageState::Stopping;
        let stopped = StageState::Stopped;

        // Valid transitions
        assert!(not_started.can_transition_to(awaiting));
        assert!(awaiting.can_transition_to(running));
        assert!(awaiting.can_transition_to(stopping));
        assert!(running.can_transition_to(stopping));
        assert!(stopping.can_transition_to(stopped));

        // Self-transitions
        assert!(not_started.can_transition_to(not_started));
        assert!(running.can_transition_to(running));
    }

    #[test]
    fn test_invalid_transitions() {
        let not_started = StageState::NotStarted;
        let running = StageState::Running;
        let stopped = StageState::Stopped;

        assert!(!not_started.can_transition_to(running)); // Must go through AwaitingPeer
        assert!(!not_started.can_transition_to(stopped)); // Can't stop before starting
        assert!(!running.can_transition_to(StageState::Stopped)); // Must go through Stopping
        assert!(!stopped.can_transition_to(running)); // Terminal
        assert!(!stopped.can_transition_to(not_started)); // Terminal
    }

    #[test]
    fn test_state_checks() {
        assert!(StageState::Running.is_running());
        assert!(!StageState::Running.is_stopped());
        assert!(StageState::Stopping.is_stopped());
        assert!(StageState::Stopped.is_stopped());
        assert!(!StageState::AwaitingPeer.is_running());
    }

    #[test]
    fn test_advance_rejects_invalid() {
        let (tx, rx) = watch::channel(StageState::NotStarted);
        advance(&tx, StageState::Running); // invalid, ignored
        assert_eq!(*rx.borrow(), StageState::NotStarted);

        advance(&tx, StageState::AwaitingPeer);
        advance(&tx, StageState::Running);
        assert_eq!(*rx.borrow(), StageState::Running);
    }

    #[tokio::test]
    async fn test_await_peer_ready() {
        let (tx, mut rx) = watch::channel(StageState::NotStarted);
        tx.send_replace(StageState::Running);
        let res = await_peer("Consumer", "Producer", &mut rx, Duration::from_millis(50)).await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn test_await_peer_times_out() {
        let (_tx, mut rx) = watch::channel(StageState::NotStarted);
        let res = await_peer("Consumer", "Producer", &mut rx, Duration::from_millis(20)).await;
        assert!(matches!(res, Err(PipelineError::StartupTimeout { .. })));
    }

    #[tokio::test]
    async fn test_await_peer_producer_died() {
        let (tx, mut rx) = watch::channel(StageState::NotStarted);
        drop(tx);
        let res = await_peer("Consumer", "Producer", &mut rx, Duration::from_millis(50)).await;
        assert!(matches!(res, Err(PipelineError::ProducerFailed { .. })));
    }
}

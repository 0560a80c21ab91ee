//! Actuator bus seam
//!
//! The wire protocol and transport are external collaborators. Pan and tilt
//! are logically independent joints but typically multiplex one physical
//! bus, so the controller serializes every call; implementations do not need
//! their own locking.

use super::axis::Axis;
use async_trait::async_trait;
use thiserror::Error;

/// Transport-level failure reported by the bus for a single call
///
/// Errors are reported per call and never silently swallowed.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct BusError(pub String);

/// Opaque actuator capability: position-controlled servos on a shared bus
#[async_trait]
pub trait ActuatorBus: Send {
    /// Enable holding torque on the axis
    async fn enable_torque(&mut self, axis: Axis) -> Result<(), BusError>;

    /// Disable holding torque on the axis
    async fn disable_torque(&mut self, axis: Axis) -> Result<(), BusError>;

    /// Read the present encoder position
    async fn read_position(&mut self, axis: Axis) -> Result<u16, BusError>;

    /// Request motion to the given encoder position
    async fn write_goal(&mut self, axis: Axis, units: u16) -> Result<(), BusError>;

    /// Set the axis moving speed
    async fn set_moving_speed(&mut self, axis: Axis, speed: u16) -> Result<(), BusError>;
}

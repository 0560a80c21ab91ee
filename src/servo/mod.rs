//! Actuator control
//!
//! Axis profiles and command types, the pure pixel-error → degrees control
//! law, and the controller that serializes all traffic on the shared bus
//! transport and enforces wait-for-goal semantics.

pub mod axis;
pub mod bus;
pub mod control_law;
pub mod controller;

pub use axis::{Axis, AxisCommand, AxisOutcome, AxisProfile};
pub use bus::{ActuatorBus, BusError};
pub use control_law::ControlLaw;
pub use controller::ServoController;

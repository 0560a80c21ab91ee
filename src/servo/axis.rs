//! Axis identities and per-axis configuration

use serde::{Deserialize, Serialize};

/// One independently actuated rotational degree of freedom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Pan,
    Tilt,
}

impl Axis {
    /// Both axes, in command order
    pub const ALL: [Axis; 2] = [Axis::Pan, Axis::Tilt];
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::Pan => write!(f, "pan"),
            Axis::Tilt => write!(f, "tilt"),
        }
    }
}

/// Mechanical profile of a single axis
///
/// Defaults match the AX-12 rig this controller was tuned on. Every value
/// here is expected to be re-validated against the physical mounting rather
/// than assumed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AxisProfile {
    /// Lower mechanical bound in actuator position units
    pub min_units: u16,

    /// Upper mechanical bound in actuator position units
    pub max_units: u16,

    /// Neutral position the home command drives to
    pub home_units: u16,

    /// |goal - present| at or below which the axis counts as arrived
    pub moving_threshold: u16,

    /// Flip the rotation direction relative to positive pixel offset
    pub invert: bool,
}

impl AxisProfile {
    /// Default pan profile: full rotation range
    pub fn pan_default() -> Self {
        Self {
            min_units: 0,
            max_units: 1023,
            home_units: 511,
            moving_threshold: 30,
            invert: true,
        }
    }

    /// Default tilt profile: restricted range so the camera cannot hit the
    /// mount
    pub fn tilt_default() -> Self {
        Self {
            min_units: 200,
            max_units: 720,
            home_units: 511,
            moving_threshold: 30,
            invert: true,
        }
    }
}

/// A relative motion request for one axis, in degrees
///
/// The resulting absolute position after unit conversion must lie within the
/// axis's mechanical bounds; the controller rejects violating commands
/// before transmission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisCommand {
    pub axis: Axis,
    pub delta_degrees: f64,
}

/// Terminal outcome of one per-axis control cycle
///
/// A cycle progresses Idle → CommandSent → Waiting and ends in one of these;
/// every non-`Reached` outcome is reported but leaves the pipeline running,
/// the stage simply awaits the next observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisOutcome {
    /// Present position converged within the moving threshold of the goal
    Reached,

    /// The poll budget elapsed before convergence
    TimedOut,

    /// The converted goal fell outside mechanical bounds; nothing was written
    RejectedOutOfRange,

    /// A bus call failed, or reads failed repeatedly during the wait
    CommError,
}

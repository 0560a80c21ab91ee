//! Pipeline configuration
//!
//! Every tunable of the control loop lives here: the working resolution,
//! frame-center and dead-zone geometry, per-axis gains and mechanical
//! profiles, channel capacity, and the timing budgets that bound startup and
//! goal polling. Gains and tolerances are deliberately configuration rather
//! than derived constants; they must be validated against the physical rig.

use crate::servo::axis::AxisProfile;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Working resolution and frame hand-off settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Working frame width in pixels; the capture collaborator normalizes
    /// frames to this size
    pub width: u32,

    /// Working frame height in pixels
    pub height: u32,

    /// Capacity of the bounded frame channel. A full channel blocks the
    /// acquisition push (back-pressure); frames are never dropped.
    pub frame_channel_capacity: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_channel_capacity: 8,
        }
    }
}

/// Control-law geometry and gains
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Frame center X the error is measured against (configuration, not
    /// inferred from frame size)
    pub center_x: f64,

    /// Frame center Y the error is measured against
    pub center_y: f64,

    /// Offsets at or below this radius produce no command on that axis
    pub dead_zone_px: f64,

    /// Pan gain in degrees of rotation per pixel of offset
    pub pan_gain_deg_per_px: f64,

    /// Tilt gain; independently tunable since tilt's field of view and
    /// mechanical range differ from pan's
    pub tilt_gain_deg_per_px: f64,

    /// Minimum movement since the last forwarded observation for the
    /// tracking stage to emit a new one
    pub min_emit_delta_px: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            center_x: 640.0,
            center_y: 360.0,
            dead_zone_px: 10.0,
            // 60 px of offset maps to 2° of rotation
            pan_gain_deg_per_px: 2.0 / 60.0,
            tilt_gain_deg_per_px: 1.5 / 60.0,
            min_emit_delta_px: 5.0,
        }
    }
}

/// Actuator timing budgets and per-axis mechanical profiles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    /// Actuator resolution in degrees per position unit
    pub degrees_per_unit: f64,

    /// Moving speed applied to both axes at startup
    pub moving_speed: u16,

    /// Pacing between present-position polls during wait-for-goal
    pub poll_interval_ms: u64,

    /// Maximum polls before a wait-for-goal cycle times out
    pub max_poll_attempts: u32,

    /// Consecutive failed position reads before a wait is abandoned
    pub read_failure_budget: u32,

    /// Consecutive control cycles ending in a communication error before
    /// the pipeline shuts down with a forced safe state
    pub comm_cycle_budget: u32,

    pub pan: AxisProfile,
    pub tilt: AxisProfile,
}

impl ServoConfig {
    /// Poll pacing as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            // AX-12: 300° over 1024 positions
            degrees_per_unit: 0.29296875,
            moving_speed: 30,
            poll_interval_ms: 20,
            max_poll_attempts: 250,
            read_failure_budget: 3,
            comm_cycle_budget: 3,
            pan: AxisProfile::pan_default(),
            tilt: AxisProfile::tilt_default(),
        }
    }
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub video: VideoConfig,
    pub control: ControlConfig,
    pub servo: ServoConfig,

    /// How long a consumer waits for its producer's readiness signal before
    /// the pipeline start is aborted
    pub startup_timeout_ms: u64,

    /// Drive both axes to neutral before accepting observations
    pub home_on_start: bool,

    /// Drive both axes to neutral during shutdown, before torque is
    /// disabled
    pub home_on_shutdown: bool,
}

impl PipelineConfig {
    /// Startup rendezvous budget as a duration
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Load configuration from a JSON file, filling omitted fields with
    /// defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video: VideoConfig::default(),
            control: ControlConfig::default(),
            servo: ServoConfig::default(),
            startup_timeout_ms: 5_000,
            home_on_start: true,
            home_on_shutdown: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let config = PipelineConfig::default();
        assert_eq!(config.control.center_x * 2.0, config.video.width as f64);
        assert_eq!(config.control.center_y * 2.0, config.video.height as f64);
        assert!(config.servo.pan.min_units < config.servo.pan.max_units);
        assert!(config.servo.tilt.min_units < config.servo.tilt.max_units);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"control": {"dead_zone_px": 15.0}}"#).unwrap();
        assert_eq!(config.control.dead_zone_px, 15.0);
        assert_eq!(config.control.center_x, 640.0);
        assert_eq!(config.video.width, 1280);
        assert_eq!(config.servo.pan.max_units, 1023);
    }
}

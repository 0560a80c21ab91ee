//! Proportional control law mapping pixel error to axis motion
//!
//! The transform is deterministic and pure: pixel offset from the configured
//! frame center, a dead-zone that suppresses jitter-driven oscillation, and
//! an independently tunable proportional gain per axis. Unit conversion and
//! bounds checking happen later, in the controller, against a fresh position
//! read.

use super::axis::{Axis, AxisCommand};
use crate::config::ControlConfig;
use crate::pipeline::types::TargetObservation;

/// Per-axis gain and tolerance
#[derive(Debug, Clone, Copy)]
struct AxisLaw {
    center_px: f64,
    dead_zone_px: f64,
    gain_deg_per_px: f64,
}

impl AxisLaw {
    /// Signed degree delta for this axis, or `None` inside the dead-zone
    fn command(&self, target_px: f64) -> Option<f64> {
        let offset = target_px - self.center_px;
        if offset.abs() <= self.dead_zone_px {
            return None;
        }
        Some(offset * self.gain_deg_per_px)
    }
}

/// Deterministic transform from a target observation to axis commands
///
/// Positive pan delta corresponds to a rightward pixel offset and positive
/// tilt delta to a downward one; the per-axis `invert` profile flag maps
/// these onto the physical rotation direction of the rig.
#[derive(Debug, Clone)]
pub struct ControlLaw {
    pan: AxisLaw,
    tilt: AxisLaw,
}

impl ControlLaw {
    /// Build the law from control configuration
    pub fn new(cfg: &ControlConfig) -> Self {
        Self {
            pan: AxisLaw {
                center_px: cfg.center_x,
                dead_zone_px: cfg.dead_zone_px,
                gain_deg_per_px: cfg.pan_gain_deg_per_px,
            },
            tilt: AxisLaw {
                center_px: cfg.center_y,
                dead_zone_px: cfg.dead_zone_px,
                gain_deg_per_px: cfg.tilt_gain_deg_per_px,
            },
        }
    }

    /// Commands for one observation
    ///
    /// Empty when the target is lost (hold position, never extrapolate) or
    /// lies inside the dead-zone on both axes.
    pub fn plan(&self, obs: TargetObservation) -> Vec<AxisCommand> {
        let TargetObservation::Located { x, y, .. } = obs else {
            return Vec::new();
        };

        let mut commands = Vec::with_capacity(2);
        if let Some(delta) = self.pan.command(x) {
            commands.push(AxisCommand {
                axis: Axis::Pan,
                delta_degrees: delta,
            });
        }
        if let Some(delta) = self.tilt.command(y) {
            commands.push(AxisCommand {
                axis: Axis::Tilt,
                delta_degrees: delta,
            });
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn law() -> ControlLaw {
        ControlLaw::new(&ControlConfig::default())
    }

    fn located(x: f64, y: f64) -> TargetObservation {
        TargetObservation::Located {
            x,
            y,
            confidence: 1.0,
        }
    }

    #[test]
    fn test_dead_zone_suppresses_commands() {
        // Target barely off the 640x360 center on both axes
        let commands = law().plan(located(645.0, 362.0));
        assert!(commands.is_empty());
    }

    #[test]
    fn test_dead_zone_boundary_is_inclusive() {
        // Exactly at the dead-zone radius: still no command
        let commands = law().plan(located(650.0, 360.0));
        assert!(commands.is_empty());

        // One pixel past it: command issued
        let commands = law().plan(located(651.0, 360.0));
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].axis, Axis::Pan);
    }

    #[test]
    fn test_pan_gain_maps_sixty_pixels_to_two_degrees() {
        let commands = law().plan(located(700.0, 360.0));
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].axis, Axis::Pan);
        assert!((commands[0].delta_degrees - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_leftward_offset_is_negative() {
        let commands = law().plan(located(580.0, 360.0));
        assert_eq!(commands.len(), 1);
        assert!((commands[0].delta_degrees + 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_both_axes_commanded_independently() {
        let commands = law().plan(located(700.0, 280.0));
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].axis, Axis::Pan);
        assert!(commands[0].delta_degrees > 0.0);
        assert_eq!(commands[1].axis, Axis::Tilt);
        assert!(commands[1].delta_degrees < 0.0);
    }

    #[test]
    fn test_lost_target_produces_no_commands() {
        assert!(law().plan(TargetObservation::Lost).is_empty());
    }

    #[test]
    fn test_dead_zone_idempotence() {
        // For all offsets within the radius, no command is ever produced
        let law = law();
        for dx in -10..=10 {
            for dy in -10..=10 {
                let obs = located(640.0 + dx as f64, 360.0 + dy as f64);
                assert!(
                    law.plan(obs).is_empty(),
                    "offset ({dx}, {dy}) escaped the dead-zone"
                );
            }
        }
    }
}

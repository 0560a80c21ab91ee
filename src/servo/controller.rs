//! Serialized actuator control with wait-for-goal semantics
//!
//! Owns the shared bus transport exclusively: every read and write goes
//! through one mutex, so pan and tilt calls interleave but never overlap on
//! the wire. Waiting for an axis to arrive is paced, bounded polling rather
//! than a tight re-read loop, and every command cycle ends in an explicit
//! outcome.

use super::axis::{Axis, AxisCommand, AxisOutcome, AxisProfile};
use super::bus::ActuatorBus;
use crate::config::ServoConfig;
use crate::pipeline::error::ServoError;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Pan/tilt actuator controller
pub struct ServoController<B: ActuatorBus> {
    bus: Mutex<B>,
    cfg: ServoConfig,
}

impl<B: ActuatorBus> ServoController<B> {
    /// Create a controller owning the given bus transport
    pub fn new(bus: B, cfg: ServoConfig) -> Self {
        Self {
            bus: Mutex::new(bus),
            cfg,
        }
    }

    fn profile(&self, axis: Axis) -> &AxisProfile {
        match axis {
            Axis::Pan => &self.cfg.pan,
            Axis::Tilt => &self.cfg.tilt,
        }
    }

    /// Enable torque and apply the configured moving speed on both axes
    pub async fn startup(&self) -> Result<(), ServoError> {
        for axis in Axis::ALL {
            let mut bus = self.bus.lock().await;
            bus.enable_torque(axis)
                .await
                .map_err(|source| ServoError::Comm { axis, source })?;
            bus.set_moving_speed(axis, self.cfg.moving_speed)
                .await
                .map_err(|source| ServoError::Comm { axis, source })?;
            info!(
                "{axis}: torque enabled, moving speed {}",
                self.cfg.moving_speed
            );
        }
        Ok(())
    }

    /// Read the present position straight from the device
    ///
    /// Never answered from a cached goal: the axis can be perturbed
    /// externally between cycles, so the device is the source of truth.
    pub async fn present_position(&self, axis: Axis) -> Result<u16, ServoError> {
        self.bus
            .lock()
            .await
            .read_position(axis)
            .await
            .map_err(|source| ServoError::Comm { axis, source })
    }

    /// Issue a bounds-checked relative move and return the written goal
    ///
    /// Converts the degree delta into position units, adds it to a fresh
    /// position read, and rejects the command outright if the result falls
    /// outside the axis's mechanical bounds.
    pub async fn command_relative(&self, command: AxisCommand) -> Result<u16, ServoError> {
        let axis = command.axis;
        let profile = *self.profile(axis);

        let present = self.present_position(axis).await?;

        let delta_units = (command.delta_degrees / self.cfg.degrees_per_unit).round() as i32;
        let signed = if profile.invert {
            -delta_units
        } else {
            delta_units
        };
        let goal = i32::from(present) + signed;

        if goal < i32::from(profile.min_units) || goal > i32::from(profile.max_units) {
            return Err(ServoError::TargetUnreachable {
                axis,
                goal,
                min: profile.min_units,
                max: profile.max_units,
            });
        }

        let goal = goal as u16;
        self.bus
            .lock()
            .await
            .write_goal(axis, goal)
            .await
            .map_err(|source| ServoError::Comm { axis, source })?;
        debug!(
            "{axis}: goal {goal} written ({:+.2}° from {present})",
            command.delta_degrees
        );
        Ok(goal)
    }

    /// Poll the present position until the axis arrives at `goal`
    ///
    /// Arrival means |goal − present| is within the axis's moving threshold.
    /// The poll is paced by the configured interval and bounded by the
    /// attempt budget; reads failing `read_failure_budget` times in a row
    /// abandon the wait with a communication error.
    pub async fn wait_for_goal(&self, axis: Axis, goal: u16) -> Result<(), ServoError> {
        let profile = *self.profile(axis);
        let mut failed_reads: u32 = 0;
        let mut last: Option<u16> = None;

        for attempt in 1..=self.cfg.max_poll_attempts {
            match self.bus.lock().await.read_position(axis).await {
                Ok(present) => {
                    failed_reads = 0;
                    last = Some(present);
                    if (i32::from(goal) - i32::from(present)).abs()
                        <= i32::from(profile.moving_threshold)
                    {
                        debug!("{axis}: reached {present} (goal {goal}) after {attempt} polls");
                        return Ok(());
                    }
                }
                Err(source) => {
                    failed_reads += 1;
                    warn!(
                        "{axis}: position read failed ({failed_reads}/{}): {source}",
                        self.cfg.read_failure_budget
                    );
                    if failed_reads >= self.cfg.read_failure_budget {
                        return Err(ServoError::Comm { axis, source });
                    }
                }
            }
            sleep(self.cfg.poll_interval()).await;
        }

        Err(ServoError::GoalTimeout {
            axis,
            goal,
            attempts: self.cfg.max_poll_attempts,
            last,
        })
    }

    /// Drive one axis through a full command cycle
    ///
    /// Composes the relative move with the wait-for-goal phase and collapses
    /// the result into an outcome. Outcomes other than `Reached` are logged
    /// here with full context; none of them affect the other axis.
    pub async fn drive(&self, command: AxisCommand) -> AxisOutcome {
        let axis = command.axis;
        match self.command_relative(command).await {
            Err(err @ ServoError::TargetUnreachable { .. }) => {
                warn!("{err}, skipping cycle");
                AxisOutcome::RejectedOutOfRange
            }
            Err(err) => {
                warn!("{axis}: command failed: {err}");
                AxisOutcome::CommError
            }
            Ok(goal) => match self.wait_for_goal(axis, goal).await {
                Ok(()) => AxisOutcome::Reached,
                Err(err @ ServoError::GoalTimeout { .. }) => {
                    warn!("{err}");
                    AxisOutcome::TimedOut
                }
                Err(err) => {
                    warn!("{err}");
                    AxisOutcome::CommError
                }
            },
        }
    }

    /// Drive both axes to their configured neutral position and wait for both
    pub async fn return_home(&self) -> Result<(), ServoError> {
        info!("returning home");
        for axis in Axis::ALL {
            let home = self.profile(axis).home_units;
            self.bus
                .lock()
                .await
                .write_goal(axis, home)
                .await
                .map_err(|source| ServoError::Comm { axis, source })?;
        }
        // Writes above serialize on the bus; the waits interleave freely
        let (pan, tilt) = tokio::join!(
            self.wait_for_goal(Axis::Pan, self.cfg.pan.home_units),
            self.wait_for_goal(Axis::Tilt, self.cfg.tilt.home_units),
        );
        pan?;
        tilt?;
        Ok(())
    }

    /// Disable torque on both axes
    ///
    /// Always attempted on shutdown, even after earlier failures; a per-axis
    /// error is reported and does not stop the other axis.
    pub async fn safe_state(&self) {
        for axis in Axis::ALL {
            info!("{axis}: disabling torque");
            if let Err(err) = self.bus.lock().await.disable_torque(axis).await {
                error!("{axis}: failed to disable torque: {err}");
            }
        }
    }

    /// Scripted motion exercise: sweep both axes and return home, twice
    pub async fn self_test(&self) -> Result<(), ServoError> {
        for pan_sweep in [-90.0, 90.0] {
            for (axis, delta_degrees) in [
                (Axis::Pan, pan_sweep),
                (Axis::Tilt, 30.0),
                (Axis::Tilt, -60.0),
            ] {
                let goal = self
                    .command_relative(AxisCommand {
                        axis,
                        delta_degrees,
                    })
                    .await?;
                self.wait_for_goal(axis, goal).await?;
            }
            self.return_home().await?;
        }
        Ok(())
    }
}

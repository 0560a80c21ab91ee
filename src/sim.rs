//! Synthetic collaborators for demo runs and tests
//!
//! A `Scene` supplies the ground-truth target path, the frame source renders
//! placeholder buffers at the working resolution, the tracker reads the
//! scene instead of doing vision, and the bus integrates goal positions
//! kinematically. Together they let the full pipeline run without a camera
//! or a servo rig attached.

use crate::capture::{CaptureError, FrameSource};
use crate::pipeline::types::{Frame, Region};
use crate::servo::axis::Axis;
use crate::servo::bus::{ActuatorBus, BusError};
use crate::tracker::{ObjectTracker, RoiSource, TrackUpdate};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ground truth for the synthetic rig: target position per frame
#[derive(Debug, Clone, Copy)]
pub struct Scene {
    origin: (f64, f64),
    drift_per_frame: (f64, f64),
}

impl Scene {
    /// Target fixed at one position
    pub fn fixed(x: f64, y: f64) -> Self {
        Self {
            origin: (x, y),
            drift_per_frame: (0.0, 0.0),
        }
    }

    /// Target drifting linearly from an origin
    pub fn drifting(origin: (f64, f64), drift_per_frame: (f64, f64)) -> Self {
        Self {
            origin,
            drift_per_frame,
        }
    }

    /// Target center at the given frame sequence number
    pub fn target_at(&self, seq: u64) -> (f64, f64) {
        (
            self.origin.0 + self.drift_per_frame.0 * seq as f64,
            self.origin.1 + self.drift_per_frame.1 * seq as f64,
        )
    }
}

/// Frame source producing gray placeholder buffers at a fixed rate
pub struct SimFrameSource {
    width: u32,
    height: u32,
    interval: Duration,
    remaining: Option<u64>,
    fail_after: Option<u64>,
    produced: u64,
}

impl SimFrameSource {
    /// Produce `frames` frames then report end of stream; 0 runs forever
    pub fn new(width: u32, height: u32, frames: u64, interval: Duration) -> Self {
        Self {
            width,
            height,
            interval,
            remaining: (frames > 0).then_some(frames),
            fail_after: None,
            produced: 0,
        }
    }

    /// Report a device error after `frames` frames instead of end of stream
    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }
}

#[async_trait]
impl FrameSource for SimFrameSource {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    async fn next_frame(&mut self) -> Result<Bytes, CaptureError> {
        if let Some(limit) = self.fail_after
            && self.produced >= limit
        {
            return Err(CaptureError::Device("simulated disconnect".into()));
        }
        if let Some(remaining) = self.remaining {
            if remaining == 0 {
                return Err(CaptureError::EndOfStream);
            }
            self.remaining = Some(remaining - 1);
        }
        tokio::time::sleep(self.interval).await;
        self.produced += 1;
        Ok(Bytes::from(vec![
            0u8;
            (self.width * self.height) as usize
        ]))
    }
}

/// Tracker that reads target positions from the scene
pub struct SimTracker {
    scene: Scene,
    box_size: f64,
    lose_after: Option<u64>,
}

impl SimTracker {
    pub fn new(scene: Scene) -> Self {
        Self {
            scene,
            box_size: 60.0,
            lose_after: None,
        }
    }

    /// Report the target as lost from the given frame sequence onward
    pub fn losing_after(mut self, seq: u64) -> Self {
        self.lose_after = Some(seq);
        self
    }
}

#[async_trait]
impl ObjectTracker for SimTracker {
    async fn init(&mut self, _frame: &Frame, _region: Region) -> anyhow::Result<()> {
        Ok(())
    }

    async fn update(&mut self, frame: &Frame) -> Option<TrackUpdate> {
        if let Some(limit) = self.lose_after
            && frame.seq >= limit
        {
            return None;
        }
        let (x, y) = self.scene.target_at(frame.seq);
        Some(TrackUpdate {
            region: Region::new(
                x - self.box_size / 2.0,
                y - self.box_size / 2.0,
                self.box_size,
                self.box_size,
            ),
            confidence: 0.9,
        })
    }
}

/// Region selection that answers after a fixed number of offered frames
pub struct PresetRoi {
    region: Region,
    skip_frames: u64,
    offered: u64,
}

impl PresetRoi {
    /// Select `region` on the first offered frame after skipping `skip_frames`
    pub fn new(region: Region, skip_frames: u64) -> Self {
        Self {
            region,
            skip_frames,
            offered: 0,
        }
    }
}

#[async_trait]
impl RoiSource for PresetRoi {
    async fn select(&mut self, _frame: &Frame) -> Option<Region> {
        if self.offered >= self.skip_frames {
            return Some(self.region);
        }
        self.offered += 1;
        None
    }
}

/// Kinematic actuator bus: positions step toward goals on every read
pub struct SimBus {
    shared: Arc<Mutex<SimBusState>>,
}

/// Inspectable state of the simulated bus
#[derive(Debug)]
pub struct SimBusState {
    /// Present positions, indexed by [pan, tilt]
    pub positions: [u16; 2],
    /// Pending goals, if any
    pub goals: [Option<u16>; 2],
    /// Torque flags
    pub torque: [bool; 2],
    /// Moving speeds applied at startup
    pub speed: [u16; 2],
    /// Every goal write, in bus order
    pub writes: Vec<(Axis, u16)>,
    /// Units each axis advances toward its goal per successful read
    pub step_units: u16,
    /// Inject read failures: after `skip` successful reads, fail `count`
    /// reads in a row
    pub fail_reads: (u32, u32),
    reads_seen: u32,
}

fn index(axis: Axis) -> usize {
    match axis {
        Axis::Pan => 0,
        Axis::Tilt => 1,
    }
}

impl SimBus {
    pub fn new(pan_position: u16, tilt_position: u16) -> Self {
        Self {
            shared: Arc::new(Mutex::new(SimBusState {
                positions: [pan_position, tilt_position],
                goals: [None, None],
                torque: [false, false],
                speed: [0, 0],
                writes: Vec::new(),
                step_units: 64,
                fail_reads: (0, 0),
                reads_seen: 0,
            })),
        }
    }

    /// Handle for inspecting and perturbing the bus from tests
    pub fn shared(&self) -> Arc<Mutex<SimBusState>> {
        Arc::clone(&self.shared)
    }
}

#[async_trait]
impl ActuatorBus for SimBus {
    async fn enable_torque(&mut self, axis: Axis) -> Result<(), BusError> {
        self.shared.lock().unwrap().torque[index(axis)] = true;
        Ok(())
    }

    async fn disable_torque(&mut self, axis: Axis) -> Result<(), BusError> {
        self.shared.lock().unwrap().torque[index(axis)] = false;
        Ok(())
    }

    async fn read_position(&mut self, axis: Axis) -> Result<u16, BusError> {
        let mut state = self.shared.lock().unwrap();
        state.reads_seen += 1;
        let (skip, count) = state.fail_reads;
        if state.reads_seen > skip && state.reads_seen <= skip + count {
            return Err(BusError("injected read failure".into()));
        }

        let i = index(axis);
        if let Some(goal) = state.goals[i] {
            let present = i32::from(state.positions[i]);
            let step = i32::from(state.step_units);
            let diff = i32::from(goal) - present;
            let moved = present + diff.clamp(-step, step);
            state.positions[i] = moved as u16;
        }
        Ok(state.positions[i])
    }

    async fn write_goal(&mut self, axis: Axis, units: u16) -> Result<(), BusError> {
        let mut state = self.shared.lock().unwrap();
        state.goals[index(axis)] = Some(units);
        state.writes.push((axis, units));
        Ok(())
    }

    async fn set_moving_speed(&mut self, axis: Axis, speed: u16) -> Result<(), BusError> {
        self.shared.lock().unwrap().speed[index(axis)] = speed;
        Ok(())
    }
}

use log::debug;

use crate::{
    hardware::{Hardware, OutputPin, ServoChannel, StatusPanel},
    state::{BaseMode, SystemState, ARMED, CALIB_ON, FIRING, LASER_ON},
};

pub const MIN_TILT: f32 = -45.0;
pub const MAX_TILT: f32 = 45.0;
pub const MIN_PAN: f32 = -60.0;
pub const MAX_PAN: f32 = 60.0;

/// The actuator gate.
///
/// Owns the composite state word together with the hardware handle. The word is
/// private: flags change only through [Actuators::laser], [Actuators::fire],
/// [Actuators::armed] and [Actuators::calibrate], each of which updates the bit and
/// issues the physical write in one step. Callers reach the gate through the turret
/// lock, which makes that lock the single synchronization point for actuator state.
pub struct Actuators {
    state: SystemState,
    hardware: Box<dyn Hardware>,
    panel: StatusPanel,
}

impl Actuators {
    /// Drives every output low and starts in SAFE
    pub fn new(hardware: Box<dyn Hardware>) -> Actuators {
        let mut gate = Self {
            state: SystemState::new(BaseMode::Safe, 0),
            hardware,
            panel: StatusPanel::default(),
        };
        gate.laser(false);
        gate.fire(false);
        gate.calibrate(false);
        gate
    }

    pub fn state(&self) -> SystemState {
        self.state
    }
    pub fn base_mode(&self) -> Option<BaseMode> {
        self.state.base_mode()
    }

    pub fn laser(&mut self, on: bool) {
        self.state = self.state.with_flag(LASER_ON, on);
        self.hardware.write_pin(OutputPin::Laser, on);
    }
    pub fn fire(&mut self, on: bool) {
        self.state = self.state.with_flag(FIRING, on);
        self.hardware.write_pin(OutputPin::Fire, on);
    }
    /// Purely logical, there is no pin behind the armed flag
    pub fn armed(&mut self, on: bool) {
        self.state = self.state.with_flag(ARMED, on);
    }
    pub fn calibrate(&mut self, on: bool) {
        self.state = self.state.with_flag(CALIB_ON, on);
    }

    /// Laser, fire and calibration off
    pub fn disarm_outputs(&mut self) {
        self.laser(false);
        self.calibrate(false);
        self.fire(false);
    }

    /// Everything off including the armed flag
    pub fn disarm_all(&mut self) {
        self.disarm_outputs();
        self.armed(false);
    }

    /// Moves the base-mode field. Flags are left as they are.
    pub fn set_base(&mut self, mode: BaseMode) {
        if self.state.base_mode() != Some(mode) {
            debug!("Base mode {:?} -> {}", self.state.base_mode(), mode);
        }
        self.state = self.state.with_base(mode);
    }

    /// Clamps the angle to the servo's hardware-safe range and writes it
    pub fn servo(&mut self, channel: ServoChannel, degrees: f32) -> f32 {
        let clamped = match channel {
            ServoChannel::Pan => degrees.clamp(MIN_PAN, MAX_PAN),
            ServoChannel::Tilt => degrees.clamp(MIN_TILT, MAX_TILT),
        };
        self.hardware.servo_angle(channel, clamped);
        clamped
    }

    /// Refreshes the on-device status display, returns the word to broadcast
    pub fn publish(&mut self) -> SystemState {
        self.panel.update(self.state, self.hardware.as_mut());
        self.state
    }

    pub fn release(&mut self) {
        self.disarm_all();
        self.hardware.release();
    }
}

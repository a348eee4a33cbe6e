use crate::state::{SystemState, ARMED, FIRING, LASER_ON};

/// Digital outputs driven by the turret
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputPin {
    /// gpio 17
    Fire,
    /// gpio 18
    Laser,
}

impl OutputPin {
    pub fn gpio(self) -> u32 {
        match self {
            OutputPin::Fire => 17,
            OutputPin::Laser => 18,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServoChannel {
    Pan,
    Tilt,
}

impl ServoChannel {
    pub fn channel(self) -> u8 {
        match self {
            ServoChannel::Pan => 1,
            ServoChannel::Tilt => 2,
        }
    }
}

/// The physical edge of the turret.
///
/// Implementations are only ever called by the actuator gate while the turret
/// lock is held, so they never see two writers at once.
pub trait Hardware: Send {
    fn write_pin(&mut self, pin: OutputPin, high: bool);
    fn servo_angle(&mut self, channel: ServoChannel, degrees: f32);
    /// Rewrites one line of the on-device status display
    fn status_line(&mut self, line: usize, text: &str);
    /// Releases the gpio chip, servo board and display
    fn release(&mut self) {}
}

/// Keeps the three line status display in step with the state word,
/// redrawing only the lines whose content changed.
#[derive(Default)]
pub struct StatusPanel {
    last: Option<SystemState>,
}

impl StatusPanel {
    pub fn update(&mut self, state: SystemState, hardware: &mut dyn Hardware) {
        if self.last == Some(state) {
            return;
        }
        let last = self.last;
        let changed = |flag: u32| match last {
            Some(l) => l.has(flag) != state.has(flag),
            None => true,
        };

        let base_changed = match last {
            Some(l) => l.base_mode() != state.base_mode() || l.has(ARMED) != state.has(ARMED),
            None => true,
        };
        if base_changed {
            let mut line = match state.base_mode() {
                Some(mode) => mode.label().to_string(),
                None => "Unknown".to_string(),
            };
            if state.has(ARMED) {
                line.push_str("-ARMED");
            }
            hardware.status_line(0, &line);
        }
        if changed(LASER_ON) {
            let line = if state.has(LASER_ON) { "LASER-ON" } else { "LASER-OFF" };
            hardware.status_line(1, line);
        }
        if changed(FIRING) {
            let line = if state.has(FIRING) { "FIRING-TRUE" } else { "FIRING-FALSE" };
            hardware.status_line(2, line);
        }
        self.last = Some(state);
    }
}

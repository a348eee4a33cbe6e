use log::{debug, info, warn};
use tokio::time::Instant;

use crate::{
    actuators::{MAX_PAN, MAX_TILT, MIN_PAN, MIN_TILT},
    detector::Strategy,
    hardware::ServoChannel,
    outbox::{Effect, Outbox},
    state::{BaseMode, CALIB_ON},
    turret::{Rejection, Turret},
};

/// Degrees moved per jog command
pub const INC: f32 = 0.5;

pub const PAN_LEFT_START: u8 = 0x01;
pub const PAN_RIGHT_START: u8 = 0x02;
pub const PAN_UP_START: u8 = 0x04;
pub const PAN_DOWN_START: u8 = 0x08;
pub const FIRE_START: u8 = 0x10;
pub const PAN_LEFT_STOP: u8 = !PAN_LEFT_START;
pub const PAN_RIGHT_STOP: u8 = !PAN_RIGHT_START;
pub const PAN_UP_STOP: u8 = !PAN_UP_START;
pub const PAN_DOWN_STOP: u8 = !PAN_DOWN_START;
pub const FIRE_STOP: u8 = !FIRE_START;
pub const STOP: u8 = 0x11;
pub const PAUSE: u8 = 0x12;
pub const RESUME: u8 = 0x13;

pub const DEC_X: u8 = 0x01;
pub const INC_X: u8 = 0x02;
pub const DEC_Y: u8 = 0x04;
pub const INC_Y: u8 = 0x08;

/// Operator command bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    PanLeftStart,
    PanRightStart,
    PanUpStart,
    PanDownStart,
    FireStart,
    PanLeftStop,
    PanRightStop,
    PanUpStop,
    PanDownStop,
    FireStop,
    Stop,
    Pause,
    Resume,
    Select(Strategy),
}

impl Command {
    pub fn code(self) -> u8 {
        match self {
            Command::PanLeftStart => PAN_LEFT_START,
            Command::PanRightStart => PAN_RIGHT_START,
            Command::PanUpStart => PAN_UP_START,
            Command::PanDownStart => PAN_DOWN_START,
            Command::FireStart => FIRE_START,
            Command::PanLeftStop => PAN_LEFT_STOP,
            Command::PanRightStop => PAN_RIGHT_STOP,
            Command::PanUpStop => PAN_UP_STOP,
            Command::PanDownStop => PAN_DOWN_STOP,
            Command::FireStop => FIRE_STOP,
            Command::Stop => STOP,
            Command::Pause => PAUSE,
            Command::Resume => RESUME,
            Command::Select(s) => s.command(),
        }
    }
    fn is_fire(self) -> bool {
        matches!(self, Command::FireStart | Command::FireStop)
    }
    /// Jog and fire move hardware by hand
    fn is_manual(self) -> bool {
        !matches!(self, Command::Stop | Command::Pause | Command::Resume | Command::Select(_))
    }
}

impl TryFrom<u8> for Command {
    type Error = Rejection;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            PAN_LEFT_START => Command::PanLeftStart,
            PAN_RIGHT_START => Command::PanRightStart,
            PAN_UP_START => Command::PanUpStart,
            PAN_DOWN_START => Command::PanDownStart,
            FIRE_START => Command::FireStart,
            PAN_LEFT_STOP => Command::PanLeftStop,
            PAN_RIGHT_STOP => Command::PanRightStop,
            PAN_UP_STOP => Command::PanUpStop,
            PAN_DOWN_STOP => Command::PanDownStop,
            FIRE_STOP => Command::FireStop,
            STOP => Command::Stop,
            PAUSE => Command::Pause,
            RESUME => Command::Resume,
            _ => match Strategy::from_command(code) {
                Some(strategy) => Command::Select(strategy),
                None => return Err(Rejection::UnknownCommand(code)),
            },
        })
    }
}

/// Offset correction adjustments
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibCommand {
    DecX,
    IncX,
    DecY,
    IncY,
}

impl TryFrom<u8> for CalibCommand {
    type Error = Rejection;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            DEC_X => CalibCommand::DecX,
            INC_X => CalibCommand::IncX,
            DEC_Y => CalibCommand::DecY,
            INC_Y => CalibCommand::IncY,
            _ => return Err(Rejection::UnknownCommand(code)),
        })
    }
}

enum Axis {
    Pan,
    Tilt,
}

impl Turret {
    /// Operator commands. Jog and fire are accepted only while PREARMED or
    /// ARMED_MANUAL, fire additionally needs ARMED_MANUAL. Stop, pause, resume and
    /// algorithm selection also reach a running engagement. Nothing is accepted in SAFE.
    pub fn process_command(&mut self, code: u8, out: &mut Outbox) -> Result<(), Rejection> {
        let state = self.state();
        let manual = state.is(BaseMode::Prearmed) || state.is(BaseMode::ArmedManual);
        if !manual && !state.is(BaseMode::EngageAuto) {
            debug!("Command {:#x} ignored in {}", code, state);
            return Err(Rejection::OutsideManualModes);
        }
        let cmd = Command::try_from(code).map_err(|e| {
            warn!("Invalid command {:#x}", code);
            e
        })?;
        if cmd.is_manual() && !manual {
            debug!("Manual command {:?} ignored in {}", cmd, state);
            return Err(Rejection::OutsideManualModes);
        }
        if cmd.is_fire() && !state.is(BaseMode::ArmedManual) {
            debug!("Fire command ignored in {}", state);
            return Err(Rejection::FireOutsideArmedManual);
        }

        match cmd {
            Command::PanLeftStart => {
                self.press(PAN_LEFT_START, PAN_RIGHT_START);
                self.jog(Axis::Pan, INC, out)
            }
            Command::PanRightStart => {
                self.press(PAN_RIGHT_START, PAN_LEFT_START);
                self.jog(Axis::Pan, -INC, out)
            }
            Command::PanUpStart => {
                self.press(PAN_UP_START, PAN_DOWN_START);
                self.jog(Axis::Tilt, INC, out)
            }
            Command::PanDownStart => {
                self.press(PAN_DOWN_START, PAN_UP_START);
                self.jog(Axis::Tilt, -INC, out)
            }
            Command::FireStart => {
                self.held_keys |= FIRE_START;
                self.gate.fire(true);
                self.broadcast_state(out);
                Ok(())
            }
            Command::FireStop => {
                self.held_keys &= FIRE_STOP;
                self.gate.fire(false);
                self.broadcast_state(out);
                Ok(())
            }
            Command::PanLeftStop | Command::PanRightStop | Command::PanUpStop | Command::PanDownStop => {
                self.held_keys &= cmd.code();
                Ok(())
            }
            Command::Stop => {
                info!("Stop requested");
                let result = self.enter_prearm(true, out);
                self.broadcast_state(out);
                result
            }
            Command::Pause => {
                info!("Engagement paused");
                self.paused = true;
                out.title("Paused!");
                Ok(())
            }
            Command::Resume => {
                info!("Engagement resumed");
                self.paused = false;
                self.engagement.restart_seek_clock(Instant::now());
                out.title("Resumed!");
                Ok(())
            }
            Command::Select(strategy) => {
                info!("Algorithm {:?} selected", strategy);
                self.strategy = strategy;
                out.effect(Effect::SelectStrategy(strategy));
                out.response(strategy.command());
                Ok(())
            }
        }
    }

    fn press(&mut self, key: u8, opposite: u8) {
        self.held_keys |= key;
        self.held_keys &= !opposite;
    }

    /// Moves one axis a step. At a hardware bound the axis pins to the bound and
    /// the move is refused.
    fn jog(&mut self, axis: Axis, step: f32, out: &mut Outbox) -> Result<(), Rejection> {
        let (current, min, max, channel) = match axis {
            Axis::Pan => (self.pan, MIN_PAN, MAX_PAN, ServoChannel::Pan),
            Axis::Tilt => (self.tilt, MIN_TILT, MAX_TILT, ServoChannel::Tilt),
        };
        let wanted = current + step;
        let bound = if wanted >= max {
            Some(max)
        } else if wanted <= min {
            Some(min)
        } else {
            None
        };
        let angle = self.gate.servo(channel, bound.unwrap_or(wanted));
        match axis {
            Axis::Pan => self.pan = angle,
            Axis::Tilt => self.tilt = angle,
        }
        if bound.is_some() {
            warn!("Movement is not allowed, pan = {:.2}, tilt = {:.2}", self.pan, self.tilt);
            out.alert(format!(
                "Movement is not allowed, pan = {:.2}, tilt = {:.2}",
                self.pan, self.tilt
            ));
            return Err(Rejection::MoveNotAllowed {
                pan: self.pan,
                tilt: self.tilt,
            });
        }
        Ok(())
    }

    /// Nudges the pixel offset correction. Accepted while PREARMED, ARMED_MANUAL
    /// or calibrating.
    pub fn process_calib_command(&mut self, code: u8, _out: &mut Outbox) -> Result<(), Rejection> {
        let state = self.state();
        if !state.is(BaseMode::Prearmed) && !state.is(BaseMode::ArmedManual) && !state.has(CALIB_ON) {
            debug!("Calibration command {:#x} ignored in {}", code, state);
            return Err(Rejection::OutsideManualModes);
        }
        let c = &mut self.calibration;
        match CalibCommand::try_from(code)? {
            CalibCommand::DecX => c.x_correct += 1.0,
            CalibCommand::IncX => c.x_correct -= 1.0,
            CalibCommand::DecY => c.y_correct -= 1.0,
            CalibCommand::IncY => c.y_correct += 1.0,
        }
        debug!("Offsets now x {} y {}", c.x_correct, c.y_correct);
        Ok(())
    }
}

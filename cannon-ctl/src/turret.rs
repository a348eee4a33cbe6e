use log::{info, warn};
use thiserror::Error;

use crate::{
    actuators::Actuators,
    calibration::Calibration,
    detector::Strategy,
    engagement::{Engagement, EngagementState, FiringOrder, FiringOrderError},
    hardware::{Hardware, ServoChannel},
    outbox::{Effect, Outbox},
    state::{BaseMode, SystemState, ARMED, CALIB_ON, LASER_ON},
};

/// Key the prearm passcode is XORed with on the wire
pub const PASSCODE_KEY: [u8; 8] = [0x61, 0x60, 0x76, 0x75, 0x67, 0x7b, 0x72, 0x7c];
pub const PASSCODE: &[u8; 8] = b"PREARMED";

/// Obfuscates (or recovers) a passcode
pub fn xor_passcode(code: &[u8; 8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    for (i, b) in code.iter().enumerate() {
        out[i] = b ^ PASSCODE_KEY[i];
    }
    out
}

/// Why the turret refused a request. The turret's state is unchanged in every case.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: SystemState, to: BaseMode },
    #[error("no firing order")]
    NoFiringOrder,
    #[error("unknown requested mode {0:#x}")]
    UnknownMode(u32),
    #[error("unknown command byte {0:#x}")]
    UnknownCommand(u8),
    #[error("command received outside PREARMED or ARMED_MANUAL")]
    OutsideManualModes,
    #[error("fire command received outside ARMED_MANUAL")]
    FireOutsideArmedManual,
    #[error("prearm request outside SAFE")]
    NotSafe,
    #[error("passcode rejected")]
    BadPasscode,
    #[error("movement is not allowed, pan = {pan:.2}, tilt = {tilt:.2}")]
    MoveNotAllowed { pan: f32, tilt: f32 },
}

/// Everything the turret knows about itself.
///
/// One of these lives for the whole process behind the session's turret lock.
/// Every handler takes `&mut self`, so holding the lock is a precondition of
/// calling it, and none of them take the lock again.
pub struct Turret {
    pub(crate) gate: Actuators,
    pub(crate) engagement: Engagement,
    pub(crate) pan: f32,
    pub(crate) tilt: f32,
    pub(crate) calibration: Calibration,
    pub(crate) calibrate_was_on: bool,
    pub(crate) paused: bool,
    pub(crate) strategy: Strategy,
    pub(crate) held_keys: u8,
}

impl Turret {
    /// Starts SAFE with every output low and both servos centred
    pub fn new(hardware: Box<dyn Hardware>, calibration: Calibration, strategy: Strategy) -> Turret {
        let mut gate = Actuators::new(hardware);
        let pan = gate.servo(ServoChannel::Pan, 0.0);
        let tilt = gate.servo(ServoChannel::Tilt, 0.0);
        gate.publish();
        Self {
            gate,
            engagement: Engagement::default(),
            pan,
            tilt,
            calibration,
            calibrate_was_on: false,
            paused: false,
            strategy,
            held_keys: 0,
        }
    }

    pub fn state(&self) -> SystemState {
        self.gate.state()
    }
    pub fn engagement(&self) -> &Engagement {
        &self.engagement
    }
    /// Pan then tilt, in degrees
    pub fn position(&self) -> (f32, f32) {
        (self.pan, self.tilt)
    }
    pub fn calibration(&self) -> Calibration {
        self.calibration
    }
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
    pub fn is_paused(&self) -> bool {
        self.paused
    }
    pub fn held_keys(&self) -> u8 {
        self.held_keys
    }

    /// Refreshes the status panel and queues the state word for the client
    pub fn broadcast_state(&mut self, out: &mut Outbox) {
        let state = self.gate.publish();
        out.state(state);
    }

    /// Always legal. Everything off, firing order forgotten.
    pub fn enter_safe(&mut self, out: &mut Outbox) {
        info!("Enter SAFE from {}", self.state());
        self.gate.disarm_all();
        self.gate.set_base(BaseMode::Safe);
        self.engagement.reset();
        self.paused = false;
        out.response(self.strategy.command());
    }

    /// Legal from ENGAGE_AUTO and ARMED_MANUAL only. Refusals are not reported to the client.
    pub fn enter_prearm(&mut self, reset: bool, _out: &mut Outbox) -> Result<(), Rejection> {
        self.paused = false;
        let from = self.state();
        let from_auto = match from.base_mode() {
            Some(BaseMode::EngageAuto) => true,
            Some(BaseMode::ArmedManual) => false,
            _ => {
                warn!("Refused PREARMED from {}", from);
                return Err(Rejection::IllegalTransition {
                    from,
                    to: BaseMode::Prearmed,
                });
            }
        };
        info!("Enter PREARMED from {}", from);
        self.gate.disarm_all();
        if from_auto {
            self.engagement.deactivate();
            if reset {
                self.engagement.clear_firing_order();
            }
        }
        self.gate.set_base(BaseMode::Prearmed);
        Ok(())
    }

    /// Legal from PREARMED with a firing order loaded
    pub fn enter_auto_engage(&mut self, out: &mut Outbox) -> Result<(), Rejection> {
        let from = self.state();
        if !from.is(BaseMode::Prearmed) {
            warn!("Refused ENGAGE AUTO from {}", from);
            out.alert(format!("Invalid State request to Auto {}", from.raw()));
            return Err(Rejection::IllegalTransition {
                from,
                to: BaseMode::EngageAuto,
            });
        }
        if !self.engagement.have_firing_order() {
            warn!("Refused ENGAGE AUTO without a firing order");
            out.alert("No Firing Order List");
            return Err(Rejection::NoFiringOrder);
        }
        info!("Enter ENGAGE AUTO with order {:?}", self.engagement.firing_order());
        self.gate.disarm_all();
        self.gate.set_base(BaseMode::EngageAuto);
        self.engagement.activate();
        Ok(())
    }

    /// Legal from PREARMED, or as a re-entry from ARMED_MANUAL which changes nothing
    pub fn enter_armed_manual(&mut self, out: &mut Outbox) -> Result<(), Rejection> {
        self.paused = false;
        let from = self.state();
        match from.base_mode() {
            Some(BaseMode::Prearmed) => {
                info!("Enter ARMED_MANUAL from {}", from);
                self.gate.disarm_all();
                self.gate.set_base(BaseMode::ArmedManual);
                Ok(())
            }
            Some(BaseMode::ArmedManual) => Ok(()),
            _ => {
                warn!("Refused ARMED_MANUAL from {}", from);
                out.alert(format!("Invalid State request to Armed Manual {}", from.raw()));
                Err(Rejection::IllegalTransition {
                    from,
                    to: BaseMode::ArmedManual,
                })
            }
        }
    }

    /// Routes a requested composite state to its transition, then settles the laser
    /// and calibration flags and broadcasts the result.
    ///
    /// The requested laser and calibration bits are honoured only on ARMED_MANUAL
    /// re-entry; any other accepted transition leaves them off and a refusal leaves
    /// them as they were. Leaving calibration persists the offsets.
    pub fn process_state_change_request(
        &mut self,
        requested: SystemState,
        out: &mut Outbox,
    ) -> Result<(), Rejection> {
        let reentry = self.state().is(BaseMode::ArmedManual) && requested.is(BaseMode::ArmedManual);
        let result = match requested.base_mode() {
            Some(BaseMode::Safe) => {
                self.enter_safe(out);
                Ok(())
            }
            Some(BaseMode::Prearmed) => self.enter_prearm(true, out),
            Some(BaseMode::EngageAuto) => self.enter_auto_engage(out),
            Some(BaseMode::ArmedManual) => self.enter_armed_manual(out),
            None => {
                warn!("Unknown state request {:#x}", requested.raw());
                Err(Rejection::UnknownMode(requested.raw()))
            }
        };

        let flags = if reentry && result.is_ok() {
            requested
        } else {
            self.state()
        };
        self.gate.laser(flags.has(LASER_ON));
        if flags.has(CALIB_ON) {
            self.gate.calibrate(true);
            self.calibrate_was_on = true;
        } else {
            self.gate.calibrate(false);
            if self.calibrate_was_on {
                self.calibrate_was_on = false;
                out.effect(Effect::SaveCalibration(self.calibration));
            }
        }

        self.broadcast_state(out);
        result
    }

    /// Passcode gate into PREARMED, inert unless SAFE
    pub fn process_prearm(&mut self, code: &[u8], out: &mut Outbox) -> Result<(), Rejection> {
        if self.state() != SystemState::new(BaseMode::Safe, 0) {
            warn!("Prearm request ignored in {}", self.state());
            return Err(Rejection::NotSafe);
        }
        let end = code.iter().position(|b| *b == 0).unwrap_or(code.len());
        let code: &[u8; 8] = code[..end].try_into().map_err(|_| Rejection::BadPasscode)?;
        if &xor_passcode(code) != PASSCODE {
            warn!("Prearm passcode rejected");
            return Err(Rejection::BadPasscode);
        }
        info!("Passcode accepted, enter PREARMED");
        self.gate.set_base(BaseMode::Prearmed);
        self.broadcast_state(out);
        Ok(())
    }

    /// Replaces the firing order. The sequencer stops whatever it was doing and
    /// a running engagement is disarmed and reported.
    pub fn process_firing_order(&mut self, text: &[u8], out: &mut Outbox) -> Result<(), FiringOrderError> {
        let interrupted = self.engagement.state() != EngagementState::NotActive || self.state().has(ARMED);
        self.engagement.deactivate();
        self.engagement.clear_firing_order();
        if interrupted {
            info!("Firing order replaced mid engagement, disarming");
            self.gate.disarm_all();
            self.broadcast_state(out);
        }
        match FiringOrder::parse(text) {
            Ok(order) => {
                info!("Firing order {}", order);
                self.engagement.set_firing_order(order);
                Ok(())
            }
            Err(e) => {
                warn!("Firing order refused: {}", e);
                if e == FiringOrderError::Empty {
                    out.alert(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// A client connected: start it from SAFE and tell it the active algorithm
    pub fn begin_session(&mut self, out: &mut Outbox) {
        self.enter_safe(&mut Outbox::new());
        self.broadcast_state(out);
        out.response(self.strategy.command());
    }

    /// The client is gone, nothing can be told to it any more
    pub fn end_session(&mut self) {
        self.enter_safe(&mut Outbox::new());
        self.gate.publish();
    }

    /// Process shutdown
    pub fn release(&mut self) {
        self.enter_safe(&mut Outbox::new());
        self.gate.publish();
        self.gate.release();
    }
}

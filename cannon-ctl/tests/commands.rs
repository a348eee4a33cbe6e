mod common;

use cannon_ctl::{
    commands::*,
    detector::{Strategy, USE_TF},
    engagement::FiringOrderError,
    network::protocol::Message,
    outbox::{Effect, Outbox},
    state::{BaseMode, FIRING},
    turret::Rejection,
};
use common::*;

#[test]
pub fn jog_pins_to_bound() {
    let (mut turret, _) = prearmed();
    for _ in 0..119 {
        turret.process_command(PAN_LEFT_START, &mut Outbox::new()).unwrap();
    }
    assert_eq!(turret.position(), (59.5, 0.0));

    let mut out = Outbox::new();
    let err = turret.process_command(PAN_LEFT_START, &mut out).unwrap_err();
    assert_eq!(err, Rejection::MoveNotAllowed { pan: 60.0, tilt: 0.0 });
    assert_eq!(turret.position(), (60.0, 0.0));
    assert!(out
        .texts()
        .any(|t| t == "[alert]Movement is not allowed, pan = 60.00, tilt = 0.00"));

    assert!(turret.process_command(PAN_LEFT_START, &mut Outbox::new()).is_err());
    assert_eq!(turret.position(), (60.0, 0.0));

    turret.process_command(PAN_RIGHT_START, &mut Outbox::new()).unwrap();
    assert_eq!(turret.position(), (59.5, 0.0));
}

#[test]
pub fn tilt_jogs_both_ways() {
    let (mut turret, _) = armed_manual();
    turret.process_command(PAN_UP_START, &mut Outbox::new()).unwrap();
    turret.process_command(PAN_UP_START, &mut Outbox::new()).unwrap();
    turret.process_command(PAN_DOWN_START, &mut Outbox::new()).unwrap();
    assert_eq!(turret.position(), (0.0, 0.5));
}

#[test]
pub fn commands_refused_outside_manual_modes() {
    let (mut turret, _) = new_turret();
    assert_eq!(
        turret.process_command(PAN_LEFT_START, &mut Outbox::new()),
        Err(Rejection::OutsideManualModes)
    );
    assert_eq!(turret.position(), (0.0, 0.0));

    let (mut turret, _) = auto_engaging(b"1");
    assert_eq!(
        turret.process_command(PAN_LEFT_START, &mut Outbox::new()),
        Err(Rejection::OutsideManualModes)
    );
    assert_eq!(turret.process_command(PAUSE, &mut Outbox::new()), Ok(()));
    assert!(turret.is_paused());
}

#[test]
pub fn stop_ends_a_running_engagement() {
    let (mut turret, _) = auto_engaging(b"31");
    let mut out = Outbox::new();
    turret.process_command(STOP, &mut out).unwrap();
    assert!(turret.state().is(BaseMode::Prearmed));
    assert!(!turret.engagement().have_firing_order());
    assert_eq!(out.states().count(), 1);
}

#[test]
pub fn fire_needs_armed_manual() {
    let (mut turret, recorder) = prearmed();
    assert_eq!(
        turret.process_command(FIRE_START, &mut Outbox::new()),
        Err(Rejection::FireOutsideArmedManual)
    );
    assert!(!turret.state().has(FIRING));

    let (mut turret, recorder2) = armed_manual();
    let mut out = Outbox::new();
    turret.process_command(FIRE_START, &mut out).unwrap();
    assert!(turret.state().has(FIRING));
    assert_eq!(recorder2.pin(cannon_ctl::hardware::OutputPin::Fire), Some(true));
    assert_eq!(out.states().last(), Some(turret.state()));

    turret.process_command(FIRE_STOP, &mut Outbox::new()).unwrap();
    assert!(!turret.state().has(FIRING));
    assert_eq!(recorder2.pin(cannon_ctl::hardware::OutputPin::Fire), Some(false));
    assert_eq!(recorder.pin(cannon_ctl::hardware::OutputPin::Fire), Some(false));
}

#[test]
pub fn held_keys() {
    let (mut turret, _) = prearmed();
    turret.process_command(PAN_LEFT_START, &mut Outbox::new()).unwrap();
    turret.process_command(PAN_UP_START, &mut Outbox::new()).unwrap();
    assert_eq!(turret.held_keys(), PAN_LEFT_START | PAN_UP_START);

    turret.process_command(PAN_RIGHT_START, &mut Outbox::new()).unwrap();
    assert_eq!(turret.held_keys(), PAN_RIGHT_START | PAN_UP_START);

    turret.process_command(PAN_RIGHT_STOP, &mut Outbox::new()).unwrap();
    turret.process_command(PAN_UP_STOP, &mut Outbox::new()).unwrap();
    assert_eq!(turret.held_keys(), 0);
}

#[test]
pub fn stop_returns_to_prearmed() {
    let (mut turret, _) = armed_manual();
    let mut out = Outbox::new();
    turret.process_command(STOP, &mut out).unwrap();
    assert!(turret.state().is(BaseMode::Prearmed));
    assert_eq!(out.messages, vec![Message::State(turret.state())]);

    // Already PREARMED: refused but still reported
    let mut out = Outbox::new();
    assert!(turret.process_command(STOP, &mut out).is_err());
    assert_eq!(out.states().count(), 1);
}

#[test]
pub fn pause_and_resume() {
    let (mut turret, _) = prearmed();
    let mut out = Outbox::new();
    turret.process_command(PAUSE, &mut out).unwrap();
    assert!(turret.is_paused());
    assert!(out.texts().any(|t| t == "[title]Paused!"));

    let mut out = Outbox::new();
    turret.process_command(RESUME, &mut out).unwrap();
    assert!(!turret.is_paused());
    assert!(out.texts().any(|t| t == "[title]Resumed!"));
}

#[test]
pub fn select_neural_net() {
    let (mut turret, _) = prearmed();
    let mut out = Outbox::new();
    turret.process_command(USE_TF, &mut out).unwrap();
    assert_eq!(turret.strategy(), Strategy::NeuralNet);
    assert_eq!(turret.strategy().epsilon(), 1.2);
    assert_eq!(out.effects, vec![Effect::SelectStrategy(Strategy::NeuralNet)]);
    assert_eq!(out.messages, vec![Message::Commands(USE_TF)]);
}

#[test]
pub fn unknown_command_byte() {
    let (mut turret, _) = prearmed();
    assert_eq!(
        turret.process_command(0x42, &mut Outbox::new()),
        Err(Rejection::UnknownCommand(0x42))
    );
}

#[test]
pub fn calibration_commands() {
    let (mut turret, _) = new_turret();
    assert!(turret.process_calib_command(DEC_X, &mut Outbox::new()).is_err());

    let (mut turret, _) = prearmed();
    turret.process_calib_command(INC_X, &mut Outbox::new()).unwrap();
    turret.process_calib_command(INC_X, &mut Outbox::new()).unwrap();
    turret.process_calib_command(DEC_Y, &mut Outbox::new()).unwrap();
    let c = turret.calibration();
    assert_eq!((c.x_correct, c.y_correct), (58.0, -91.0));

    turret.process_calib_command(DEC_X, &mut Outbox::new()).unwrap();
    turret.process_calib_command(INC_Y, &mut Outbox::new()).unwrap();
    turret.process_calib_command(INC_Y, &mut Outbox::new()).unwrap();
    let c = turret.calibration();
    assert_eq!((c.x_correct, c.y_correct), (59.0, -89.0));

    assert_eq!(
        turret.process_calib_command(0x03, &mut Outbox::new()),
        Err(Rejection::UnknownCommand(0x03))
    );
}

#[test]
pub fn firing_order_intake() {
    let (mut turret, _) = prearmed();
    turret.process_firing_order(b"13\0", &mut Outbox::new()).unwrap();
    assert_eq!(turret.engagement().firing_order().map(|o| o.targets().to_vec()), Some(vec![1, 3]));

    assert_eq!(
        turret.process_firing_order(b"01234567890", &mut Outbox::new()),
        Err(FiringOrderError::TooLong(11))
    );
    assert!(!turret.engagement().have_firing_order());

    let mut out = Outbox::new();
    assert_eq!(turret.process_firing_order(b"", &mut out), Err(FiringOrderError::Empty));
    assert!(out.texts().any(|t| t == "[alert]Empty Firing List"));

    assert_eq!(
        turret.process_firing_order(b"4x", &mut Outbox::new()),
        Err(FiringOrderError::NotADigit('x'))
    );
}

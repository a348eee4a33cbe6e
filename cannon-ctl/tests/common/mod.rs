#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cannon_ctl::{
    calibration::Calibration,
    detector::{Detection, Detections, Strategy},
    hardware::{Hardware, OutputPin, ServoChannel},
    network::protocol::Message,
    outbox::{Dispatch, Outbox},
    turret::{xor_passcode, Turret, PASSCODE},
};
use glam::Vec2;

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;

#[derive(Clone, Debug, PartialEq)]
pub enum Write {
    Pin(OutputPin, bool),
    Servo(ServoChannel, f32),
    Line(usize, String),
}

/// Hardware that remembers every write
#[derive(Clone, Default)]
pub struct Recorder(pub Arc<Mutex<Vec<Write>>>);

impl Recorder {
    pub fn writes(&self) -> Vec<Write> {
        self.0.lock().unwrap().clone()
    }
    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
    pub fn pin_writes(&self) -> Vec<(OutputPin, bool)> {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                Write::Pin(p, v) => Some((p, v)),
                _ => None,
            })
            .collect()
    }
    /// Last level written to a pin
    pub fn pin(&self, pin: OutputPin) -> Option<bool> {
        self.pin_writes().into_iter().rev().find(|(p, _)| *p == pin).map(|(_, v)| v)
    }
}

impl Hardware for Recorder {
    fn write_pin(&mut self, pin: OutputPin, high: bool) {
        self.0.lock().unwrap().push(Write::Pin(pin, high));
    }
    fn servo_angle(&mut self, channel: ServoChannel, degrees: f32) {
        self.0.lock().unwrap().push(Write::Servo(channel, degrees));
    }
    fn status_line(&mut self, line: usize, text: &str) {
        self.0.lock().unwrap().push(Write::Line(line, text.to_string()));
    }
}

/// Collects everything dispatched to it
#[derive(Default)]
pub struct Collect(pub Mutex<Vec<Message>>);

impl Collect {
    pub fn messages(&self) -> Vec<Message> {
        self.0.lock().unwrap().clone()
    }
    pub fn texts(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::Text(t) => Some(t),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Dispatch for Collect {
    async fn dispatch(&self, out: Outbox) {
        self.0.lock().unwrap().extend(out.messages);
    }
}

pub fn new_turret() -> (Turret, Recorder) {
    let recorder = Recorder::default();
    let turret = Turret::new(
        Box::new(recorder.clone()),
        Calibration::default(),
        Strategy::TemplateMatch,
    );
    (turret, recorder)
}

pub fn passcode() -> Vec<u8> {
    let mut code = xor_passcode(PASSCODE).to_vec();
    code.push(0);
    code
}

pub fn prearmed() -> (Turret, Recorder) {
    let (mut turret, recorder) = new_turret();
    turret.process_prearm(&passcode(), &mut Outbox::new()).unwrap();
    (turret, recorder)
}

pub fn armed_manual() -> (Turret, Recorder) {
    let (mut turret, recorder) = prearmed();
    turret.enter_armed_manual(&mut Outbox::new()).unwrap();
    (turret, recorder)
}

pub fn auto_engaging(order: &[u8]) -> (Turret, Recorder) {
    let (mut turret, recorder) = prearmed();
    turret.process_firing_order(order, &mut Outbox::new()).unwrap();
    turret.enter_auto_engage(&mut Outbox::new()).unwrap();
    (turret, recorder)
}

/// Where a target must appear for the turret to be on it already
pub fn aim_point() -> Vec2 {
    Vec2::new(WIDTH as f32 / 2.0, HEIGHT as f32 / 2.0) - Calibration::default().offset()
}

pub fn detection_at(id: u8, centre: Vec2) -> Detection {
    Detection::from_box(id, centre.x - 10.0, centre.y - 10.0, centre.x + 10.0, centre.y + 10.0)
}

pub fn frame(items: Vec<Detection>) -> Detections {
    Detections::new(items, WIDTH, HEIGHT)
}

use async_trait::async_trait;

use crate::{
    calibration::Calibration,
    detector::Strategy,
    network::protocol::Message,
    state::SystemState,
};

/// Tags carried at the front of a client diagnostic
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogTag {
    Title,
    Error,
    Alert,
}

impl LogTag {
    pub fn prefix(self) -> &'static str {
        match self {
            LogTag::Title => "[title]",
            LogTag::Error => "[error]",
            LogTag::Alert => "[alert]",
        }
    }
}

/// Work that must run outside the turret lock
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Swap the detector strategy under the detection lock
    SelectStrategy(Strategy),
    /// Persist the pixel offset correction
    SaveCalibration(Calibration),
}

/// Everything a handler wants sent or done once the turret lock is released.
#[derive(Default, Debug)]
pub struct Outbox {
    pub messages: Vec<Message>,
    pub effects: Vec<Effect>,
}

impl Outbox {
    pub fn new() -> Outbox {
        Self::default()
    }
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.effects.is_empty()
    }
    pub fn state(&mut self, state: SystemState) {
        self.messages.push(Message::State(state));
    }
    /// Acknowledges the active algorithm with a COMMANDS frame
    pub fn response(&mut self, code: u8) {
        self.messages.push(Message::Commands(code));
    }
    pub fn text(&mut self, tag: LogTag, text: impl AsRef<str>) {
        self.messages.push(Message::Text(format!("{}{}", tag.prefix(), text.as_ref())));
    }
    pub fn title(&mut self, text: impl AsRef<str>) {
        self.text(LogTag::Title, text);
    }
    pub fn alert(&mut self, text: impl AsRef<str>) {
        self.text(LogTag::Alert, text);
    }
    pub fn error(&mut self, text: impl AsRef<str>) {
        self.text(LogTag::Error, text);
    }
    pub fn effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Diagnostics queued so far, tag included
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().filter_map(|m| match m {
            Message::Text(t) => Some(t.as_str()),
            _ => None,
        })
    }
    /// State words queued so far
    pub fn states(&self) -> impl Iterator<Item = SystemState> + '_ {
        self.messages.iter().filter_map(|m| match m {
            Message::State(s) => Some(*s),
            _ => None,
        })
    }
    pub fn has_tag(&self, tag: LogTag) -> bool {
        self.texts().any(|t| t.starts_with(tag.prefix()))
    }
}

/// Delivers an outbox once the caller no longer holds the turret lock.
///
/// The session implements this over its socket. Delivery is best effort:
/// a failure is handled by the implementor, never reported back.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, out: Outbox);
}

use std::fmt;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::{
    sync::Mutex,
    time::{sleep, Duration, Instant},
};

use crate::{
    detector::{Detection, Detections},
    hardware::ServoChannel,
    outbox::{Dispatch, Outbox},
    state::BaseMode,
    turret::Turret,
};

/// Longest firing order the turret accepts
pub const MAX_FIRING_ORDER: usize = 10;
/// How long a target may stay out of sight before the engagement is abandoned
pub const SEEK_TIME_MAX: Duration = Duration::from_millis(5000);
/// Pixels of error per degree of correction
pub const SERVO_GAIN: f32 = 95.0;
/// Consecutive stable cycles needed before firing
pub const STABLE_CYCLES: u32 = 3;
/// Autonomous tracking must stay within these magnitudes
pub const SAFE_PAN: f32 = 60.0;
pub const SAFE_TILT: f32 = 45.0;

pub const LASER_LEAD: Duration = Duration::from_millis(1500);
pub const TRIGGER_HOLD: Duration = Duration::from_millis(200);
pub const LASER_TAIL: Duration = Duration::from_millis(1500);

const NO_POSITION: f32 = -99999.99;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngagementState {
    NotActive,
    Activate,
    NewTarget,
    LookingForTarget,
    Tracking,
    TrackingStable,
    EngagementInProgress,
    EngagementComplete,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiringOrderError {
    #[error("Empty Firing List")]
    Empty,
    #[error("firing order of {0} targets is longer than {MAX_FIRING_ORDER}")]
    TooLong(usize),
    #[error("{0:?} is not a target id")]
    NotADigit(char),
}

/// Ordered target ids, each 0-9
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FiringOrder(Vec<u8>);

impl FiringOrder {
    /// Parses the ASCII digit string sent by the client. A trailing NUL is ignored.
    pub fn parse(text: &[u8]) -> Result<FiringOrder, FiringOrderError> {
        let end = text.iter().position(|b| *b == 0).unwrap_or(text.len());
        let text = &text[..end];
        if text.len() > MAX_FIRING_ORDER {
            return Err(FiringOrderError::TooLong(text.len()));
        }
        if text.is_empty() {
            return Err(FiringOrderError::Empty);
        }
        text.iter()
            .map(|b| match b {
                b'0'..=b'9' => Ok(b - b'0'),
                _ => Err(FiringOrderError::NotADigit(*b as char)),
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(FiringOrder)
    }
    pub fn targets(&self) -> &[u8] {
        &self.0
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FiringOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in &self.0 {
            write!(f, "{}", t)?;
        }
        Ok(())
    }
}

/// What the detector reported around a shot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShotSnapshot {
    pub count: usize,
    pub matched: Option<u8>,
}

impl ShotSnapshot {
    pub fn observe(detections: &Detections, target: u8) -> ShotSnapshot {
        Self {
            count: detections.num_detected(),
            matched: detections.detected_item(target).map(|d| d.id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShotOutcome {
    Hit,
    Miss,
}

impl ShotOutcome {
    /// A hit is a target that vanished while the number of targets dropped
    pub fn judge(pre: ShotSnapshot, post: ShotSnapshot) -> ShotOutcome {
        if post.matched.is_none() && post.count < pre.count {
            ShotOutcome::Hit
        } else {
            ShotOutcome::Miss
        }
    }
}

/// What the detection activity must do after a cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Idle,
    /// Run [fire_sequence] with the turret lock released
    Fire,
}

/// The autonomous engagement context
#[derive(Debug)]
pub struct Engagement {
    pub(crate) state: EngagementState,
    order: Option<FiringOrder>,
    index: usize,
    target: u8,
    last_pan: f32,
    last_tilt: f32,
    stable_count: u32,
    seek_started: Option<Instant>,
    pre_shot: ShotSnapshot,
    last_outcome: Option<ShotOutcome>,
}

impl Default for Engagement {
    fn default() -> Self {
        Self {
            state: EngagementState::NotActive,
            order: None,
            index: 0,
            target: 0,
            last_pan: NO_POSITION,
            last_tilt: NO_POSITION,
            stable_count: 0,
            seek_started: None,
            pre_shot: ShotSnapshot::default(),
            last_outcome: None,
        }
    }
}

impl Engagement {
    pub fn state(&self) -> EngagementState {
        self.state
    }
    pub fn have_firing_order(&self) -> bool {
        self.order.is_some()
    }
    pub fn firing_order(&self) -> Option<&FiringOrder> {
        self.order.as_ref()
    }
    pub fn index(&self) -> usize {
        self.index
    }
    pub fn target(&self) -> u8 {
        self.target
    }
    pub fn stable_count(&self) -> u32 {
        self.stable_count
    }
    pub fn last_outcome(&self) -> Option<ShotOutcome> {
        self.last_outcome
    }
    pub fn is_in_progress(&self) -> bool {
        self.state == EngagementState::EngagementInProgress
    }

    pub(crate) fn set_firing_order(&mut self, order: FiringOrder) {
        self.order = Some(order);
    }
    pub(crate) fn clear_firing_order(&mut self) {
        self.order = None;
        self.index = 0;
        self.target = 0;
    }
    pub(crate) fn activate(&mut self) {
        self.state = EngagementState::Activate;
    }
    pub(crate) fn deactivate(&mut self) {
        self.state = EngagementState::NotActive;
    }
    /// Back to a fresh context, firing order included
    pub(crate) fn reset(&mut self) {
        *self = Engagement::default();
    }
    pub(crate) fn restart_seek_clock(&mut self, now: Instant) {
        self.seek_started = Some(now);
    }

    /// Loads the target at the current index, false once the order is exhausted
    fn select_target(&mut self, now: Instant) -> bool {
        let target = match self.order.as_ref().and_then(|o| o.targets().get(self.index)) {
            Some(t) => *t,
            None => return false,
        };
        self.target = target;
        self.stable_count = 0;
        self.last_pan = NO_POSITION;
        self.last_tilt = NO_POSITION;
        self.seek_started = Some(now);
        true
    }

    fn seek_elapsed(&self, now: Instant) -> Duration {
        self.seek_started
            .map_or(Duration::ZERO, |s| now.saturating_duration_since(s))
    }

    /// Counts a cycle as stable when both axes moved less than epsilon
    fn settle(&mut self, pan: f32, tilt: f32, epsilon: f32) {
        if (self.last_pan - pan).abs() < epsilon && (self.last_tilt - tilt).abs() < epsilon {
            self.stable_count += 1;
        } else {
            self.stable_count = 0;
        }
        self.last_pan = pan;
        self.last_tilt = tilt;
    }
}

impl Turret {
    /// Advances the engagement sequencer by one detection cycle.
    ///
    /// Returns [Step::Fire] once a target is tracked stably; the caller then drops the
    /// turret lock and runs [fire_sequence]. Nothing happens while paused.
    pub fn process_target_engagements(
        &mut self,
        detections: &Detections,
        now: Instant,
        out: &mut Outbox,
    ) -> Step {
        if self.paused {
            return Step::Idle;
        }
        match self.engagement.state {
            EngagementState::NotActive | EngagementState::TrackingStable => Step::Idle,
            EngagementState::EngagementInProgress => Step::Fire,
            EngagementState::EngagementComplete => {
                self.complete_engagement(detections, out);
                Step::Idle
            }
            EngagementState::Activate
            | EngagementState::NewTarget
            | EngagementState::LookingForTarget
            | EngagementState::Tracking => {
                let mut new_state = false;
                if self.engagement.state == EngagementState::Activate {
                    self.engagement.index = 0;
                    self.engagement.state = EngagementState::NewTarget;
                }
                if self.engagement.state == EngagementState::NewTarget {
                    if !self.engagement.select_target(now) {
                        warn!("Engagement activated without a target at index {}", self.engagement.index);
                        self.abort_engagement(out);
                        return Step::Idle;
                    }
                    debug!("New target {}", self.engagement.target);
                    new_state = true;
                }
                self.track(detections, now, new_state, out);
                Step::Idle
            }
        }
    }

    fn track(&mut self, detections: &Detections, now: Instant, mut new_state: bool, out: &mut Outbox) {
        let target = self.engagement.target;
        let mut next = EngagementState::LookingForTarget;
        let item: Option<&Detection> = detections.detected_item(target);

        if let Some(item) = item {
            let error = item.center + self.calibration.offset() - detections.center();
            let pan = self.pan - error.x / SERVO_GAIN;
            let tilt = self.tilt - error.y / SERVO_GAIN;

            if pan.abs() > SAFE_PAN || tilt.abs() > SAFE_TILT {
                warn!("Unsafe movement refused, pan = {:.2}, tilt = {:.2}", pan, tilt);
                out.error(format!(
                    "The next movement is not allowed, pan = {:.2}, tilt = {:.2}",
                    pan, tilt
                ));
                self.abort_engagement(out);
                return;
            }

            self.pan = self.gate.servo(ServoChannel::Pan, pan);
            self.tilt = self.gate.servo(ServoChannel::Tilt, tilt);
            self.engagement.settle(self.pan, self.tilt, self.strategy.epsilon());

            next = if self.engagement.stable_count >= STABLE_CYCLES {
                EngagementState::TrackingStable
            } else {
                EngagementState::Tracking
            };
        }

        if self.engagement.state != next {
            debug!("Engagement {:?} -> {:?}", self.engagement.state, next);
            new_state = true;
            self.engagement.state = next;
        }
        if new_state {
            match next {
                EngagementState::LookingForTarget => {
                    self.gate.armed(false);
                    self.broadcast_state(out);
                    out.title(format!("Looking for Target {}", target));
                }
                EngagementState::Tracking => {
                    self.gate.armed(true);
                    self.broadcast_state(out);
                    out.title(format!("Tracking Target Unstable {}", target));
                }
                EngagementState::TrackingStable => {
                    out.title(format!("Target Tracking Stable {}", target));
                    self.engagement.pre_shot = ShotSnapshot::observe(detections, target);
                    self.engagement.state = EngagementState::EngagementInProgress;
                    info!("Engaging target {} at pan {:.2} tilt {:.2}", target, self.pan, self.tilt);
                }
                _ => {}
            }
        }

        if self.engagement.state == EngagementState::LookingForTarget {
            let elapsed = self.engagement.seek_elapsed(now);
            if elapsed > SEEK_TIME_MAX {
                warn!("Target {} not found within {:?}", target, SEEK_TIME_MAX);
                out.error(format!(
                    "Seeking time is timeout diff = {} ms",
                    elapsed.as_millis()
                ));
                self.abort_engagement(out);
            }
        }
    }

    fn complete_engagement(&mut self, detections: &Detections, out: &mut Outbox) {
        let target = self.engagement.target;
        let pre = self.engagement.pre_shot;
        let post = ShotSnapshot::observe(detections, target);
        let outcome = ShotOutcome::judge(pre, post);
        let shot = pre.matched.unwrap_or(target);
        match outcome {
            ShotOutcome::Hit => out.title(format!("Hit the target & Target No : {}", shot)),
            ShotOutcome::Miss => out.title(format!("Miss the target & Target No : {}", shot)),
        }
        info!("Target {} {:?}, {} -> {} detections", shot, outcome, pre.count, post.count);
        self.engagement.last_outcome = Some(outcome);

        self.engagement.index += 1;
        let total = self.engagement.order.as_ref().map_or(0, FiringOrder::len);
        if self.engagement.index >= total {
            self.engagement.deactivate();
            self.gate.disarm_all();
            self.gate.set_base(BaseMode::Prearmed);
            self.broadcast_state(out);
            out.title("Target List Completed");
        } else {
            self.engagement.state = EngagementState::NewTarget;
        }
    }

    /// Safety fault: stop the sequencer, disarm and fall back to PREARMED
    pub(crate) fn abort_engagement(&mut self, out: &mut Outbox) {
        self.engagement.deactivate();
        self.gate.disarm_all();
        self.gate.set_base(BaseMode::Prearmed);
        self.broadcast_state(out);
    }
}

/// Applies one actuator step while the shot is still live
async fn shot_step(turret: &Mutex<Turret>, dispatch: &dyn Dispatch, apply: impl FnOnce(&mut Turret) + Send) -> bool {
    let mut out = Outbox::new();
    {
        let mut t = turret.lock().await;
        if !t.engagement.is_in_progress() {
            return false;
        }
        apply(&mut *t);
        t.broadcast_state(&mut out);
    }
    dispatch.dispatch(out).await;
    true
}

/// Laser, trigger and armed flag off after the engagement was taken away mid shot
async fn cease_fire(turret: &Mutex<Turret>, dispatch: &dyn Dispatch) {
    let mut out = Outbox::new();
    {
        let mut t = turret.lock().await;
        let before = t.state();
        t.gate.fire(false);
        t.gate.laser(false);
        t.gate.armed(false);
        if t.state() == before {
            t.gate.publish();
            return;
        }
        t.broadcast_state(&mut out);
    }
    dispatch.dispatch(out).await;
}

/// The fixed firing sequence: laser, 1.5 s, trigger, 0.2 s, release, 1.5 s, laser off.
///
/// Runs in-line on the detection activity and blocks it for the whole shot, so
/// tracking is frozen while the weapon is live. The turret lock is taken per toggle
/// and never held across a sleep, which leaves commands and aborts free to run.
pub async fn fire_sequence(turret: &Mutex<Turret>, dispatch: &dyn Dispatch) {
    info!("Engagement in progress");
    if !shot_step(turret, dispatch, |t| t.gate.laser(true)).await {
        return cease_fire(turret, dispatch).await;
    }
    sleep(LASER_LEAD).await;

    if !shot_step(turret, dispatch, |t| t.gate.fire(true)).await {
        return cease_fire(turret, dispatch).await;
    }
    sleep(TRIGGER_HOLD).await;

    turret.lock().await.gate.fire(false);
    sleep(LASER_TAIL).await;

    let mut out = Outbox::new();
    {
        let mut t = turret.lock().await;
        if !t.engagement.is_in_progress() {
            warn!("Engagement was aborted during the shot");
            drop(t);
            return cease_fire(turret, dispatch).await;
        }
        t.gate.laser(false);
        t.gate.armed(false);
        t.broadcast_state(&mut out);
        out.title(format!("Engaged Target {}", t.engagement.target));
        t.engagement.state = EngagementState::EngagementComplete;
    }
    dispatch.dispatch(out).await;
}

//! A simulated range for running the turret without its hardware.
//!
//! Targets sit at fixed pan/tilt angles. Servo writes move the boresight, the camera
//! renders whatever the boresight currently sees and a shot removes the target
//! closest to the point of impact.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use async_trait::async_trait;
use glam::Vec2;
use image::{Rgb, RgbImage};
use log::{debug, info, trace};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::time::{sleep, Duration};

use crate::{
    calibration::{DEFAULT_X_CORRECT, DEFAULT_Y_CORRECT},
    camera::{Camera, CameraError, Frame},
    detector::{DetectStrategy, Detection, Strategy},
    hardware::{Hardware, OutputPin, ServoChannel},
};

pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;
/// Image pixels per degree of servo travel
pub const PIXELS_PER_DEGREE: f32 = 20.0;
/// Half the side of a rendered target
pub const TARGET_HALF_SIZE: f32 = 18.0;
/// A shot this close to a target's angles knocks it down
pub const HIT_RADIUS: f32 = 1.5;
const FRAME_PERIOD: Duration = Duration::from_millis(33);

const PALETTE: [[u8; 3]; 10] = [
    [230, 25, 75],
    [60, 180, 75],
    [255, 225, 25],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
    [70, 240, 240],
    [240, 50, 230],
    [210, 245, 60],
    [250, 190, 190],
];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimTarget {
    pub id: u8,
    pub pan: f32,
    pub tilt: f32,
}

#[derive(Debug)]
struct SceneState {
    pan: f32,
    tilt: f32,
    laser: bool,
    trigger: bool,
    /// Pixel offset between where the camera looks and where the turret hits
    misalignment: Vec2,
    targets: Vec<SimTarget>,
    status: [String; 3],
    shots: usize,
}

/// Shared handle on the simulated range
#[derive(Clone, Debug)]
pub struct Scene {
    inner: Arc<RwLock<SceneState>>,
}

impl Scene {
    pub fn new(targets: Vec<SimTarget>) -> Scene {
        Self {
            inner: Arc::new(RwLock::new(SceneState {
                pan: 0.0,
                tilt: 0.0,
                laser: false,
                trigger: false,
                misalignment: Vec2::new(DEFAULT_X_CORRECT, DEFAULT_Y_CORRECT),
                targets,
                status: Default::default(),
                shots: 0,
            })),
        }
    }

    /// Up to ten targets scattered where the camera can see them from the rest position
    pub fn random(count: usize) -> Scene {
        let mut rng = StdRng::from_entropy();
        let targets = (0..count.min(10) as u8)
            .map(|id| SimTarget {
                id,
                pan: rng.gen_range(-10.0..=10.0),
                tilt: rng.gen_range(-6.0..=6.0),
            })
            .collect();
        Scene::new(targets)
    }

    fn read(&self) -> RwLockReadGuard<'_, SceneState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
    fn write(&self) -> RwLockWriteGuard<'_, SceneState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn targets(&self) -> Vec<SimTarget> {
        self.read().targets.clone()
    }
    pub fn boresight(&self) -> (f32, f32) {
        let s = self.read();
        (s.pan, s.tilt)
    }
    pub fn laser(&self) -> bool {
        self.read().laser
    }
    pub fn shots(&self) -> usize {
        self.read().shots
    }
    pub fn status_lines(&self) -> [String; 3] {
        self.read().status.clone()
    }

    /// Pixel centre of every target inside a frame of the given size
    pub fn project(&self, width: u32, height: u32) -> Vec<(SimTarget, Vec2)> {
        let s = self.read();
        let centre = Vec2::new(width as f32 / 2.0, height as f32 / 2.0);
        s.targets
            .iter()
            .map(|t| {
                let along = Vec2::new(s.pan - t.pan, s.tilt - t.tilt) * PIXELS_PER_DEGREE;
                (*t, centre - s.misalignment + along)
            })
            .filter(|(_, p)| p.x >= 0.0 && p.y >= 0.0 && p.x < width as f32 && p.y < height as f32)
            .collect()
    }

    pub fn render(&self, width: u32, height: u32) -> RgbImage {
        let mut frame = RgbImage::from_pixel(width, height, Rgb([24, 32, 24]));
        for (t, p) in self.project(width, height) {
            let colour = Rgb(PALETTE[t.id as usize % PALETTE.len()]);
            let (x0, y0) = ((p.x - TARGET_HALF_SIZE).max(0.0) as u32, (p.y - TARGET_HALF_SIZE).max(0.0) as u32);
            let x1 = ((p.x + TARGET_HALF_SIZE) as u32).min(width);
            let y1 = ((p.y + TARGET_HALF_SIZE) as u32).min(height);
            for y in y0..y1 {
                for x in x0..x1 {
                    frame.put_pixel(x, y, colour);
                }
            }
        }
        if self.laser() {
            let c = Vec2::new(width as f32 / 2.0, height as f32 / 2.0) - self.read().misalignment;
            if c.x >= 0.0 && c.y >= 0.0 && (c.x as u32) < width && (c.y as u32) < height {
                frame.put_pixel(c.x as u32, c.y as u32, Rgb([255, 0, 0]));
            }
        }
        frame
    }

    fn shoot(&self) {
        let mut s = self.write();
        s.shots += 1;
        let (pan, tilt) = (s.pan, s.tilt);
        let hit = s
            .targets
            .iter()
            .position(|t| Vec2::new(t.pan - pan, t.tilt - tilt).length() < HIT_RADIUS);
        match hit {
            Some(i) => {
                let t = s.targets.remove(i);
                info!("Simulated shot hit target {}", t.id);
            }
            None => info!("Simulated shot at {:.2} {:.2} missed", pan, tilt),
        }
    }
}

/// Servo, gpio and status display backed by the scene
pub struct SimHardware {
    scene: Scene,
}

impl SimHardware {
    pub fn new(scene: Scene) -> SimHardware {
        Self { scene }
    }
}

impl Hardware for SimHardware {
    fn write_pin(&mut self, pin: OutputPin, high: bool) {
        trace!("gpio {} -> {}", pin.gpio(), high);
        match pin {
            OutputPin::Laser => self.scene.write().laser = high,
            OutputPin::Fire => {
                let rising = {
                    let mut s = self.scene.write();
                    let rising = high && !s.trigger;
                    s.trigger = high;
                    rising
                };
                if rising {
                    self.scene.shoot();
                }
            }
        }
    }

    fn servo_angle(&mut self, channel: ServoChannel, degrees: f32) {
        trace!("servo channel {} -> {:.2}", channel.channel(), degrees);
        let mut s = self.scene.write();
        match channel {
            ServoChannel::Pan => s.pan = degrees,
            ServoChannel::Tilt => s.tilt = degrees,
        }
    }

    fn status_line(&mut self, line: usize, text: &str) {
        debug!("Status line {}: {}", line, text);
        if let Some(slot) = self.scene.write().status.get_mut(line) {
            *slot = text.to_string();
        }
    }

    fn release(&mut self) {
        info!("Simulated hardware released");
    }
}

/// Renders the scene at roughly thirty frames a second
pub struct SimCamera {
    scene: Scene,
    open: AtomicBool,
    width: u32,
    height: u32,
}

impl SimCamera {
    pub fn new(scene: Scene) -> SimCamera {
        Self {
            scene,
            open: AtomicBool::new(false),
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
        }
    }
}

#[async_trait]
impl Camera for SimCamera {
    async fn open(&self) -> Result<(), CameraError> {
        if self.open.swap(true, Ordering::SeqCst) {
            debug!("Camera is open already");
        }
        Ok(())
    }
    async fn frame(&self) -> Result<Frame, CameraError> {
        if !self.is_open() {
            return Err(CameraError::NotOpen);
        }
        sleep(FRAME_PERIOD).await;
        Ok(self.scene.render(self.width, self.height))
    }
    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Either detector backend, reading target positions straight from the scene
/// with a strategy dependent amount of jitter
pub struct SimStrategy {
    scene: Scene,
    jitter: f32,
    rng: StdRng,
}

impl SimStrategy {
    pub fn new(scene: Scene, strategy: Strategy) -> SimStrategy {
        let jitter = match strategy {
            Strategy::TemplateMatch => 0.5,
            Strategy::NeuralNet => 2.0,
        };
        Self {
            scene,
            jitter,
            rng: StdRng::from_entropy(),
        }
    }
}

impl DetectStrategy for SimStrategy {
    fn detect(&mut self, frame: &RgbImage) -> Vec<Detection> {
        self.scene
            .project(frame.width(), frame.height())
            .into_iter()
            .map(|(t, p)| {
                let j = Vec2::new(
                    self.rng.gen_range(-self.jitter..=self.jitter),
                    self.rng.gen_range(-self.jitter..=self.jitter),
                );
                let c = p + j;
                Detection::from_box(
                    t.id,
                    c.x - TARGET_HALF_SIZE,
                    c.y - TARGET_HALF_SIZE,
                    c.x + TARGET_HALF_SIZE,
                    c.y + TARGET_HALF_SIZE,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boresight_on_target_projects_to_aim_point() {
        let scene = Scene::new(vec![SimTarget { id: 2, pan: 5.0, tilt: -3.0 }]);
        let mut hw = SimHardware::new(scene.clone());
        hw.servo_angle(ServoChannel::Pan, 5.0);
        hw.servo_angle(ServoChannel::Tilt, -3.0);

        let seen = scene.project(FRAME_WIDTH, FRAME_HEIGHT);
        assert_eq!(seen.len(), 1);
        let expected = Vec2::new(320.0 - DEFAULT_X_CORRECT, 240.0 - DEFAULT_Y_CORRECT);
        assert!((seen[0].1 - expected).length() < 1e-3);
    }

    #[test]
    fn trigger_removes_target_at_boresight() {
        let scene = Scene::new(vec![
            SimTarget { id: 0, pan: 0.5, tilt: 0.0 },
            SimTarget { id: 1, pan: 8.0, tilt: 0.0 },
        ]);
        let mut hw = SimHardware::new(scene.clone());
        hw.write_pin(OutputPin::Fire, true);
        hw.write_pin(OutputPin::Fire, true);
        hw.write_pin(OutputPin::Fire, false);
        assert_eq!(scene.shots(), 1);
        assert_eq!(scene.targets().iter().map(|t| t.id).collect::<Vec<_>>(), vec![1]);
    }
}

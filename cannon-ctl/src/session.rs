use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::{
    io::AsyncRead,
    sync::Mutex,
    time::{sleep, Duration, Instant},
};

use crate::{
    calibration::CalibrationStore,
    camera::Camera,
    detector::Detector,
    engagement::{fire_sequence, Step},
    network::{
        link::Link,
        protocol::{read_frame, Message, ProtocolError},
    },
    outbox::{Dispatch, Effect, Outbox},
    state::{BaseMode, SystemState},
    turret::Turret,
    video::{compose, encode_jpeg, FrameRate},
};

const CAMERA_WAIT: Duration = Duration::from_millis(500);
const SAFE_IDLE: Duration = Duration::from_millis(1);
const DETECT_YIELD: Duration = Duration::from_micros(200);
const VIDEO_YIELD: Duration = Duration::from_millis(1);

/// The per-session activities
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activity {
    Network,
    Detection,
    Video,
}

/// The long lived parts of the turret that outlive any one session
#[derive(Clone)]
pub struct Rig {
    pub turret: Arc<Mutex<Turret>>,
    pub detector: Arc<Mutex<Detector>>,
    pub camera: Arc<dyn Camera>,
    pub store: CalibrationStore,
}

/// One connected operator client.
///
/// Three activities run per session: the network reader, the detection and
/// engagement loop and the video stream. The reader is the one that notices the
/// client going away, the other two watch the shared disconnected flag.
pub struct Session {
    rig: Rig,
    link: Link,
    disconnected: AtomicBool,
}

impl Session {
    pub fn new(rig: Rig, link: Link) -> Session {
        Self {
            rig,
            link,
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.link.peer_addr()
    }
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Marks the session over and drops the turret to SAFE, once
    pub async fn disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            info!("Session with {} disconnected, entering SAFE", self.peer_addr());
            self.rig.turret.lock().await.end_session();
        }
    }

    /// Runs the session to completion
    pub async fn run<R>(self: Arc<Self>, rd: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        info!("Session with {} starting", self.peer_addr());
        if let Err(e) = self.rig.camera.open().await {
            error!("Could not open camera: {}", e);
            self.disconnect().await;
            self.link.shutdown().await;
            return;
        }

        let mut out = Outbox::new();
        self.rig.turret.lock().await.begin_session(&mut out);
        self.dispatch(out).await;

        let (tx, rx) = flume::unbounded();
        let network = tokio::spawn(self.clone().network(rd, tx.clone()));
        let detection = tokio::spawn(self.clone().detection(tx.clone()));
        let video = tokio::spawn(self.clone().video(tx));

        if let Ok(first) = rx.recv_async().await {
            info!("{:?} activity ended the session with {}", first, self.peer_addr());
        }
        self.disconnect().await;
        self.link.shutdown().await;
        // The reader only wakes when the peer goes away
        network.abort();
        for (activity, handle) in [(Activity::Detection, detection), (Activity::Video, video), (Activity::Network, network)] {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("{:?} activity failed: {}", activity, e);
                }
            }
        }

        self.rig.camera.close().await;
        info!("Session with {} closed", self.peer_addr());
    }

    async fn network<R>(self: Arc<Self>, mut rd: R, exit: flume::Sender<Activity>)
    where
        R: AsyncRead + Unpin,
    {
        debug!("Network activity started");
        while !self.is_disconnected() {
            let msg = match read_frame(&mut rd).await.and_then(|f| f.message()) {
                Ok(msg) => msg,
                Err(ProtocolError::Closed) => {
                    info!("Client disconnected");
                    break;
                }
                Err(e) if e.is_fatal() => {
                    error!("Ending session with {}: {}", self.peer_addr(), e);
                    break;
                }
                Err(e) => {
                    warn!("Dropped frame: {}", e);
                    continue;
                }
            };
            self.handle(msg).await;
        }
        self.disconnect().await;
        let _ = exit.send_async(Activity::Network).await;
    }

    /// Runs one inbound request under the turret lock, then delivers what it produced
    async fn handle(&self, msg: Message) {
        let mut out = Outbox::new();
        let refused = {
            let mut turret = self.rig.turret.lock().await;
            match msg {
                Message::Commands(code) => turret.process_command(code, &mut out).err().map(|e| e.to_string()),
                Message::CalibCommands(code) => {
                    turret.process_calib_command(code, &mut out).err().map(|e| e.to_string())
                }
                Message::TargetSequence(order) => {
                    turret.process_firing_order(&order, &mut out).err().map(|e| e.to_string())
                }
                Message::Prearm(code) => turret.process_prearm(&code, &mut out).err().map(|e| e.to_string()),
                Message::StateChangeRequest(state) => turret
                    .process_state_change_request(state, &mut out)
                    .err()
                    .map(|e| e.to_string()),
                other => Some(format!("{:?} is not an inbound message", other.kind())),
            }
        };
        if let Some(reason) = refused {
            debug!("Request refused: {}", reason);
        }
        self.dispatch(out).await;
    }

    async fn detection(self: Arc<Self>, exit: flume::Sender<Activity>) {
        debug!("Detection activity started");
        while !self.is_disconnected() {
            if !self.rig.camera.is_open() {
                sleep(CAMERA_WAIT).await;
                continue;
            }
            let (state, in_progress) = {
                let t = self.rig.turret.lock().await;
                (t.state(), t.engagement().is_in_progress())
            };
            if state == SystemState::UNKNOWN || state.is(BaseMode::Safe) {
                sleep(SAFE_IDLE).await;
                continue;
            }

            let frame = match self.rig.camera.frame().await {
                Ok(f) => f,
                Err(e) => {
                    warn!("Blank frame grabbed: {}", e);
                    continue;
                }
            };
            let detections = {
                let mut detector = self.rig.detector.lock().await;
                if !in_progress {
                    detector.detect(&frame);
                }
                detector.snapshot()
            };

            let mut out = Outbox::new();
            let step = self
                .rig
                .turret
                .lock()
                .await
                .process_target_engagements(&detections, Instant::now(), &mut out);
            self.dispatch(out).await;
            if step == Step::Fire {
                fire_sequence(&self.rig.turret, &*self).await;
            }
            sleep(DETECT_YIELD).await;
        }
        let _ = exit.send_async(Activity::Detection).await;
    }

    async fn video(self: Arc<Self>, exit: flume::Sender<Activity>) {
        debug!("Video activity started");
        let mut rate = FrameRate::default();
        while !self.is_disconnected() {
            let begin = Instant::now();
            if !self.rig.camera.is_open() {
                sleep(CAMERA_WAIT).await;
                continue;
            }
            let mut frame = match self.rig.camera.frame().await {
                Ok(f) => f,
                Err(e) => {
                    warn!("Blank frame grabbed: {}", e);
                    sleep(VIDEO_YIELD).await;
                    continue;
                }
            };
            self.rig.detector.lock().await.draw(&mut frame);
            let (safe, correction) = {
                let t = self.rig.turret.lock().await;
                (t.state().is(BaseMode::Safe), t.calibration().offset())
            };
            let jpeg = match encode_jpeg(compose(&frame, safe, correction, rate.average())).await {
                Ok(j) => j,
                Err(e) => {
                    error!("Could not encode frame: {}", e);
                    continue;
                }
            };
            if self.is_disconnected() {
                break;
            }
            if let Err(e) = self.link.send(&Message::Image(jpeg)).await {
                warn!("Video stream to {} failed: {}", self.peer_addr(), e);
                break;
            }

            sleep(VIDEO_YIELD).await;
            rate.record(begin.elapsed());
            if rate.frames() % 100 == 0 {
                debug!("Streaming at {:.2} fps", rate.average());
            }
        }
        let _ = exit.send_async(Activity::Video).await;
    }
}

#[async_trait]
impl Dispatch for Session {
    async fn dispatch(&self, out: Outbox) {
        for effect in out.effects {
            match effect {
                Effect::SelectStrategy(strategy) => self.rig.detector.lock().await.set_strategy(strategy),
                Effect::SaveCalibration(calibration) => {
                    let store = self.rig.store.clone();
                    match tokio::task::spawn_blocking(move || store.save(calibration)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            error!("Could not save calibration to {}: {}", self.rig.store.path().display(), e)
                        }
                        Err(e) => error!("Calibration writer failed: {}", e),
                    }
                }
            }
        }
        for msg in out.messages {
            if self.is_disconnected() {
                return;
            }
            if let Err(e) = self.link.send(&msg).await {
                warn!("Connection lost while sending {:?}: {}", msg.kind(), e);
                self.disconnect().await;
                return;
            }
        }
    }
}

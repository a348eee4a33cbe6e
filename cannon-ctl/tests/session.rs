use std::{
    io,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use cannon_ctl::{
    calibration::{Calibration, CalibrationStore},
    detector::{Detector, Strategy, USE_OPENCV},
    network::{
        link::Link,
        protocol::{read_frame_limited, write_message, FrameHeader, Message, MessageKind, ProtocolError, MAX_PAYLOAD},
    },
    server::Server,
    session::{Rig, Session},
    sim::{Scene, SimCamera, SimHardware, SimStrategy, SimTarget},
    state::{BaseMode, SystemState},
    turret::{xor_passcode, Turret, PASSCODE},
};
use tokio::{
    io::{duplex, split, AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{oneshot, Mutex},
    task::JoinHandle,
    time::{sleep, timeout, Duration},
};

const WAIT: Duration = Duration::from_secs(20);

struct Range {
    scene: Scene,
    rig: Rig,
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    serving: JoinHandle<()>,
}

fn rig(scene: &Scene) -> Rig {
    let store = CalibrationStore::new(std::env::temp_dir().join(format!("cannon-session-{}.ini", std::process::id())));
    let turret = Turret::new(
        Box::new(SimHardware::new(scene.clone())),
        Calibration::default(),
        Strategy::TemplateMatch,
    );
    let detector = Detector::new(
        Strategy::TemplateMatch,
        Box::new(SimStrategy::new(scene.clone(), Strategy::TemplateMatch)),
        Box::new(SimStrategy::new(scene.clone(), Strategy::NeuralNet)),
    );
    Rig {
        turret: Arc::new(Mutex::new(turret)),
        detector: Arc::new(Mutex::new(detector)),
        camera: Arc::new(SimCamera::new(scene.clone())),
        store,
    }
}

async fn open_range(targets: Vec<SimTarget>) -> Range {
    let scene = Scene::new(targets);
    let rig = rig(&scene);
    let server = Server::bind("127.0.0.1:0".parse().unwrap(), rig.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve(async {
        let _ = stopped.await;
    }));
    Range {
        scene,
        rig,
        addr,
        stop,
        serving,
    }
}

/// Next message that is not a video frame
async fn next(rd: &mut OwnedReadHalf) -> Message {
    loop {
        let frame = timeout(WAIT, read_frame_limited(rd, usize::MAX))
            .await
            .expect("turret went quiet")
            .expect("turret closed the connection");
        match frame.message().unwrap() {
            Message::Image(_) => continue,
            m => return m,
        }
    }
}

async fn next_state(rd: &mut OwnedReadHalf) -> SystemState {
    loop {
        if let Message::State(s) = next(rd).await {
            return s;
        }
    }
}

async fn connect(addr: SocketAddr) -> (OwnedReadHalf, OwnedWriteHalf) {
    let (mut rd, wr) = TcpStream::connect(addr).await.unwrap().into_split();
    assert_eq!(next(&mut rd).await, Message::State(SystemState::new(BaseMode::Safe, 0)));
    assert_eq!(next(&mut rd).await, Message::Commands(USE_OPENCV));
    (rd, wr)
}

async fn prearm(rd: &mut OwnedReadHalf, wr: &mut OwnedWriteHalf) {
    let mut code = xor_passcode(PASSCODE).to_vec();
    code.push(0);
    write_message(wr, &Message::Prearm(code)).await.unwrap();
    assert_eq!(next_state(rd).await, SystemState::new(BaseMode::Prearmed, 0));
}

/// Reads past whatever is still in flight until the turret hangs up
async fn wait_for_close<R: AsyncRead + Unpin>(rd: &mut R) -> Vec<Message> {
    timeout(WAIT, async {
        let mut seen = Vec::new();
        loop {
            match read_frame_limited(rd, usize::MAX).await {
                Ok(frame) => seen.push(frame.message().unwrap()),
                Err(ProtocolError::Closed) => return seen,
                Err(e) => panic!("connection failed instead of closing: {}", e),
            }
        }
    })
    .await
    .expect("turret kept the connection open")
}

async fn wait_for_safe(rig: &Rig) {
    timeout(WAIT, async {
        while !rig.turret.lock().await.state().is(BaseMode::Safe) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("turret never returned to SAFE");
}

#[tokio::test(flavor = "multi_thread")]
async fn one_client_at_a_time() {
    let range = open_range(vec![]).await;
    let (mut rd, mut wr) = connect(range.addr).await;
    prearm(&mut rd, &mut wr).await;

    let (mut rd2, _wr2) = TcpStream::connect(range.addr).await.unwrap().into_split();
    let refused = timeout(WAIT, read_frame_limited(&mut rd2, usize::MAX)).await.unwrap();
    assert!(matches!(refused, Err(ProtocolError::Closed)));

    // The first client is untouched
    assert!(range.rig.turret.lock().await.state().is(BaseMode::Prearmed));

    drop(rd);
    drop(wr);
    wait_for_safe(&range.rig).await;

    // The next client is served once the old session has wound down
    let mut served = false;
    for _ in 0..100 {
        let (mut rd, _wr) = TcpStream::connect(range.addr).await.unwrap().into_split();
        if let Ok(Ok(frame)) = timeout(WAIT, read_frame_limited(&mut rd, usize::MAX)).await {
            assert_eq!(frame.message().unwrap(), Message::State(SystemState::new(BaseMode::Safe, 0)));
            served = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(served);

    range.stop.send(()).unwrap();
    range.serving.await.unwrap();
    assert!(!range.rig.camera.is_open());
    assert!(!range.scene.laser());
}

#[tokio::test(flavor = "multi_thread")]
async fn autonomous_engagement_hits() {
    let range = open_range(vec![SimTarget {
        id: 0,
        pan: 3.0,
        tilt: -2.0,
    }])
    .await;
    let (mut rd, mut wr) = connect(range.addr).await;
    prearm(&mut rd, &mut wr).await;

    write_message(&mut wr, &Message::TargetSequence(b"0".to_vec())).await.unwrap();
    let auto = SystemState::new(BaseMode::EngageAuto, 0);
    write_message(&mut wr, &Message::StateChangeRequest(auto)).await.unwrap();
    assert_eq!(next_state(&mut rd).await, auto);

    let mut hit = false;
    loop {
        match next(&mut rd).await {
            Message::Text(t) if t.starts_with("[title]Hit the target") => hit = true,
            Message::Text(t) if t.starts_with("[error]") => panic!("engagement aborted: {}", t),
            Message::State(s) if s.is(BaseMode::Prearmed) => break,
            _ => {}
        }
    }
    assert!(hit);
    assert!(range.scene.targets().is_empty());
    assert_eq!(range.scene.shots(), 1);

    range.stop.send(()).unwrap();
    let goodbye = wait_for_close(&mut rd).await;
    assert!(goodbye.contains(&Message::Text("[title]Robot system control stopped".to_string())));
    range.serving.await.unwrap();
    assert!(range.rig.turret.lock().await.state().is(BaseMode::Safe));
    assert!(!range.scene.laser());
    assert_eq!(range.scene.status_lines()[0], "SAFE");
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_frame_ends_the_session() {
    let range = open_range(vec![]).await;
    let (mut rd, mut wr) = connect(range.addr).await;
    prearm(&mut rd, &mut wr).await;

    let header = FrameHeader {
        len: MAX_PAYLOAD as u32 + 1,
        kind: 4,
    };
    wr.write_all(&header.encode().unwrap()).await.unwrap();

    wait_for_safe(&range.rig).await;
    wait_for_close(&mut rd).await;
    assert!(!range.scene.laser());

    range.stop.send(()).unwrap();
    range.serving.await.unwrap();
}

/// Passes everything through except video frames, which hit a dead socket
struct VideoFails<W>(W);

impl<W: AsyncWrite + Unpin> AsyncWrite for VideoFails<W> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let image = MessageKind::Image.code().to_be_bytes();
        if buf.len() >= 8 && buf[4..8] == image {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        Pin::new(&mut self.0).poll_write(cx, buf)
    }
    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_video_write_ends_the_session() {
    let scene = Scene::new(vec![]);
    let rig = rig(&scene);
    let (mut client, turret_end) = duplex(64 * 1024);
    let (rd, wr) = split(turret_end);
    let session = Arc::new(Session::new(
        rig.clone(),
        Link::new(VideoFails(wr), "127.0.0.1:5000".parse().unwrap()),
    ));

    // The client never hangs up, so only the video stream can end this
    timeout(WAIT, session.clone().run(rd))
        .await
        .expect("session outlived its video stream");
    assert!(session.is_disconnected());
    assert!(rig.turret.lock().await.state().is(BaseMode::Safe));
    assert!(!rig.camera.is_open());

    let seen = wait_for_close(&mut client).await;
    assert_eq!(
        seen,
        vec![Message::State(SystemState::new(BaseMode::Safe, 0)), Message::Commands(USE_OPENCV)]
    );
}

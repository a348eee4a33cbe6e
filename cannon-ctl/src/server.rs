use std::{future::Future, io, net::SocketAddr, sync::Arc};

use log::{error, info, warn};
use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

use crate::{
    calibration::CalibrationError,
    network::link::Link,
    outbox::{Dispatch, Outbox},
    session::{Rig, Session},
};

/// Failures that keep the turret from coming up at all
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("could not listen on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("could not load calibration: {0}")]
    Calibration(#[from] CalibrationError),
}

/// Accepts operator clients, one session at a time
pub struct Server {
    listener: TcpListener,
    rig: Rig,
    current: Option<(Arc<Session>, JoinHandle<()>)>,
}

impl Server {
    pub async fn bind(addr: SocketAddr, rig: Rig) -> Result<Server, LaunchError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| LaunchError::Bind { addr, source })?;
        info!("Listening for connections on {}", addr);
        Ok(Self {
            listener,
            rig,
            current: None,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn session_active(&self) -> bool {
        matches!(&self.current, Some((_, handle)) if !handle.is_finished())
    }

    /// Serves clients until `shutdown` resolves, then disarms and releases the hardware
    pub async fn serve(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.admit(stream, peer),
                        Err(e) => warn!("Accept failed: {}", e),
                    }
                }
            }
        }

        if let Some((session, handle)) = self.current.take() {
            if !session.is_disconnected() {
                let mut out = Outbox::new();
                out.title("Robot system control stopped");
                session.dispatch(out).await;
            }
            session.disconnect().await;
            if let Err(e) = handle.await {
                error!("Session task failed: {}", e);
            }
        }
        self.rig.turret.lock().await.release();
        self.rig.camera.close().await;
        info!("Turret released");
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.session_active() {
            warn!("Refusing {} while a session is active", peer);
            return;
        }
        info!("Accepted connection from {}", peer);
        let (rd, wr) = stream.into_split();
        let session = Arc::new(Session::new(self.rig.clone(), Link::new(wr, peer)));
        let handle = tokio::spawn(session.clone().run(rd));
        self.current = Some((session, handle));
    }
}

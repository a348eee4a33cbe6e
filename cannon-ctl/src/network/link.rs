use std::net::SocketAddr;

use log::trace;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

use super::protocol::{Message, ProtocolError};

/// The outbound half of a session socket.
///
/// Diagnostics, state broadcasts, command responses and video frames are written
/// from several tasks at once, the write lock keeps each frame contiguous on the wire.
pub struct Link {
    wr: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    peer: SocketAddr,
}

impl Link {
    pub fn new(wr: impl AsyncWrite + Send + Unpin + 'static, peer: SocketAddr) -> Link {
        Self {
            wr: Mutex::new(Box::new(wr)),
            peer,
        }
    }

    pub async fn send(&self, msg: &Message) -> Result<(), ProtocolError> {
        let frame = msg.to_frame()?;
        self.send_frame(&frame).await?;
        if !matches!(msg, Message::Image(_)) {
            trace!("Sent {:?} to {}", msg, self.peer);
        }
        Ok(())
    }

    pub async fn send_frame(&self, frame: &[u8]) -> Result<(), ProtocolError> {
        let mut wr = self.wr.lock().await;
        wr.write_all(frame).await?;
        wr.flush().await?;
        Ok(())
    }

    /// Closes the write direction so the peer sees end of stream
    pub async fn shutdown(&self) {
        let _ = self.wr.lock().await.shutdown().await;
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

use std::io::{self, ErrorKind};

use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::state::SystemState;

/// Size of the turret's receive buffer, header included
pub const RECV_BUFFER: usize = 512;
pub const HEADER_LEN: usize = 8;
/// The largest payload an inbound frame may declare
pub const MAX_PAYLOAD: usize = RECV_BUFFER - HEADER_LEN;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("peer closed the connection")]
    Closed,
    #[error("socket error: {0}")]
    Io(io::Error),
    #[error("frame of {0} payload bytes overflows the receive buffer")]
    Oversized(usize),
    #[error("unknown message kind {0}")]
    UnknownKind(u32),
    #[error("malformed {kind:?} payload of {len} bytes")]
    Malformed { kind: MessageKind, len: usize },
    #[error("header codec: {0}")]
    Header(#[from] bincode::Error),
}

impl From<io::Error> for ProtocolError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
                ProtocolError::Closed
            }
            _ => ProtocolError::Io(e),
        }
    }
}

impl ProtocolError {
    /// Whether the session can carry on after this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::UnknownKind(_) | ProtocolError::Malformed { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Commands,
    TargetSequence,
    Image,
    Text,
    Prearm,
    State,
    StateChangeRequest,
    CalibCommands,
}

impl MessageKind {
    pub fn code(self) -> u32 {
        match self {
            MessageKind::Commands => 1,
            MessageKind::TargetSequence => 2,
            MessageKind::Image => 3,
            MessageKind::Text => 4,
            MessageKind::Prearm => 5,
            MessageKind::State => 6,
            MessageKind::StateChangeRequest => 7,
            MessageKind::CalibCommands => 8,
        }
    }
}

impl TryFrom<u32> for MessageKind {
    type Error = ProtocolError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => MessageKind::Commands,
            2 => MessageKind::TargetSequence,
            3 => MessageKind::Image,
            4 => MessageKind::Text,
            5 => MessageKind::Prearm,
            6 => MessageKind::State,
            7 => MessageKind::StateChangeRequest,
            8 => MessageKind::CalibCommands,
            _ => return Err(ProtocolError::UnknownKind(code)),
        })
    }
}

/// The fixed eight byte frame header: payload length then message kind,
/// both big-endian u32.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub len: u32,
    pub kind: u32,
}

fn header_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

impl FrameHeader {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(header_options().serialize(self)?)
    }
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<FrameHeader, ProtocolError> {
        Ok(header_options().deserialize(bytes)?)
    }
}

/// Every message that travels between the turret and its operator client
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// A command byte inbound, the active algorithm byte outbound
    Commands(u8),
    CalibCommands(u8),
    /// ASCII digits naming targets in firing order
    TargetSequence(Vec<u8>),
    /// XOR obfuscated passcode
    Prearm(Vec<u8>),
    StateChangeRequest(SystemState),
    /// Tagged diagnostic text
    Text(String),
    State(SystemState),
    /// A JPEG encoded video frame
    Image(Vec<u8>),
}

fn strip_nul(payload: &[u8]) -> &[u8] {
    let end = payload.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    &payload[..end]
}

fn word(kind: MessageKind, payload: &[u8]) -> Result<u32, ProtocolError> {
    let bytes: [u8; 4] = payload.try_into().map_err(|_| ProtocolError::Malformed {
        kind,
        len: payload.len(),
    })?;
    Ok(u32::from_be_bytes(bytes))
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Commands(_) => MessageKind::Commands,
            Message::CalibCommands(_) => MessageKind::CalibCommands,
            Message::TargetSequence(_) => MessageKind::TargetSequence,
            Message::Prearm(_) => MessageKind::Prearm,
            Message::StateChangeRequest(_) => MessageKind::StateChangeRequest,
            Message::Text(_) => MessageKind::Text,
            Message::State(_) => MessageKind::State,
            Message::Image(_) => MessageKind::Image,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Message::Commands(b) | Message::CalibCommands(b) => vec![*b],
            Message::TargetSequence(s) => {
                let mut p = s.clone();
                p.push(0);
                p
            }
            Message::Prearm(p) | Message::Image(p) => p.clone(),
            Message::StateChangeRequest(s) | Message::State(s) => s.raw().to_be_bytes().to_vec(),
            Message::Text(t) => {
                let mut p = t.as_bytes().to_vec();
                p.push(0);
                p
            }
        }
    }

    /// Header and payload, ready for the socket
    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = self.payload();
        let header = FrameHeader {
            len: payload.len() as u32,
            kind: self.kind().code(),
        };
        let mut frame = header.encode()?;
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    pub fn decode(kind: u32, payload: &[u8]) -> Result<Message, ProtocolError> {
        let kind = MessageKind::try_from(kind)?;
        let malformed = || ProtocolError::Malformed {
            kind,
            len: payload.len(),
        };
        Ok(match kind {
            MessageKind::Commands => Message::Commands(*payload.first().ok_or_else(malformed)?),
            MessageKind::CalibCommands => {
                Message::CalibCommands(*payload.first().ok_or_else(malformed)?)
            }
            MessageKind::TargetSequence => Message::TargetSequence(strip_nul(payload).to_vec()),
            MessageKind::Prearm => Message::Prearm(payload.to_vec()),
            MessageKind::StateChangeRequest => {
                Message::StateChangeRequest(SystemState::from_raw(word(kind, payload)?))
            }
            MessageKind::State => Message::State(SystemState::from_raw(word(kind, payload)?)),
            MessageKind::Text => {
                Message::Text(String::from_utf8_lossy(strip_nul(payload)).into_owned())
            }
            MessageKind::Image => Message::Image(payload.to_vec()),
        })
    }
}

/// A raw inbound frame, kind not yet validated
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn message(&self) -> Result<Message, ProtocolError> {
        Message::decode(self.header.kind, &self.payload)
    }
}

/// Reads exactly one frame into the turret's receive buffer. Errors from here end the session.
pub async fn read_frame<R: AsyncRead + Unpin>(rd: &mut R) -> Result<Frame, ProtocolError> {
    read_frame_limited(rd, MAX_PAYLOAD).await
}

/// Reads one frame whose payload may be at most `max_payload` bytes.
/// Clients receiving video use this with a larger limit.
pub async fn read_frame_limited<R: AsyncRead + Unpin>(
    rd: &mut R,
    max_payload: usize,
) -> Result<Frame, ProtocolError> {
    let mut head = [0u8; HEADER_LEN];
    rd.read_exact(&mut head).await?;
    let header = FrameHeader::decode(&head)?;

    let len = header.len as usize;
    if len > max_payload {
        return Err(ProtocolError::Oversized(len));
    }
    let mut payload = vec![0u8; len];
    rd.read_exact(&mut payload).await?;
    Ok(Frame { header, payload })
}

pub async fn write_message<W: AsyncWrite + Unpin>(
    wr: &mut W,
    msg: &Message,
) -> Result<(), ProtocolError> {
    let frame = msg.to_frame()?;
    wr.write_all(&frame).await?;
    wr.flush().await?;
    Ok(())
}

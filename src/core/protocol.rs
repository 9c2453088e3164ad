//! Fixed-layout wire messages.
//!
//! Every frame is `[tag: u8][chunk index: u32 BE][payload]`, with the payload
//! zero padded to the configured payload size.

use crate::core::peer::ChunkId;
use crate::utils::{Result, SwarmError};

pub const DEFAULT_PAYLOAD_SIZE: usize = 1024;
pub const HEADER_LEN: usize = 5;
pub const VALID_MARKER: &[u8] = b"valid";

/// The leading tag byte of a frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SenderType {
    IntegrityResult = 0,
    DataDelivery = 1,
    IntegrityCheck = 2,
    ChunkRequest = 3,
}

impl TryFrom<u8> for SenderType {
    type Error = SwarmError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(SenderType::IntegrityResult),
            1 => Ok(SenderType::DataDelivery),
            2 => Ok(SenderType::IntegrityCheck),
            3 => Ok(SenderType::ChunkRequest),
            other => Err(SwarmError::UnknownMessageTag(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid,
}

impl Verdict {
    /// Anything other than the `valid` marker (ignoring zero padding) is a failure.
    pub fn from_payload(payload: &[u8]) -> Self {
        let end = payload
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |pos| pos + 1);
        if &payload[..end] == VALID_MARKER {
            Verdict::Valid
        } else {
            Verdict::Invalid
        }
    }

    pub fn is_valid(self) -> bool {
        self == Verdict::Valid
    }
}

impl From<bool> for Verdict {
    fn from(valid: bool) -> Self {
        if valid { Verdict::Valid } else { Verdict::Invalid }
    }
}

/// Which of a peer's two ports a frame is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Lightweight request signaling.
    Signal,
    /// Bulk data and control delivery.
    Bulk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    IntegrityResult { chunk: ChunkId, verdict: Verdict },
    DataDelivery { chunk: ChunkId, payload: Vec<u8> },
    IntegrityCheck { chunk: ChunkId, payload: Vec<u8> },
    ChunkRequest { chunk: ChunkId },
}

impl Message {
    pub fn sender_type(&self) -> SenderType {
        match self {
            Message::IntegrityResult { .. } => SenderType::IntegrityResult,
            Message::DataDelivery { .. } => SenderType::DataDelivery,
            Message::IntegrityCheck { .. } => SenderType::IntegrityCheck,
            Message::ChunkRequest { .. } => SenderType::ChunkRequest,
        }
    }

    pub fn chunk(&self) -> ChunkId {
        match self {
            Message::IntegrityResult { chunk, .. }
            | Message::DataDelivery { chunk, .. }
            | Message::IntegrityCheck { chunk, .. }
            | Message::ChunkRequest { chunk } => *chunk,
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Message::ChunkRequest { .. } => Channel::Signal,
            _ => Channel::Bulk,
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Message::IntegrityResult {
                verdict: Verdict::Valid,
                ..
            } => VALID_MARKER,
            Message::IntegrityResult { .. } | Message::ChunkRequest { .. } => &[],
            Message::DataDelivery { payload, .. } | Message::IntegrityCheck { payload, .. } => {
                payload.as_slice()
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    payload_size: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_PAYLOAD_SIZE)
    }
}

impl MessageCodec {
    pub fn new(payload_size: usize) -> Self {
        Self { payload_size }
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload_size
    }

    pub fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        let payload = message.payload();
        if payload.len() > self.payload_size {
            return Err(SwarmError::MessageTooLarge(payload.len()));
        }

        let mut frame = Vec::with_capacity(self.frame_len());
        frame.push(message.sender_type() as u8);
        frame.extend_from_slice(&message.chunk().to_be_bytes());
        frame.extend_from_slice(payload);
        frame.resize(self.frame_len(), 0);
        Ok(frame)
    }

    /// Decode a frame. Bytes beyond the fixed frame length are ignored.
    pub fn decode(&self, frame: &[u8]) -> Result<Message> {
        if frame.len() < self.frame_len() {
            return Err(SwarmError::MalformedMessage {
                expected: self.frame_len(),
                actual: frame.len(),
            });
        }

        let sender_type = SenderType::try_from(frame[0])?;
        let chunk = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let payload = &frame[HEADER_LEN..self.frame_len()];

        Ok(match sender_type {
            SenderType::IntegrityResult => Message::IntegrityResult {
                chunk,
                verdict: Verdict::from_payload(payload),
            },
            SenderType::DataDelivery => Message::DataDelivery {
                chunk,
                payload: payload.to_vec(),
            },
            SenderType::IntegrityCheck => Message::IntegrityCheck {
                chunk,
                payload: payload.to_vec(),
            },
            SenderType::ChunkRequest => Message::ChunkRequest { chunk },
        })
    }
}

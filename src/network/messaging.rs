use log::{debug, warn};

use crate::core::peer::{ChunkId, PeerId};
use crate::core::protocol::{Message, MessageCodec, SenderType, Verdict};
use crate::transfer::ChunkOutcome;
use crate::utils::{Result, SwarmError};

/// What became of one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled(ChunkOutcome),
    /// A well-formed message the protocol core does not act on.
    Unsupported { kind: SenderType, chunk: ChunkId },
    UnknownTag(u8),
}

/// Receives decoded messages on behalf of one peer.
pub trait MessageProcessor {
    fn on_integrity_result(
        &mut self,
        peer: PeerId,
        chunk: ChunkId,
        verdict: Verdict,
    ) -> Result<ChunkOutcome>;

    fn on_data_delivery(&mut self, peer: PeerId, chunk: ChunkId) -> Result<ChunkOutcome>;

    fn on_unknown_tag(&mut self, peer: PeerId, tag: u8);

    fn on_unsupported(&mut self, _peer: PeerId, _kind: SenderType, _chunk: ChunkId) {}
}

/// Decodes frames and routes them by sender type.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageDispatcher {
    codec: MessageCodec,
}

impl MessageDispatcher {
    pub fn new(codec: MessageCodec) -> Self {
        Self { codec }
    }

    pub fn dispatch<P>(&self, processor: &mut P, peer: PeerId, frame: &[u8]) -> Result<DispatchOutcome>
    where
        P: MessageProcessor + ?Sized,
    {
        let message = match self.codec.decode(frame) {
            Ok(message) => message,
            Err(SwarmError::UnknownMessageTag(tag)) => {
                processor.on_unknown_tag(peer, tag);
                return Ok(DispatchOutcome::UnknownTag(tag));
            }
            Err(e) => {
                warn!("Peer {} dropped a frame: {}", peer, e);
                return Err(e);
            }
        };

        let kind = message.sender_type();
        debug!("Peer {} received {:?} for chunk {}", peer, kind, message.chunk());

        match message {
            Message::IntegrityResult { chunk, verdict } => processor
                .on_integrity_result(peer, chunk, verdict)
                .map(DispatchOutcome::Handled),
            Message::DataDelivery { chunk, .. } => processor
                .on_data_delivery(peer, chunk)
                .map(DispatchOutcome::Handled),
            Message::IntegrityCheck { chunk, .. } | Message::ChunkRequest { chunk } => {
                processor.on_unsupported(peer, kind, chunk);
                Ok(DispatchOutcome::Unsupported { kind, chunk })
            }
        }
    }
}

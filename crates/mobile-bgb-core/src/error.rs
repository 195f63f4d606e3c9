use std::io;

use thiserror::Error;

use crate::packet::LinkPacket;

/// Fatal link failures. Every variant ends the emulator session.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("link transport failed: {0}")]
    Transport(#[from] io::Error),

    #[error("invalid handshake from emulator: {received}")]
    HandshakeMismatch { received: LinkPacket },

    #[error("unexpected packet during {stage}: {packet}")]
    UnexpectedPacket {
        stage: &'static str,
        packet: LinkPacket,
    },

    #[error("emulator requested disconnect: {0}")]
    PeerDisconnect(LinkPacket),

    #[error("unknown command: {0}")]
    UnknownCommand(LinkPacket),
}

impl LinkError {
    /// Protocol violations, as opposed to transport failures.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, LinkError::Transport(_))
    }
}

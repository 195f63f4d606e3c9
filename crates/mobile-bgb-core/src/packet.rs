//! BGB link protocol packets.
//!
//! Every packet is exactly 8 bytes: a command byte, three payload bytes and a
//! 32-bit timestamp. See: <https://bgb.bircd.org/bgblink.html>

use std::fmt;

/// Size of a link packet on the wire.
pub const PACKET_SIZE: usize = 8;

pub const STATUS_RUNNING: u8 = 0x01;
pub const STATUS_PAUSED: u8 = 0x02;
pub const STATUS_SUPPORT_RECONNECT: u8 = 0x04;

/// Control byte sent in every SYNC2 reply.
pub const SYNC2_CONTROL: u8 = 0x80;

/// Timestamps are compared modulo 2^31.
pub const TIMESTAMP_MASK: u32 = 0x7FFF_FFFF;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Version,
    Joypad,
    Sync1,
    Sync2,
    Sync3,
    Status,
    WantDisconnect,
}

impl Command {
    pub const fn code(self) -> u8 {
        match self {
            Command::Version => 1,
            Command::Joypad => 101,
            Command::Sync1 => 104,
            Command::Sync2 => 105,
            Command::Sync3 => 106,
            Command::Status => 108,
            Command::WantDisconnect => 109,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Command::Version),
            101 => Some(Command::Joypad),
            104 => Some(Command::Sync1),
            105 => Some(Command::Sync2),
            106 => Some(Command::Sync3),
            108 => Some(Command::Status),
            109 => Some(Command::WantDisconnect),
            _ => None,
        }
    }
}

/// A single link packet.
///
/// The command is kept as its raw byte so that packets with unknown commands
/// can still be decoded and reported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkPacket {
    pub command: u8,
    pub b2: u8,
    pub b3: u8,
    pub b4: u8,
    pub timestamp: u32,
}

impl LinkPacket {
    pub const fn new(command: Command, b2: u8, b3: u8, b4: u8, timestamp: u32) -> Self {
        Self {
            command: command.code(),
            b2,
            b3,
            b4,
            timestamp,
        }
    }

    /// The handshake packet, announcing protocol version 1.4.0.
    pub const fn version() -> Self {
        Self::new(Command::Version, 1, 4, 0, 0)
    }

    pub fn status(running: bool, paused: bool, support_reconnect: bool) -> Self {
        let mut flags = 0u8;
        if running {
            flags |= STATUS_RUNNING;
        }
        if paused {
            flags |= STATUS_PAUSED;
        }
        if support_reconnect {
            flags |= STATUS_SUPPORT_RECONNECT;
        }
        Self::new(Command::Status, flags, 0, 0, 0)
    }

    /// Passive-side reply to a SYNC1, carrying the byte shifted out.
    pub const fn sync2(data: u8) -> Self {
        Self::new(Command::Sync2, data, SYNC2_CONTROL, 0, 0)
    }

    pub fn kind(&self) -> Option<Command> {
        Command::from_code(self.command)
    }

    pub fn to_bytes(self) -> [u8; PACKET_SIZE] {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = self.command;
        buf[1] = self.b2;
        buf[2] = self.b3;
        buf[3] = self.b4;
        buf[4..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; PACKET_SIZE]) -> Self {
        Self {
            command: buf[0],
            b2: buf[1],
            b3: buf[2],
            b4: buf[3],
            timestamp: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

impl fmt::Display for LinkPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cmd={} ({:02X} {:02X} {:02X}) @ {}",
            self.command, self.b2, self.b3, self.b4, self.timestamp
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_packet_layout() {
        assert_eq!(
            LinkPacket::version().to_bytes(),
            [0x01, 0x01, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn status_flags_combine() {
        assert_eq!(LinkPacket::status(true, true, false).b2, 0x03);
        assert_eq!(LinkPacket::status(true, true, true).b2, 0x07);
        assert_eq!(LinkPacket::status(true, false, true).b2, 0x05);
        assert_eq!(LinkPacket::status(true, false, false).command, 108);
    }

    #[test]
    fn timestamp_is_little_endian() {
        // SYNC1 data=0x01 ctrl=0x85 ts=49667669, captured between two BGB instances.
        let packet = LinkPacket::from_bytes(&[0x68, 0x01, 0x85, 0x00, 0x55, 0xDE, 0xF5, 0x02]);
        assert_eq!(packet.kind(), Some(Command::Sync1));
        assert_eq!(packet.b2, 0x01);
        assert_eq!(packet.b3, 0x85);
        assert_eq!(packet.timestamp, 49_667_669);
    }

    #[test]
    fn unknown_command_survives_decoding() {
        let packet = LinkPacket::from_bytes(&[0xEE, 1, 2, 3, 4, 0, 0, 0]);
        assert_eq!(packet.kind(), None);
        assert_eq!(packet.command, 0xEE);
        assert_eq!(packet.to_bytes(), [0xEE, 1, 2, 3, 4, 0, 0, 0]);
    }

    #[test]
    fn sync2_reply_layout() {
        assert_eq!(
            LinkPacket::sync2(0xD2).to_bytes(),
            [105, 0xD2, 0x80, 0, 0, 0, 0, 0]
        );
    }
}

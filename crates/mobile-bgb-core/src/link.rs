//! Passive side of the BGB link protocol.
//!
//! The emulator is always the clock master here: it sends SYNC1 with the byte
//! the game shifted out, and we answer with SYNC2 carrying the byte the
//! peripheral produced on the previous transfer.

use std::io::{self, Read, Write};

use log::{debug, info, warn};
#[cfg(feature = "packet-trace")]
use log::trace;

use crate::clock::{ClockConfig, ClockEvent, ClockFilter};
use crate::error::LinkError;
use crate::packet::{Command, LinkPacket, PACKET_SIZE};

/// Receiver of the side effects of link traffic.
pub trait LinkHandler {
    /// Exchanges one serial byte with the peripheral.
    fn transfer(&mut self, byte: u8) -> u8;

    /// The emulator clock advanced to `timestamp`.
    fn clock_update(&mut self, timestamp: u32);

    /// The emulator clock jumped; whatever state depends on it is stale.
    fn clock_reset(&mut self, timestamp: u32);
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum HandshakeMode {
    /// Announce our status once and answer the emulator's STATUS whenever it arrives.
    #[default]
    Immediate,
    /// Announce a paused status, wait for the emulator's STATUS, then unpause.
    AwaitStatus,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LinkConfig {
    /// Byte answered to the first SYNC1, before the peripheral produced anything.
    pub idle_byte: u8,
    pub handshake: HandshakeMode,
    pub clock: ClockConfig,
}

impl LinkConfig {
    pub fn new(idle_byte: u8) -> Self {
        Self {
            idle_byte,
            handshake: HandshakeMode::default(),
            clock: ClockConfig::default(),
        }
    }
}

fn send_packet<W: Write + ?Sized>(stream: &mut W, packet: &LinkPacket) -> io::Result<()> {
    #[cfg(feature = "packet-trace")]
    trace!("Link: -> {packet}");
    stream.write_all(&packet.to_bytes())?;
    stream.flush()
}

fn recv_packet<R: Read + ?Sized>(stream: &mut R) -> io::Result<LinkPacket> {
    let mut buf = [0u8; PACKET_SIZE];
    stream.read_exact(&mut buf)?;
    let packet = LinkPacket::from_bytes(&buf);
    #[cfg(feature = "packet-trace")]
    trace!("Link: <- {packet}");
    Ok(packet)
}

/// State of one connection to the emulator.
#[derive(Debug)]
pub struct LinkSession {
    transfer_last: u8,
    clock: ClockFilter,
    status_acknowledged: bool,
}

impl LinkSession {
    /// Performs the handshake on a freshly connected stream.
    ///
    /// The stream must be blocking; the handshake waits for each reply.
    pub fn handshake<S: Read + Write + ?Sized>(
        stream: &mut S,
        config: &LinkConfig,
    ) -> Result<Self, LinkError> {
        let version = LinkPacket::version();
        send_packet(stream, &version)?;

        let reply = recv_packet(stream)?;
        if reply != version {
            warn!("Link: invalid handshake ({reply})");
            return Err(LinkError::HandshakeMismatch { received: reply });
        }

        let status_acknowledged = match config.handshake {
            HandshakeMode::Immediate => {
                send_packet(stream, &LinkPacket::status(true, true, false))?;
                false
            }
            HandshakeMode::AwaitStatus => {
                send_packet(stream, &LinkPacket::status(true, true, true))?;

                let status = recv_packet(stream)?;
                if status.kind() != Some(Command::Status) {
                    warn!("Link: expected STATUS during handshake, got {status}");
                    return Err(LinkError::UnexpectedPacket {
                        stage: "handshake",
                        packet: status,
                    });
                }

                send_packet(stream, &LinkPacket::status(true, false, true))?;
                true
            }
        };

        info!("Link: handshake complete ({:?})", config.handshake);
        Ok(Self {
            transfer_last: config.idle_byte,
            clock: ClockFilter::new(config.clock),
            status_acknowledged,
        })
    }

    /// Byte that will be answered to the next SYNC1.
    pub fn transfer_last(&self) -> u8 {
        self.transfer_last
    }

    /// Last accepted emulator clock value.
    pub fn clock(&self) -> u32 {
        self.clock.current()
    }

    pub fn status_acknowledged(&self) -> bool {
        self.status_acknowledged
    }

    /// Receives and handles exactly one packet. Blocks until it arrives.
    pub fn step<S, H>(&mut self, stream: &mut S, handler: &mut H) -> Result<(), LinkError>
    where
        S: Read + Write + ?Sized,
        H: LinkHandler + ?Sized,
    {
        let packet = recv_packet(stream)?;
        let mut timestamp = None;

        match packet.kind() {
            Some(Command::Joypad) | Some(Command::Sync2) => {}
            Some(Command::Sync1) => {
                timestamp = Some(packet.timestamp);
                send_packet(stream, &LinkPacket::sync2(self.transfer_last))?;
                self.transfer_last = handler.transfer(packet.b2);
            }
            Some(Command::Sync3) => {
                timestamp = Some(packet.timestamp);
                if packet.b2 == 0 {
                    send_packet(stream, &packet)?;
                }
            }
            Some(Command::Status) => {
                if !self.status_acknowledged {
                    send_packet(stream, &LinkPacket::status(true, false, false))?;
                    self.status_acknowledged = true;
                    debug!("Link: emulator status 0x{:02X} acknowledged", packet.b2);
                }
            }
            Some(Command::WantDisconnect) => {
                warn!("Link: emulator wants to disconnect ({packet})");
                return Err(LinkError::PeerDisconnect(packet));
            }
            Some(Command::Version) | None => {
                warn!("Link: unknown command: {packet}");
                return Err(LinkError::UnknownCommand(packet));
            }
        }

        if let Some(timestamp) = timestamp {
            match self.clock.observe(timestamp) {
                ClockEvent::Unchanged => {}
                ClockEvent::Tick(now) => handler.clock_update(now),
                ClockEvent::Reset(now) => {
                    info!("Link: emulator clock jumped to 0x{now:08X}, resetting");
                    handler.clock_reset(now);
                }
            }
        }

        Ok(())
    }
}

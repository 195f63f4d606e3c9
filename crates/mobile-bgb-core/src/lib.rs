//! Link-cable side of the Mobile Adapter bridge.
//!
//! This crate speaks the BGB link protocol as the passive peer and hands the
//! exchanged serial bytes to a [`Peripheral`]. It performs no I/O of its own
//! beyond the `Read + Write` stream it is given; sockets and the libmobile
//! binding live in `mobile-bgb-adapter`.

/// Emulator clock filtering and timer latches.
pub mod clock;

/// Cooperative dispatch of peripheral actions.
pub mod dispatch;

pub mod error;

/// Handshake and per-packet handling.
pub mod link;

/// 8-byte link packet codec.
pub mod packet;

/// Capability interface of the serial peripheral.
pub mod peripheral;

pub use clock::{ClockConfig, ClockEvent, ClockFilter, ClockLatches, ClockMode, SharedClock};
pub use dispatch::{ActionDispatcher, SessionState};
pub use error::LinkError;
pub use link::{HandshakeMode, LinkConfig, LinkHandler, LinkSession};
pub use packet::{Command, LinkPacket, PACKET_SIZE};
pub use peripheral::{Action, Peripheral};

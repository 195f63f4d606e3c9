use std::io;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use log::{debug, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use thiserror::Error;

use crate::poll::{self, PollHandle};
use crate::{MOBILE_MAX_CONNECTIONS, MobileAddr, MobileAddrType, MobileSockType};

/// How long `connect` waits for an in-progress connection before reporting it as pending.
const CONNECT_WAIT: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum SockError {
    #[error("connection slot {0} does not exist")]
    InvalidSlot(usize),

    #[error("connection slot {0} is already open")]
    SlotBusy(usize),

    #[error("connection slot {0} is not open")]
    SlotEmpty(usize),

    #[error("unsupported address type")]
    Unsupported,

    #[error("peer closed the connection")]
    PeerClosed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectStatus {
    Connected,
    InProgress,
}

#[derive(Debug)]
struct OpenSocket {
    socket: Socket,
    socktype: MobileSockType,
    addrtype: MobileAddrType,
    local_port: u16,
    listening: bool,
}

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Empty,
    Open(OpenSocket),
}

/// Fixed table of non-blocking sockets, one per libmobile connection.
///
/// No operation ever blocks except `connect`, which waits at most
/// [`CONNECT_WAIT`] for the handshake to finish.
#[derive(Debug, Default)]
pub struct SocketTable {
    slots: [Slot; MOBILE_MAX_CONNECTIONS],
}

fn would_block(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    matches!(err.raw_os_error(), Some(code) if code == errno::EINPROGRESS || code == errno::EWOULDBLOCK)
}

fn connect_in_progress(err: &io::Error) -> bool {
    would_block(err) || err.raw_os_error() == Some(errno::EALREADY)
}

fn already_connected(err: &io::Error) -> bool {
    err.raw_os_error() == Some(errno::EISCONN)
}

fn hard_error(what: &str, slot: usize, err: io::Error) -> SockError {
    warn!("Socket: {what} failed on slot {slot}: {err}");
    SockError::Io(err)
}

fn as_uninit(buf: &mut [u8]) -> &mut [MaybeUninit<u8>] {
    // SAFETY: `MaybeUninit<u8>` has the same layout as `u8`, and socket2 only
    // ever writes initialized bytes into the buffer.
    unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) }
}

impl SocketTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut Slot, SockError> {
        self.slots.get_mut(slot).ok_or(SockError::InvalidSlot(slot))
    }

    fn open_socket(&self, slot: usize) -> Result<&OpenSocket, SockError> {
        match self.slots.get(slot) {
            None => Err(SockError::InvalidSlot(slot)),
            Some(Slot::Empty) => Err(SockError::SlotEmpty(slot)),
            Some(Slot::Open(open)) => Ok(open),
        }
    }

    fn open_socket_mut(&mut self, slot: usize) -> Result<&mut OpenSocket, SockError> {
        match self.slot_mut(slot)? {
            Slot::Empty => Err(SockError::SlotEmpty(slot)),
            Slot::Open(open) => Ok(open),
        }
    }

    pub fn is_open(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(Slot::Open(_)))
    }

    pub fn is_listening(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(Slot::Open(open)) if open.listening)
    }

    pub fn local_addr(&self, slot: usize) -> Result<SocketAddr, SockError> {
        let open = self.open_socket(slot)?;
        open.socket
            .local_addr()?
            .as_socket()
            .ok_or(SockError::Unsupported)
    }

    /// Creates a non-blocking socket bound to the wildcard address on `bind_port`.
    ///
    /// An occupied slot is left untouched. On failure the slot stays empty.
    pub fn open(
        &mut self,
        slot: usize,
        socktype: MobileSockType,
        addrtype: MobileAddrType,
        bind_port: u16,
    ) -> Result<(), SockError> {
        let entry = self.slot_mut(slot)?;
        if matches!(entry, Slot::Open(_)) {
            warn!("Socket: slot {slot} opened twice");
            return Err(SockError::SlotBusy(slot));
        }

        let (domain, bind_addr) = match addrtype {
            MobileAddrType::Ipv4 => (
                Domain::IPV4,
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, bind_port)),
            ),
            MobileAddrType::Ipv6 => (
                Domain::IPV6,
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, bind_port)),
            ),
            MobileAddrType::None => return Err(SockError::Unsupported),
        };
        let (ty, protocol) = match socktype {
            MobileSockType::Tcp => (Type::STREAM, Protocol::TCP),
            MobileSockType::Udp => (Type::DGRAM, Protocol::UDP),
        };

        let socket =
            Socket::new(domain, ty, Some(protocol)).map_err(|e| hard_error("socket", slot, e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| hard_error("set_nonblocking", slot, e))?;
        // Allow rebinding the same port right after a previous session closed it.
        socket
            .set_reuse_address(true)
            .map_err(|e| hard_error("setsockopt(SO_REUSEADDR)", slot, e))?;
        if socktype == MobileSockType::Tcp {
            socket
                .set_tcp_nodelay(true)
                .map_err(|e| hard_error("setsockopt(TCP_NODELAY)", slot, e))?;
        }
        socket
            .bind(&bind_addr.into())
            .map_err(|e| hard_error("bind", slot, e))?;

        debug!("Socket: slot {slot} open ({socktype:?}, {bind_addr})");
        *entry = Slot::Open(OpenSocket {
            socket,
            socktype,
            addrtype,
            local_port: bind_port,
            listening: false,
        });
        Ok(())
    }

    /// Closes the socket in `slot`. The slot is always empty afterwards.
    pub fn close(&mut self, slot: usize) {
        let Some(entry) = self.slots.get_mut(slot) else {
            warn!("Socket: close on invalid slot {slot}");
            return;
        };
        if matches!(entry, Slot::Empty) {
            warn!("Socket: close on empty slot {slot}");
        }
        *entry = Slot::Empty;
    }

    pub fn connect(&mut self, slot: usize, addr: &MobileAddr) -> Result<ConnectStatus, SockError> {
        let target = addr.to_socket_addr().ok_or(SockError::Unsupported)?;
        let open = self.open_socket_mut(slot)?;

        let err = match open.socket.connect(&target.into()) {
            Ok(()) => return Ok(ConnectStatus::Connected),
            Err(e) if already_connected(&e) => return Ok(ConnectStatus::Connected),
            Err(e) => e,
        };

        if !connect_in_progress(&err) {
            warn!("Socket: could not connect to {target}: {err}");
            return Err(SockError::Io(err));
        }

        let handle = poll::handle_of(&open.socket);
        if !poll::wait_writable(handle, CONNECT_WAIT).map_err(|e| hard_error("poll", slot, e))? {
            return Ok(ConnectStatus::InProgress);
        }

        match open.socket.take_error() {
            Ok(None) => Ok(ConnectStatus::Connected),
            Ok(Some(err)) | Err(err) => {
                warn!("Socket: could not connect to {target}: {err}");
                Err(SockError::Io(err))
            }
        }
    }

    pub fn listen(&mut self, slot: usize) -> Result<(), SockError> {
        let open = self.open_socket_mut(slot)?;
        open.socket
            .listen(1)
            .map_err(|e| hard_error("listen", slot, e))?;
        open.listening = true;
        Ok(())
    }

    /// Accepts a pending connection, replacing the listener in place.
    ///
    /// Returns `Ok(false)` when nobody is waiting.
    pub fn accept(&mut self, slot: usize) -> Result<bool, SockError> {
        let open = self.open_socket_mut(slot)?;

        let (socket, peer) = match open.socket.accept() {
            Ok(pair) => pair,
            Err(e) if would_block(&e) => return Ok(false),
            Err(e) => return Err(hard_error("accept", slot, e)),
        };
        socket
            .set_nonblocking(true)
            .map_err(|e| hard_error("set_nonblocking", slot, e))?;

        debug!(
            "Socket: slot {slot} accepted {}",
            peer.as_socket().map_or_else(|| "?".to_string(), |a| a.to_string())
        );
        *open = OpenSocket {
            socket,
            socktype: open.socktype,
            addrtype: open.addrtype,
            local_port: open.local_port,
            listening: false,
        };
        Ok(true)
    }

    /// Sends `data`, to `addr` if given on a datagram socket. Returns 0 on would-block.
    pub fn send(
        &mut self,
        slot: usize,
        data: &[u8],
        addr: Option<&MobileAddr>,
    ) -> Result<usize, SockError> {
        let open = self.open_socket(slot)?;

        let target = match (open.socktype, addr) {
            (MobileSockType::Udp, Some(addr)) => {
                Some(addr.to_socket_addr().ok_or(SockError::Unsupported)?)
            }
            _ => None,
        };
        let result = match target {
            Some(target) => open.socket.send_to(data, &target.into()),
            None => open.socket.send(data),
        };

        match result {
            Ok(n) => Ok(n),
            Err(e) if would_block(&e) => Ok(0),
            Err(e) => Err(hard_error("send", slot, e)),
        }
    }

    /// Receives into `buf`, or peeks one byte when `buf` is `None`.
    ///
    /// Returns 0 when nothing is available. A zero-length read on a stream
    /// socket means the peer hung up and is reported as [`SockError::PeerClosed`];
    /// on a datagram socket it is an ordinary empty datagram.
    pub fn recv(
        &mut self,
        slot: usize,
        buf: Option<&mut [u8]>,
        addr_out: Option<&mut MobileAddr>,
    ) -> Result<usize, SockError> {
        let open = self.open_socket(slot)?;

        let peeking = buf.is_none();
        let mut one = [0u8; 1];
        let result = match buf {
            Some(buf) => open.socket.recv_from(as_uninit(buf)),
            None => open.socket.peek_from(as_uninit(&mut one)),
        };

        let (n, from) = match result {
            Ok(pair) => pair,
            Err(e) if would_block(&e) => return Ok(0),
            Err(e) => return Err(hard_error("recv", slot, e)),
        };

        if n == 0 {
            let ty = open
                .socket
                .r#type()
                .map_err(|e| hard_error("getsockopt(SO_TYPE)", slot, e))?;
            if ty == Type::STREAM {
                debug!("Socket: slot {slot} peer closed");
                return Err(SockError::PeerClosed);
            }
        }

        if !peeking
            && let Some(out) = addr_out
            && let Some(peer) = decode_peer(&from)
        {
            *out = peer;
        }
        Ok(n)
    }

    /// Raw handles of every open slot.
    pub fn poll_handles(&self, out: &mut Vec<PollHandle>) {
        for entry in &self.slots {
            if let Slot::Open(open) = entry {
                out.push(poll::handle_of(&open.socket));
            }
        }
    }
}

fn decode_peer(addr: &SockAddr) -> Option<MobileAddr> {
    addr.as_socket().map(MobileAddr::from)
}

#[cfg(windows)]
mod errno {
    pub const EWOULDBLOCK: i32 = 10035; // WSAEWOULDBLOCK
    pub const EINPROGRESS: i32 = 10036; // WSAEINPROGRESS
    pub const EALREADY: i32 = 10037; // WSAEALREADY
    pub const EISCONN: i32 = 10056; // WSAEISCONN
}

#[cfg(unix)]
mod errno {
    pub use libc::{EALREADY, EINPROGRESS, EISCONN, EWOULDBLOCK};
}

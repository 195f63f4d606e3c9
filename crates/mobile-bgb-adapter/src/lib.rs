#![cfg_attr(
    any(feature = "bundled", feature = "system"),
    allow(unsafe_op_in_unsafe_fn)
)]

//! Host side of the Mobile Adapter bridge.
//!
//! [`MobileAdapter`] wraps libmobile and exposes it to the link loop as a
//! [`Peripheral`]. libmobile in turn calls back into an [`AdapterHost`] for
//! sockets, configuration storage and timers; [`BridgeHost`] is the host the
//! bridge uses. The libmobile backend is enabled by the `bundled` or `system`
//! features; without them [`MobileAdapter::new`] reports it as unavailable.

use std::{
    fmt, io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

#[cfg(any(feature = "bundled", feature = "system"))]
use std::{ffi::CStr, os::raw::c_void};

use log::debug;
use thiserror::Error;

use mobile_bgb_core::{Action, Peripheral};

#[cfg(any(feature = "bundled", feature = "system"))]
use mobile_bgb_sys as sys;

pub mod config_store;
mod host;
pub mod numbers;
pub mod poll;
pub mod sockets;

pub use config_store::ConfigStore;
pub use host::BridgeHost;
pub use numbers::PhoneNumbers;
pub use poll::{PollHandle, PollSources, Poller};
pub use sockets::{ConnectStatus, SockError, SocketTable};

/// Maximum number of concurrent libmobile connections.
pub const MOBILE_MAX_CONNECTIONS: usize = 2;
/// Maximum number of independent libmobile timers.
pub const MOBILE_MAX_TIMERS: usize = 4;
/// Size of the persisted configuration blob.
pub const MOBILE_CONFIG_SIZE: usize = 0x200;
/// Maximum length of a phone number.
pub const MOBILE_MAX_NUMBER_SIZE: usize = 0x20;
/// Size of the P2P relay token.
pub const MOBILE_RELAY_TOKEN_SIZE: usize = 0x10;
/// Byte value returned by libmobile while the serial line is idle.
pub const MOBILE_SERIAL_IDLE_BYTE: u8 = 0xD2;

pub const MOBILE_DNS_PORT: u16 = 53;
pub const MOBILE_DEFAULT_P2P_PORT: u16 = 1027;
pub const MOBILE_DEFAULT_RELAY_PORT: u16 = 31227;

/// libmobile's serial resynchronization request.
pub const ACTION_RESET_SERIAL: Action = Action::from_bits(1 << 3);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
/// Cosmetic device selection for the Mobile Adapter.
pub enum MobileAdapterDevice {
    #[default]
    Blue,
    Yellow,
    Green,
    Red,
}

/// How to treat the relay token stored in the config blob.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RelayToken {
    #[default]
    Keep,
    Clear,
    Set([u8; MOBILE_RELAY_TOKEN_SIZE]),
}

/// Configuration overrides applied on top of the persisted config blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MobileConfig {
    pub device: MobileAdapterDevice,
    pub unmetered: bool,
    pub dns1: MobileAddr,
    pub dns2: MobileAddr,
    pub p2p_port: Option<u16>,
    pub relay: MobileAddr,
    pub relay_token: RelayToken,
}

impl Default for MobileConfig {
    fn default() -> Self {
        Self {
            device: MobileAdapterDevice::default(),
            unmetered: false,
            dns1: MobileAddr::None,
            dns2: MobileAddr::None,
            p2p_port: Some(MOBILE_DEFAULT_P2P_PORT),
            relay: MobileAddr::None,
            relay_token: RelayToken::Keep,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Which phone number (user or peer) is being updated.
pub enum MobileNumber {
    User,
    Peer,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Socket type requested by libmobile.
pub enum MobileSockType {
    Tcp,
    Udp,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Address family requested by libmobile.
pub enum MobileAddrType {
    None,
    Ipv4,
    Ipv6,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
/// IP address + port representation used by libmobile.
pub enum MobileAddr {
    #[default]
    None,
    V4 {
        host: [u8; 4],
        port: u16,
    },
    V6 {
        host: [u8; 16],
        port: u16,
    },
}

impl MobileAddr {
    /// Converts this address into a standard library `SocketAddr`.
    ///
    /// Returns `None` for [`MobileAddr::None`].
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match self {
            MobileAddr::None => None,
            MobileAddr::V4 { host, port } => {
                Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(*host)), *port))
            }
            MobileAddr::V6 { host, port } => {
                Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(*host)), *port))
            }
        }
    }

    pub fn addr_type(&self) -> MobileAddrType {
        match self {
            MobileAddr::None => MobileAddrType::None,
            MobileAddr::V4 { .. } => MobileAddrType::Ipv4,
            MobileAddr::V6 { .. } => MobileAddrType::Ipv6,
        }
    }

    /// Same host with a different port. `None` stays `None`.
    pub fn with_port(self, port: u16) -> Self {
        match self {
            MobileAddr::None => MobileAddr::None,
            MobileAddr::V4 { host, .. } => MobileAddr::V4 { host, port },
            MobileAddr::V6 { host, .. } => MobileAddr::V6 { host, port },
        }
    }
}

impl From<SocketAddr> for MobileAddr {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => MobileAddr::V4 {
                host: v4.ip().octets(),
                port: v4.port(),
            },
            SocketAddr::V6(v6) => MobileAddr::V6 {
                host: v6.ip().octets(),
                port: v6.port(),
            },
        }
    }
}

impl From<IpAddr> for MobileAddr {
    /// Address with port 0; set the port with [`MobileAddr::with_port`].
    fn from(ip: IpAddr) -> Self {
        MobileAddr::from(SocketAddr::new(ip, 0))
    }
}

/// Host callbacks required by [`MobileAdapter`].
///
/// Slot indices (`conn`) are in `0..MOBILE_MAX_CONNECTIONS` and timer indices
/// in `0..MOBILE_MAX_TIMERS`; anything else is rejected by the host.
pub trait AdapterHost: Send {
    /// Debug line emitted by libmobile.
    fn debug_log(&mut self, line: &str) {
        debug!(target: "libmobile", "{line}");
    }
    /// A phone number changed. `None` clears it.
    fn update_number(&mut self, _which: MobileNumber, _number: Option<&str>) {}

    /// Reads exactly `dest.len()` bytes of the config blob at `offset`.
    fn config_read(&mut self, dest: &mut [u8], offset: usize) -> io::Result<()>;
    /// Writes `src` into the config blob at `offset`.
    fn config_write(&mut self, src: &[u8], offset: usize) -> io::Result<()>;

    /// Remembers the current time for `timer`.
    fn time_latch(&mut self, timer: usize);
    /// Whether `ms` milliseconds passed since `timer` was latched.
    fn time_check_ms(&mut self, timer: usize, ms: u32) -> bool;

    fn sock_open(
        &mut self,
        conn: usize,
        socktype: MobileSockType,
        addrtype: MobileAddrType,
        bind_port: u16,
    ) -> Result<(), SockError>;
    fn sock_close(&mut self, conn: usize);
    fn sock_connect(&mut self, conn: usize, addr: &MobileAddr) -> Result<ConnectStatus, SockError>;
    fn sock_listen(&mut self, conn: usize) -> Result<(), SockError>;
    /// Returns `Ok(false)` while nobody is waiting to be accepted.
    fn sock_accept(&mut self, conn: usize) -> Result<bool, SockError>;
    /// Returns the number of bytes sent; 0 if the socket would block.
    fn sock_send(
        &mut self,
        conn: usize,
        data: &[u8],
        addr: Option<&MobileAddr>,
    ) -> Result<usize, SockError>;
    /// Returns the number of bytes received; 0 if nothing is available.
    /// A `None` buffer only checks for pending data or a hangup.
    fn sock_recv(
        &mut self,
        conn: usize,
        data: Option<&mut [u8]>,
        addr_out: Option<&mut MobileAddr>,
    ) -> Result<usize, SockError>;

    /// Raw handles of the host's open sockets, for readiness waiting.
    fn poll_handles(&self, _out: &mut Vec<PollHandle>) {}
}

#[derive(Error, Debug)]
pub enum MobileError {
    #[error("libmobile backend is not enabled (build with features 'bundled' or 'system')")]
    Unavailable,

    #[error("libmobile failed to allocate adapter")]
    AllocationFailed,

    #[error("invalid libmobile usage: {0}")]
    InvalidState(&'static str),
}

/// Owning wrapper around a libmobile instance.
///
/// The adapter is driven entirely by its [`Peripheral`] implementation: the
/// link loop feeds serial bytes through `transfer` and runs the actions
/// returned by `action_get`.
pub struct MobileAdapter {
    #[cfg(any(feature = "bundled", feature = "system"))]
    inner: Box<MobileAdapterInner>,

    #[cfg(not(any(feature = "bundled", feature = "system")))]
    _unavailable: (),
}

impl fmt::Debug for MobileAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MobileAdapter").finish_non_exhaustive()
    }
}

impl MobileAdapter {
    /// Creates an adapter and loads the persisted configuration through `host`.
    ///
    /// The adapter is not started.
    pub fn new(host: Box<dyn AdapterHost>) -> Result<Self, MobileError> {
        #[cfg(any(feature = "bundled", feature = "system"))]
        {
            let inner = MobileAdapterInner::new(host)?;
            Ok(Self { inner })
        }

        #[cfg(not(any(feature = "bundled", feature = "system")))]
        {
            let _ = host;
            Err(MobileError::Unavailable)
        }
    }

    /// Whether libmobile was compiled in.
    pub const fn is_available() -> bool {
        cfg!(any(feature = "bundled", feature = "system"))
    }

    /// Applies configuration overrides and saves the result to the config blob.
    pub fn apply_config(&mut self, config: &MobileConfig) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        self.inner.apply_config(config);

        #[cfg(not(any(feature = "bundled", feature = "system")))]
        let _ = config;
    }

    pub fn host(&self) -> Option<&dyn AdapterHost> {
        #[cfg(any(feature = "bundled", feature = "system"))]
        {
            Some(self.inner.host.as_ref())
        }

        #[cfg(not(any(feature = "bundled", feature = "system")))]
        {
            None
        }
    }

    /// Returns the idle filler byte used by the mobile serial protocol.
    pub fn idle_byte() -> u8 {
        MOBILE_SERIAL_IDLE_BYTE
    }
}

impl Peripheral for MobileAdapter {
    fn start(&mut self) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        self.inner.start();
    }

    fn stop(&mut self) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        self.inner.stop();
    }

    fn transfer(&mut self, byte: u8) -> u8 {
        #[cfg(any(feature = "bundled", feature = "system"))]
        {
            self.inner.transfer(byte)
        }

        #[cfg(not(any(feature = "bundled", feature = "system")))]
        {
            let _ = byte;
            MOBILE_SERIAL_IDLE_BYTE
        }
    }

    fn action_get(&mut self) -> Action {
        #[cfg(any(feature = "bundled", feature = "system"))]
        {
            self.inner.action_get()
        }

        #[cfg(not(any(feature = "bundled", feature = "system")))]
        {
            Action::NONE
        }
    }

    fn action_process(&mut self, action: Action) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        self.inner.action_process(action);

        #[cfg(not(any(feature = "bundled", feature = "system")))]
        let _ = action;
    }

    fn serial_reset_mask(&self) -> Action {
        ACTION_RESET_SERIAL
    }
}

impl PollSources for MobileAdapter {
    fn poll_handles(&self, out: &mut Vec<PollHandle>) {
        if let Some(host) = self.host() {
            host.poll_handles(out);
        }
    }
}

#[cfg(any(feature = "bundled", feature = "system"))]
struct MobileAdapterInner {
    adapter: *mut sys::mobile_adapter,
    host: Box<dyn AdapterHost>,
    serial_enabled: bool,
    mode_32bit: bool,
}

// Safety: the raw adapter pointer is owned by `MobileAdapterInner` and only
// dereferenced by libmobile while `MobileAdapter` is borrowed mutably.
#[cfg(any(feature = "bundled", feature = "system"))]
unsafe impl Send for MobileAdapterInner {}

#[cfg(any(feature = "bundled", feature = "system"))]
impl MobileAdapterInner {
    fn new(host: Box<dyn AdapterHost>) -> Result<Box<Self>, MobileError> {
        let mut inner = Box::new(Self {
            adapter: std::ptr::null_mut(),
            host,
            serial_enabled: false,
            mode_32bit: false,
        });

        let user_ptr: *mut c_void = (&mut *inner) as *mut _ as *mut c_void;

        unsafe {
            let adapter = sys::mobile_new(user_ptr);
            if adapter.is_null() {
                return Err(MobileError::AllocationFailed);
            }
            inner.adapter = adapter;

            sys::mobile_def_debug_log(adapter, Some(cb_debug_log));
            sys::mobile_def_serial_disable(adapter, Some(cb_serial_disable));
            sys::mobile_def_serial_enable(adapter, Some(cb_serial_enable));
            sys::mobile_def_config_read(adapter, Some(cb_config_read));
            sys::mobile_def_config_write(adapter, Some(cb_config_write));
            sys::mobile_def_time_latch(adapter, Some(cb_time_latch));
            sys::mobile_def_time_check_ms(adapter, Some(cb_time_check_ms));
            sys::mobile_def_sock_open(adapter, Some(cb_sock_open));
            sys::mobile_def_sock_close(adapter, Some(cb_sock_close));
            sys::mobile_def_sock_connect(adapter, Some(cb_sock_connect));
            sys::mobile_def_sock_listen(adapter, Some(cb_sock_listen));
            sys::mobile_def_sock_accept(adapter, Some(cb_sock_accept));
            sys::mobile_def_sock_send(adapter, Some(cb_sock_send));
            sys::mobile_def_sock_recv(adapter, Some(cb_sock_recv));
            sys::mobile_def_update_number(adapter, Some(cb_update_number));

            sys::mobile_config_load(adapter);
        }

        Ok(inner)
    }

    fn start(&mut self) {
        unsafe { sys::mobile_start(self.adapter) };
    }

    fn stop(&mut self) {
        unsafe { sys::mobile_stop(self.adapter) };
    }

    fn transfer(&mut self, byte: u8) -> u8 {
        if !self.serial_enabled || self.mode_32bit {
            // 32-bit mode is GBA-only; a GB link never enables it.
            return MOBILE_SERIAL_IDLE_BYTE;
        }

        unsafe { sys::mobile_transfer(self.adapter, byte) }
    }

    fn action_get(&mut self) -> Action {
        let bits = unsafe { sys::mobile_actions_get(self.adapter) };
        Action::from_bits(bits)
    }

    fn action_process(&mut self, action: Action) {
        unsafe { sys::mobile_actions_process(self.adapter, action.bits()) };
    }

    fn apply_config(&mut self, config: &MobileConfig) {
        let device = match config.device {
            MobileAdapterDevice::Blue => sys::mobile_adapter_device::MOBILE_ADAPTER_BLUE,
            MobileAdapterDevice::Yellow => sys::mobile_adapter_device::MOBILE_ADAPTER_YELLOW,
            MobileAdapterDevice::Green => sys::mobile_adapter_device::MOBILE_ADAPTER_GREEN,
            MobileAdapterDevice::Red => sys::mobile_adapter_device::MOBILE_ADAPTER_RED,
        };

        let dns1 = encode_addr(&config.dns1);
        let dns2 = encode_addr(&config.dns2);
        let relay = encode_addr(&config.relay);

        unsafe {
            sys::mobile_config_set_device(self.adapter, device, config.unmetered);
            sys::mobile_config_set_dns(self.adapter, &dns1, &dns2);

            if let Some(port) = config.p2p_port {
                sys::mobile_config_set_p2p_port(self.adapter, port as u32);
            }

            sys::mobile_config_set_relay(self.adapter, &relay);

            match &config.relay_token {
                RelayToken::Keep => {}
                RelayToken::Clear => {
                    sys::mobile_config_set_relay_token(self.adapter, std::ptr::null());
                }
                RelayToken::Set(token) => {
                    sys::mobile_config_set_relay_token(self.adapter, token.as_ptr());
                }
            }

            sys::mobile_config_save(self.adapter);
        }
    }
}

#[cfg(any(feature = "bundled", feature = "system"))]
impl Drop for MobileAdapterInner {
    fn drop(&mut self) {
        if !self.adapter.is_null() {
            unsafe {
                sys::mobile_stop(self.adapter);
                // mobile_new() allocates with malloc().
                libc_free(self.adapter as *mut c_void);
            }
        }
    }
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe fn libc_free(ptr: *mut c_void) {
    unsafe extern "C" {
        fn free(ptr: *mut c_void);
    }

    free(ptr);
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe fn with_user<'a>(user: *mut c_void) -> &'a mut MobileAdapterInner {
    &mut *(user as *mut MobileAdapterInner)
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe extern "C" fn cb_debug_log(user: *mut c_void, line: *const std::os::raw::c_char) {
    if user.is_null() || line.is_null() {
        return;
    }

    let inner = with_user(user);
    let line = CStr::from_ptr(line).to_string_lossy();
    inner.host.debug_log(&line);
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe extern "C" fn cb_serial_disable(user: *mut c_void) {
    if user.is_null() {
        return;
    }

    let inner = with_user(user);
    inner.serial_enabled = false;
    inner.mode_32bit = false;
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe extern "C" fn cb_serial_enable(user: *mut c_void, mode_32bit: bool) {
    if user.is_null() {
        return;
    }

    let inner = with_user(user);
    inner.serial_enabled = true;
    inner.mode_32bit = mode_32bit;
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe extern "C" fn cb_config_read(
    user: *mut c_void,
    dest: *mut c_void,
    offset: usize,
    size: usize,
) -> bool {
    if user.is_null() || dest.is_null() {
        return false;
    }

    let inner = with_user(user);
    let buf = core::slice::from_raw_parts_mut(dest as *mut u8, size);
    inner.host.config_read(buf, offset).is_ok()
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe extern "C" fn cb_config_write(
    user: *mut c_void,
    src: *const c_void,
    offset: usize,
    size: usize,
) -> bool {
    if user.is_null() || src.is_null() {
        return false;
    }

    let inner = with_user(user);
    let buf = core::slice::from_raw_parts(src as *const u8, size);
    inner.host.config_write(buf, offset).is_ok()
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe extern "C" fn cb_time_latch(user: *mut c_void, timer: u32) {
    if user.is_null() {
        return;
    }

    with_user(user).host.time_latch(timer as usize);
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe extern "C" fn cb_time_check_ms(user: *mut c_void, timer: u32, ms: u32) -> bool {
    if user.is_null() {
        return false;
    }

    with_user(user).host.time_check_ms(timer as usize, ms)
}

#[cfg(any(feature = "bundled", feature = "system"))]
fn decode_addr(addr: *const sys::mobile_addr) -> MobileAddr {
    if addr.is_null() {
        return MobileAddr::None;
    }

    unsafe {
        match (*addr).type_ {
            sys::mobile_addrtype::MOBILE_ADDRTYPE_IPV4 => {
                let a4 = (*addr)._addr4;
                MobileAddr::V4 {
                    host: a4.host,
                    port: a4.port as u16,
                }
            }
            sys::mobile_addrtype::MOBILE_ADDRTYPE_IPV6 => {
                let a6 = (*addr)._addr6;
                MobileAddr::V6 {
                    host: a6.host,
                    port: a6.port as u16,
                }
            }
            _ => MobileAddr::None,
        }
    }
}

#[cfg(any(feature = "bundled", feature = "system"))]
fn encode_addr(addr: &MobileAddr) -> sys::mobile_addr {
    match addr {
        MobileAddr::None => sys::mobile_addr {
            type_: sys::mobile_addrtype::MOBILE_ADDRTYPE_NONE,
        },
        MobileAddr::V4 { host, port } => sys::mobile_addr {
            _addr4: sys::mobile_addr4 {
                type_: sys::mobile_addrtype::MOBILE_ADDRTYPE_IPV4,
                port: *port as u32,
                host: *host,
            },
        },
        MobileAddr::V6 { host, port } => sys::mobile_addr {
            _addr6: sys::mobile_addr6 {
                type_: sys::mobile_addrtype::MOBILE_ADDRTYPE_IPV6,
                port: *port as u32,
                host: *host,
            },
        },
    }
}

/// libmobile's return convention for socket callbacks that report a count.
#[cfg(any(feature = "bundled", feature = "system"))]
fn count_result(result: Result<usize, SockError>) -> i32 {
    match result {
        Ok(n) => n.min(i32::MAX as usize) as i32,
        Err(SockError::PeerClosed) => -2,
        Err(_) => -1,
    }
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe extern "C" fn cb_sock_open(
    user: *mut c_void,
    conn: u32,
    socktype: sys::mobile_socktype,
    addrtype: sys::mobile_addrtype,
    bindport: u32,
) -> bool {
    if user.is_null() {
        return false;
    }

    let inner = with_user(user);

    let socktype = match socktype {
        sys::mobile_socktype::MOBILE_SOCKTYPE_TCP => MobileSockType::Tcp,
        sys::mobile_socktype::MOBILE_SOCKTYPE_UDP => MobileSockType::Udp,
    };
    let addrtype = match addrtype {
        sys::mobile_addrtype::MOBILE_ADDRTYPE_IPV4 => MobileAddrType::Ipv4,
        sys::mobile_addrtype::MOBILE_ADDRTYPE_IPV6 => MobileAddrType::Ipv6,
        sys::mobile_addrtype::MOBILE_ADDRTYPE_NONE => MobileAddrType::None,
    };

    inner
        .host
        .sock_open(conn as usize, socktype, addrtype, bindport as u16)
        .is_ok()
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe extern "C" fn cb_sock_close(user: *mut c_void, conn: u32) {
    if user.is_null() {
        return;
    }

    with_user(user).host.sock_close(conn as usize);
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe extern "C" fn cb_sock_connect(
    user: *mut c_void,
    conn: u32,
    addr: *const sys::mobile_addr,
) -> i32 {
    if user.is_null() {
        return -1;
    }

    let inner = with_user(user);
    let addr = decode_addr(addr);
    match inner.host.sock_connect(conn as usize, &addr) {
        Ok(ConnectStatus::Connected) => 1,
        Ok(ConnectStatus::InProgress) => 0,
        Err(_) => -1,
    }
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe extern "C" fn cb_sock_listen(user: *mut c_void, conn: u32) -> bool {
    if user.is_null() {
        return false;
    }

    with_user(user).host.sock_listen(conn as usize).is_ok()
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe extern "C" fn cb_sock_accept(user: *mut c_void, conn: u32) -> bool {
    if user.is_null() {
        return false;
    }

    matches!(with_user(user).host.sock_accept(conn as usize), Ok(true))
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe extern "C" fn cb_sock_send(
    user: *mut c_void,
    conn: u32,
    data: *const c_void,
    size: u32,
    addr: *const sys::mobile_addr,
) -> i32 {
    if user.is_null() || data.is_null() {
        return -1;
    }

    let inner = with_user(user);
    let buf = core::slice::from_raw_parts(data as *const u8, size as usize);
    let addr = (!addr.is_null()).then(|| decode_addr(addr));
    match inner.host.sock_send(conn as usize, buf, addr.as_ref()) {
        Ok(n) => n.min(i32::MAX as usize) as i32,
        Err(_) => -1,
    }
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe extern "C" fn cb_sock_recv(
    user: *mut c_void,
    conn: u32,
    data: *mut c_void,
    size: u32,
    addr_out: *mut sys::mobile_addr,
) -> i32 {
    if user.is_null() {
        return -1;
    }

    let inner = with_user(user);
    let mut peer = MobileAddr::None;
    let want_addr = !addr_out.is_null();

    let result = if data.is_null() {
        // A peek only reports whether the connection is still alive.
        inner.host.sock_recv(conn as usize, None, None).map(|_| 0)
    } else {
        let buf = core::slice::from_raw_parts_mut(data as *mut u8, size as usize);
        inner
            .host
            .sock_recv(conn as usize, Some(buf), want_addr.then_some(&mut peer))
    };

    let rc = count_result(result);
    if rc > 0 && want_addr && peer != MobileAddr::None {
        *addr_out = encode_addr(&peer);
    }
    rc
}

#[cfg(any(feature = "bundled", feature = "system"))]
unsafe extern "C" fn cb_update_number(
    user: *mut c_void,
    number_type: sys::mobile_number,
    number: *const std::os::raw::c_char,
) {
    if user.is_null() {
        return;
    }

    let inner = with_user(user);
    let which = match number_type {
        sys::mobile_number::MOBILE_NUMBER_USER => MobileNumber::User,
        sys::mobile_number::MOBILE_NUMBER_PEER => MobileNumber::Peer,
    };

    if number.is_null() {
        inner.host.update_number(which, None);
        return;
    }

    let number = CStr::from_ptr(number).to_string_lossy();
    inner.host.update_number(which, Some(&number));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_round_trip_through_socket_addr() {
        let cases = [
            MobileAddr::V4 {
                host: [127, 0, 0, 1],
                port: 8765,
            },
            MobileAddr::V4 {
                host: [255, 255, 255, 255],
                port: 0,
            },
            MobileAddr::V6 {
                host: [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1],
                port: 31227,
            },
            MobileAddr::V6 {
                host: [0; 16],
                port: 65535,
            },
        ];
        for addr in cases {
            let native = addr.to_socket_addr().unwrap();
            assert_eq!(MobileAddr::from(native), addr);
        }
        assert_eq!(MobileAddr::None.to_socket_addr(), None);
    }

    #[test]
    fn with_port_keeps_the_host() {
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        let addr = MobileAddr::from(ip).with_port(MOBILE_DNS_PORT);
        assert_eq!(
            addr,
            MobileAddr::V4 {
                host: [10, 0, 0, 2],
                port: 53,
            }
        );
        assert_eq!(addr.addr_type(), MobileAddrType::Ipv4);
        assert_eq!(MobileAddr::None.with_port(53), MobileAddr::None);
    }

    #[test]
    fn serial_resets_are_masked_off() {
        let combined = Action::from_bits(0b1001);
        assert_eq!(combined.without(ACTION_RESET_SERIAL), Action::from_bits(1));
    }

    #[cfg(not(any(feature = "bundled", feature = "system")))]
    #[test]
    fn adapter_reports_missing_backend() {
        struct NullHost;
        impl AdapterHost for NullHost {
            fn config_read(&mut self, _: &mut [u8], _: usize) -> io::Result<()> {
                Ok(())
            }
            fn config_write(&mut self, _: &[u8], _: usize) -> io::Result<()> {
                Ok(())
            }
            fn time_latch(&mut self, _: usize) {}
            fn time_check_ms(&mut self, _: usize, _: u32) -> bool {
                false
            }
            fn sock_open(
                &mut self,
                _: usize,
                _: MobileSockType,
                _: MobileAddrType,
                _: u16,
            ) -> Result<(), SockError> {
                Err(SockError::Unsupported)
            }
            fn sock_close(&mut self, _: usize) {}
            fn sock_connect(&mut self, _: usize, _: &MobileAddr) -> Result<ConnectStatus, SockError> {
                Err(SockError::Unsupported)
            }
            fn sock_listen(&mut self, _: usize) -> Result<(), SockError> {
                Err(SockError::Unsupported)
            }
            fn sock_accept(&mut self, _: usize) -> Result<bool, SockError> {
                Ok(false)
            }
            fn sock_send(
                &mut self,
                _: usize,
                _: &[u8],
                _: Option<&MobileAddr>,
            ) -> Result<usize, SockError> {
                Ok(0)
            }
            fn sock_recv(
                &mut self,
                _: usize,
                _: Option<&mut [u8]>,
                _: Option<&mut MobileAddr>,
            ) -> Result<usize, SockError> {
                Ok(0)
            }
        }

        assert!(!MobileAdapter::is_available());
        assert!(matches!(
            MobileAdapter::new(Box::new(NullHost)),
            Err(MobileError::Unavailable)
        ));
    }
}

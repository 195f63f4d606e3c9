#![allow(
    non_camel_case_types,
    non_snake_case,
    dead_code,
    clippy::upper_case_acronyms,
    clippy::missing_safety_doc
)]

//! Low-level (unsafe) bindings to libmobile.
//!
//! Only the part of libmobile's C ABI that the link bridge drives is mirrored
//! here. Use the safe wrapper in `mobile-bgb-adapter` instead of calling these
//! functions directly.

use core::ffi::c_void;
use std::os::raw::{c_char, c_int, c_uint};

// Constants from libmobile's public header (mobile.h).
// These are part of the public ABI surface and are safe to mirror here.

/// Maximum number of concurrent libmobile connections.
pub const MOBILE_MAX_CONNECTIONS: usize = 2;
/// Maximum number of independent libmobile timers.
pub const MOBILE_MAX_TIMERS: usize = 4;
/// Maximum length of a phone number string.
pub const MOBILE_MAX_NUMBER_SIZE: usize = 0x20;
/// Size of the persisted configuration blob.
pub const MOBILE_CONFIG_SIZE: usize = 0x200;
/// Size of the relay token in bytes.
pub const MOBILE_RELAY_TOKEN_SIZE: usize = 0x10;
/// Default DNS server port.
pub const MOBILE_DNS_PORT: u16 = 53;
/// Default port for relay-less P2P communication.
pub const MOBILE_DEFAULT_P2P_PORT: u16 = 1027;
/// Default port of the P2P relay server.
pub const MOBILE_DEFAULT_RELAY_PORT: u16 = 31227;

/// Idle filler byte used by the mobile serial protocol.
pub const MOBILE_SERIAL_IDLE_BYTE: u8 = 0xD2;

#[repr(C)]
/// Opaque libmobile adapter type.
pub struct mobile_adapter {
    _private: [u8; 0],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Adapter device identifier.
pub enum mobile_adapter_device {
    MOBILE_ADAPTER_GAMEBOY = 0,
    MOBILE_ADAPTER_GAMEBOY_ADVANCE = 1,

    MOBILE_ADAPTER_BLUE = 8,
    MOBILE_ADAPTER_YELLOW = 9,
    MOBILE_ADAPTER_GREEN = 10,
    MOBILE_ADAPTER_RED = 11,
}

/// Bitflags describing actions requested by libmobile.
///
/// `mobile_actions_get` may return several flags at once, so this is an
/// integer rather than a Rust enum.
pub type mobile_action = c_uint;

pub const MOBILE_ACTION_NONE: mobile_action = 0;
pub const MOBILE_ACTION_PROCESS_COMMAND: mobile_action = 1 << 0;
pub const MOBILE_ACTION_DROP_CONNECTION: mobile_action = 1 << 1;
pub const MOBILE_ACTION_RESET: mobile_action = 1 << 2;
/// Serial resynchronization; meaningless when the serial line is emulated.
pub const MOBILE_ACTION_RESET_SERIAL: mobile_action = 1 << 3;
pub const MOBILE_ACTION_CHANGE_32BIT_MODE: mobile_action = 1 << 4;
pub const MOBILE_ACTION_WRITE_CONFIG: mobile_action = 1 << 5;
pub const MOBILE_ACTION_INIT_NUMBER: mobile_action = 1 << 6;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Socket type requested by libmobile.
pub enum mobile_socktype {
    MOBILE_SOCKTYPE_TCP = 0,
    MOBILE_SOCKTYPE_UDP = 1,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Address type tag for [`mobile_addr`].
pub enum mobile_addrtype {
    MOBILE_ADDRTYPE_NONE = 0,
    MOBILE_ADDRTYPE_IPV4 = 1,
    MOBILE_ADDRTYPE_IPV6 = 2,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Which phone number (user or peer) is being updated.
pub enum mobile_number {
    MOBILE_NUMBER_USER = 0,
    MOBILE_NUMBER_PEER = 1,
}

/// IPv4 host length in bytes.
pub const MOBILE_HOSTLEN_IPV4: usize = 4;
/// IPv6 host length in bytes.
pub const MOBILE_HOSTLEN_IPV6: usize = 16;

#[repr(C)]
#[derive(Copy, Clone)]
/// C ABI IPv4 address representation.
pub struct mobile_addr4 {
    pub type_: mobile_addrtype,
    pub port: c_uint,
    pub host: [u8; MOBILE_HOSTLEN_IPV4],
}

#[repr(C)]
#[derive(Copy, Clone)]
/// C ABI IPv6 address representation.
pub struct mobile_addr6 {
    pub type_: mobile_addrtype,
    pub port: c_uint,
    pub host: [u8; MOBILE_HOSTLEN_IPV6],
}

#[repr(C)]
/// C ABI tagged union for IPv4/IPv6/None.
pub union mobile_addr {
    pub type_: mobile_addrtype,
    pub _addr4: mobile_addr4,
    pub _addr6: mobile_addr6,
}

/// Debug log callback.
pub type mobile_func_debug_log =
    Option<unsafe extern "C" fn(user: *mut c_void, line: *const c_char)>;
/// Serial disable callback.
pub type mobile_func_serial_disable = Option<unsafe extern "C" fn(user: *mut c_void)>;
/// Serial enable callback.
pub type mobile_func_serial_enable =
    Option<unsafe extern "C" fn(user: *mut c_void, mode_32bit: bool)>;

/// Config read callback.
pub type mobile_func_config_read = Option<
    unsafe extern "C" fn(user: *mut c_void, dest: *mut c_void, offset: usize, size: usize) -> bool,
>;
/// Config write callback.
pub type mobile_func_config_write = Option<
    unsafe extern "C" fn(user: *mut c_void, src: *const c_void, offset: usize, size: usize) -> bool,
>;

/// Timer latch callback.
pub type mobile_func_time_latch = Option<unsafe extern "C" fn(user: *mut c_void, timer: c_uint)>;
/// Timer check callback.
pub type mobile_func_time_check_ms =
    Option<unsafe extern "C" fn(user: *mut c_void, timer: c_uint, ms: c_uint) -> bool>;

/// Socket open callback.
pub type mobile_func_sock_open = Option<
    unsafe extern "C" fn(
        user: *mut c_void,
        conn: c_uint,
        socktype: mobile_socktype,
        addrtype: mobile_addrtype,
        bindport: c_uint,
    ) -> bool,
>;

/// Socket close callback.
pub type mobile_func_sock_close = Option<unsafe extern "C" fn(user: *mut c_void, conn: c_uint)>;

/// Socket connect callback.
pub type mobile_func_sock_connect = Option<
    unsafe extern "C" fn(user: *mut c_void, conn: c_uint, addr: *const mobile_addr) -> c_int,
>;

/// Socket listen callback.
pub type mobile_func_sock_listen =
    Option<unsafe extern "C" fn(user: *mut c_void, conn: c_uint) -> bool>;

/// Socket accept callback.
pub type mobile_func_sock_accept =
    Option<unsafe extern "C" fn(user: *mut c_void, conn: c_uint) -> bool>;

/// Socket send callback.
pub type mobile_func_sock_send = Option<
    unsafe extern "C" fn(
        user: *mut c_void,
        conn: c_uint,
        data: *const c_void,
        size: c_uint,
        addr: *const mobile_addr,
    ) -> c_int,
>;

/// Socket recv callback.
pub type mobile_func_sock_recv = Option<
    unsafe extern "C" fn(
        user: *mut c_void,
        conn: c_uint,
        data: *mut c_void,
        size: c_uint,
        addr: *mut mobile_addr,
    ) -> c_int,
>;

/// Phone number update callback.
pub type mobile_func_update_number = Option<
    unsafe extern "C" fn(user: *mut c_void, number_type: mobile_number, number: *const c_char),
>;

unsafe extern "C" {
    /// Registers a debug log callback.
    pub fn mobile_def_debug_log(adapter: *mut mobile_adapter, func: mobile_func_debug_log);

    /// Registers a serial disable callback.
    pub fn mobile_def_serial_disable(
        adapter: *mut mobile_adapter,
        func: mobile_func_serial_disable,
    );

    /// Registers a serial enable callback.
    pub fn mobile_def_serial_enable(adapter: *mut mobile_adapter, func: mobile_func_serial_enable);

    /// Registers a config read callback.
    pub fn mobile_def_config_read(adapter: *mut mobile_adapter, func: mobile_func_config_read);

    /// Registers a config write callback.
    pub fn mobile_def_config_write(adapter: *mut mobile_adapter, func: mobile_func_config_write);

    /// Registers a timer latch callback.
    pub fn mobile_def_time_latch(adapter: *mut mobile_adapter, func: mobile_func_time_latch);

    /// Registers a timer check callback.
    pub fn mobile_def_time_check_ms(adapter: *mut mobile_adapter, func: mobile_func_time_check_ms);

    /// Registers a socket open callback.
    pub fn mobile_def_sock_open(adapter: *mut mobile_adapter, func: mobile_func_sock_open);

    /// Registers a socket close callback.
    pub fn mobile_def_sock_close(adapter: *mut mobile_adapter, func: mobile_func_sock_close);

    /// Registers a socket connect callback.
    pub fn mobile_def_sock_connect(adapter: *mut mobile_adapter, func: mobile_func_sock_connect);

    /// Registers a socket listen callback.
    pub fn mobile_def_sock_listen(adapter: *mut mobile_adapter, func: mobile_func_sock_listen);

    /// Registers a socket accept callback.
    pub fn mobile_def_sock_accept(adapter: *mut mobile_adapter, func: mobile_func_sock_accept);

    /// Registers a socket send callback.
    pub fn mobile_def_sock_send(adapter: *mut mobile_adapter, func: mobile_func_sock_send);

    /// Registers a socket recv callback.
    pub fn mobile_def_sock_recv(adapter: *mut mobile_adapter, func: mobile_func_sock_recv);

    /// Registers a phone number update callback.
    pub fn mobile_def_update_number(adapter: *mut mobile_adapter, func: mobile_func_update_number);

    /// Loads the persisted config via the host callbacks.
    pub fn mobile_config_load(adapter: *mut mobile_adapter);

    /// Saves the persisted config via the host callbacks.
    pub fn mobile_config_save(adapter: *mut mobile_adapter);

    /// Sets the adapter device and unmetered flag.
    pub fn mobile_config_set_device(
        adapter: *mut mobile_adapter,
        device: mobile_adapter_device,
        unmetered: bool,
    );

    /// Sets DNS servers.
    pub fn mobile_config_set_dns(
        adapter: *mut mobile_adapter,
        dns1: *const mobile_addr,
        dns2: *const mobile_addr,
    );

    /// Sets the P2P port.
    pub fn mobile_config_set_p2p_port(adapter: *mut mobile_adapter, p2p_port: c_uint);

    /// Sets the relay address.
    pub fn mobile_config_set_relay(adapter: *mut mobile_adapter, relay: *const mobile_addr);

    /// Sets the relay token. A null pointer clears it.
    pub fn mobile_config_set_relay_token(adapter: *mut mobile_adapter, token: *const u8);

    /// Returns the set of actions libmobile wants processed next.
    pub fn mobile_actions_get(adapter: *mut mobile_adapter) -> mobile_action;
    /// Processes a set of actions, normally one returned by `mobile_actions_get`.
    pub fn mobile_actions_process(adapter: *mut mobile_adapter, actions: mobile_action);

    /// Transfers a single serial byte through libmobile.
    pub fn mobile_transfer(adapter: *mut mobile_adapter, c: u8) -> u8;

    /// Starts libmobile processing.
    pub fn mobile_start(adapter: *mut mobile_adapter);
    /// Stops libmobile processing.
    pub fn mobile_stop(adapter: *mut mobile_adapter);

    /// Allocates a new adapter instance.
    pub fn mobile_new(user: *mut c_void) -> *mut mobile_adapter;
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, size_of};

    #[test]
    fn addr_layout_matches_mobile_h() {
        assert_eq!(size_of::<mobile_addr4>(), 12);
        assert_eq!(size_of::<mobile_addr6>(), 24);
        assert_eq!(size_of::<mobile_addr>(), 24);
        assert_eq!(align_of::<mobile_addr>(), 4);
    }

    #[test]
    fn serial_reset_is_a_single_flag() {
        assert_eq!(MOBILE_ACTION_RESET_SERIAL.count_ones(), 1);
        assert_eq!(MOBILE_ACTION_RESET_SERIAL & MOBILE_ACTION_PROCESS_COMMAND, 0);
    }
}

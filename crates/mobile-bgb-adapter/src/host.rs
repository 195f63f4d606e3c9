use std::fmt;
use std::io;

use log::{debug, info};

use mobile_bgb_core::{ClockLatches, SharedClock};

use crate::config_store::ConfigStore;
use crate::numbers::PhoneNumbers;
use crate::poll::PollHandle;
use crate::sockets::{ConnectStatus, SockError, SocketTable};
use crate::{
    AdapterHost, MOBILE_MAX_TIMERS, MobileAddr, MobileAddrType, MobileNumber, MobileSockType,
};

type NumberSink = Box<dyn FnMut(&PhoneNumbers) + Send>;

/// The host side of the bridge: real sockets, a file-backed config blob and
/// timers driven by the emulator clock.
pub struct BridgeHost {
    sockets: SocketTable,
    config: ConfigStore,
    timers: ClockLatches<MOBILE_MAX_TIMERS>,
    numbers: PhoneNumbers,
    on_numbers: Option<NumberSink>,
}

impl fmt::Debug for BridgeHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeHost")
            .field("sockets", &self.sockets)
            .field("config", &self.config.path())
            .field("numbers", &self.numbers)
            .finish_non_exhaustive()
    }
}

impl BridgeHost {
    pub fn new(config: ConfigStore, clock: SharedClock) -> Self {
        Self {
            sockets: SocketTable::new(),
            config,
            timers: ClockLatches::new(clock),
            numbers: PhoneNumbers::new(),
            on_numbers: None,
        }
    }

    /// Calls `sink` whenever a phone number changes.
    pub fn with_number_sink(mut self, sink: impl FnMut(&PhoneNumbers) + Send + 'static) -> Self {
        self.on_numbers = Some(Box::new(sink));
        self
    }

    pub fn numbers(&self) -> &PhoneNumbers {
        &self.numbers
    }
}

impl AdapterHost for BridgeHost {
    fn update_number(&mut self, which: MobileNumber, number: Option<&str>) {
        self.numbers.update(which, number);
        info!("Mobile: {}", self.numbers);
        if let Some(sink) = self.on_numbers.as_mut() {
            sink(&self.numbers);
        }
    }

    fn config_read(&mut self, dest: &mut [u8], offset: usize) -> io::Result<()> {
        self.config.read(dest, offset)
    }

    fn config_write(&mut self, src: &[u8], offset: usize) -> io::Result<()> {
        self.config.write(src, offset)
    }

    fn time_latch(&mut self, timer: usize) {
        self.timers.latch(timer);
    }

    fn time_check_ms(&mut self, timer: usize, ms: u32) -> bool {
        self.timers.elapsed_ms(timer, ms)
    }

    fn sock_open(
        &mut self,
        conn: usize,
        socktype: MobileSockType,
        addrtype: MobileAddrType,
        bind_port: u16,
    ) -> Result<(), SockError> {
        self.sockets.open(conn, socktype, addrtype, bind_port)
    }

    fn sock_close(&mut self, conn: usize) {
        debug!("Socket: slot {conn} closed");
        self.sockets.close(conn);
    }

    fn sock_connect(&mut self, conn: usize, addr: &MobileAddr) -> Result<ConnectStatus, SockError> {
        self.sockets.connect(conn, addr)
    }

    fn sock_listen(&mut self, conn: usize) -> Result<(), SockError> {
        self.sockets.listen(conn)
    }

    fn sock_accept(&mut self, conn: usize) -> Result<bool, SockError> {
        self.sockets.accept(conn)
    }

    fn sock_send(
        &mut self,
        conn: usize,
        data: &[u8],
        addr: Option<&MobileAddr>,
    ) -> Result<usize, SockError> {
        self.sockets.send(conn, data, addr)
    }

    fn sock_recv(
        &mut self,
        conn: usize,
        data: Option<&mut [u8]>,
        addr_out: Option<&mut MobileAddr>,
    ) -> Result<usize, SockError> {
        self.sockets.recv(conn, data, addr_out)
    }

    fn poll_handles(&self, out: &mut Vec<PollHandle>) {
        self.sockets.poll_handles(out);
    }
}

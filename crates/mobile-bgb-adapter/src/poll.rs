//! Readiness waiting over raw socket handles.
//!
//! Unix uses `poll(2)`, Windows uses `WSAPoll`. Only handles that are really
//! readable are reported, so a quiet emulator link never blocks the loop.

use std::io;
use std::time::Duration;

#[cfg(unix)]
pub type PollHandle = std::os::fd::RawFd;
#[cfg(windows)]
pub type PollHandle = std::os::windows::io::RawSocket;

/// Anything owning sockets that the run loop should wake up for.
pub trait PollSources {
    fn poll_handles(&self, out: &mut Vec<PollHandle>);
}

#[cfg(unix)]
pub fn handle_of<T: std::os::fd::AsRawFd>(socket: &T) -> PollHandle {
    socket.as_raw_fd()
}

#[cfg(windows)]
pub fn handle_of<T: std::os::windows::io::AsRawSocket>(socket: &T) -> PollHandle {
    socket.as_raw_socket()
}

/// Reusable set of handles waited on for readability.
#[derive(Debug, Default)]
pub struct Poller {
    handles: Vec<PollHandle>,
    ready: Vec<bool>,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.handles.clear();
        self.ready.clear();
    }

    /// Adds a handle and returns its index for [`Poller::is_readable`].
    pub fn register(&mut self, handle: PollHandle) -> usize {
        self.handles.push(handle);
        self.handles.len() - 1
    }

    pub fn register_all<S: PollSources + ?Sized>(&mut self, sources: &S) {
        sources.poll_handles(&mut self.handles);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn is_readable(&self, index: usize) -> bool {
        self.ready.get(index).copied().unwrap_or(false)
    }

    /// Waits until a handle is readable or `timeout` elapses. Returns the
    /// number of readable handles; an interrupted wait counts as a timeout.
    pub fn wait_readable(&mut self, timeout: Duration) -> io::Result<usize> {
        self.ready.clear();
        self.ready.resize(self.handles.len(), false);
        imp::wait(&self.handles, &mut self.ready, timeout)
    }
}

/// Waits until `handle` is writable (or has a pending error).
///
/// Returns `false` on timeout.
pub fn wait_writable(handle: PollHandle, timeout: Duration) -> io::Result<bool> {
    imp::wait_writable(handle, timeout)
}

#[cfg(unix)]
mod imp {
    use super::PollHandle;
    use std::io;
    use std::time::Duration;

    fn timeout_ms(timeout: Duration) -> libc::c_int {
        timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int
    }

    fn poll(fds: &mut [libc::pollfd], timeout: Duration) -> io::Result<usize> {
        // SAFETY: `fds` is a valid, exclusively borrowed array of `fds.len()` entries.
        let rc = unsafe {
            libc::poll(
                fds.as_mut_ptr(),
                fds.len() as libc::nfds_t,
                timeout_ms(timeout),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(rc as usize)
    }

    pub fn wait(handles: &[PollHandle], ready: &mut [bool], timeout: Duration) -> io::Result<usize> {
        let mut fds: Vec<libc::pollfd> = handles
            .iter()
            .map(|&fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        if poll(&mut fds, timeout)? == 0 {
            return Ok(0);
        }

        let mut count = 0;
        for (slot, fd) in ready.iter_mut().zip(&fds) {
            // Hangups and errors must wake the reader so it can observe them.
            *slot = fd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0;
            count += *slot as usize;
        }
        Ok(count)
    }

    pub fn wait_writable(handle: PollHandle, timeout: Duration) -> io::Result<bool> {
        let mut fds = [libc::pollfd {
            fd: handle,
            events: libc::POLLOUT,
            revents: 0,
        }];
        Ok(poll(&mut fds, timeout)? > 0)
    }
}

#[cfg(windows)]
mod imp {
    use super::PollHandle;
    use std::io;
    use std::time::Duration;
    use windows_sys::Win32::Networking::WinSock::{
        POLLERR, POLLHUP, POLLRDNORM, POLLWRNORM, SOCKET, SOCKET_ERROR, WSAPOLLFD, WSAPoll,
    };

    fn timeout_ms(timeout: Duration) -> i32 {
        timeout.as_millis().min(i32::MAX as u128) as i32
    }

    fn poll(fds: &mut [WSAPOLLFD], timeout: Duration) -> io::Result<usize> {
        if fds.is_empty() {
            // WSAPoll rejects an empty set.
            std::thread::sleep(timeout);
            return Ok(0);
        }
        // SAFETY: `fds` is a valid, exclusively borrowed array of `fds.len()` entries.
        let rc = unsafe { WSAPoll(fds.as_mut_ptr(), fds.len() as u32, timeout_ms(timeout)) };
        if rc == SOCKET_ERROR {
            return Err(io::Error::last_os_error());
        }
        Ok(rc as usize)
    }

    pub fn wait(handles: &[PollHandle], ready: &mut [bool], timeout: Duration) -> io::Result<usize> {
        let mut fds: Vec<WSAPOLLFD> = handles
            .iter()
            .map(|&socket| WSAPOLLFD {
                fd: socket as SOCKET,
                events: POLLRDNORM,
                revents: 0,
            })
            .collect();

        if poll(&mut fds, timeout)? == 0 {
            return Ok(0);
        }

        let mut count = 0;
        for (slot, fd) in ready.iter_mut().zip(&fds) {
            *slot = fd.revents & (POLLRDNORM | POLLHUP | POLLERR) != 0;
            count += *slot as usize;
        }
        Ok(count)
    }

    pub fn wait_writable(handle: PollHandle, timeout: Duration) -> io::Result<bool> {
        let mut fds = [WSAPOLLFD {
            fd: handle as SOCKET,
            events: POLLWRNORM,
            revents: 0,
        }];
        Ok(poll(&mut fds, timeout)? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream, UdpSocket};

    #[test]
    fn idle_socket_times_out() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut poller = Poller::new();
        let idx = poller.register(handle_of(&socket));

        assert_eq!(poller.wait_readable(Duration::from_millis(10)).unwrap(), 0);
        assert!(!poller.is_readable(idx));
    }

    #[test]
    fn quiet_stream_is_not_readable_until_data_arrives() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let mut poller = Poller::new();
        let idx = poller.register(handle_of(&client));
        assert_eq!(poller.wait_readable(Duration::from_millis(20)).unwrap(), 0);
        assert!(!poller.is_readable(idx));

        server.write_all(&[0x68; 8]).unwrap();
        assert_eq!(poller.wait_readable(Duration::from_secs(2)).unwrap(), 1);
        assert!(poller.is_readable(idx));
    }

    #[test]
    fn only_the_readable_handle_is_flagged() {
        let quiet = UdpSocket::bind("127.0.0.1:0").unwrap();
        let busy = UdpSocket::bind("127.0.0.1:0").unwrap();
        quiet.send_to(b"x", busy.local_addr().unwrap()).unwrap();

        let mut poller = Poller::new();
        let q = poller.register(handle_of(&quiet));
        let b = poller.register(handle_of(&busy));

        assert_eq!(poller.wait_readable(Duration::from_secs(2)).unwrap(), 1);
        assert!(!poller.is_readable(q));
        assert!(poller.is_readable(b));
    }

    #[test]
    fn hangup_counts_as_readable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = listener.accept().unwrap();
        server.write_all(b"").unwrap();
        drop(server);

        let mut poller = Poller::new();
        let idx = poller.register(handle_of(&client));
        poller.wait_readable(Duration::from_secs(2)).unwrap();
        assert!(poller.is_readable(idx));
    }

    #[test]
    fn connected_stream_is_writable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        assert!(wait_writable(handle_of(&client), Duration::from_millis(100)).unwrap());
    }
}

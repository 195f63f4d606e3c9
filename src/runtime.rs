use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{error, info};
use thiserror::Error;

use mobile_bgb_adapter::{MobileError, PollSources, Poller, poll};
use mobile_bgb_core::{ActionDispatcher, LinkConfig, LinkError, LinkSession, Peripheral, SharedClock};

/// Cooperative shutdown flag, checked once per loop iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("could not connect to emulator at {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("readiness wait failed: {0}")]
    Poll(io::Error),

    #[error(transparent)]
    Mobile(#[from] MobileError),

    #[error("could not open config file: {0}")]
    Config(io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub link: LinkConfig,
    pub poll_interval: Duration,
}

/// Drives one emulator session until it fails or `cancel` is raised.
///
/// The peripheral is started after the handshake and always stopped before
/// returning.
pub fn run<P>(
    mut stream: TcpStream,
    peripheral: P,
    clock: SharedClock,
    options: &RunOptions,
    cancel: &CancelToken,
) -> Result<(), RunError>
where
    P: Peripheral + PollSources,
{
    let mut bridge = ActionDispatcher::new(peripheral, clock);

    bridge.begin_handshake();
    let result = LinkSession::handshake(&mut stream, &options.link)
        .map_err(RunError::from)
        .and_then(|mut session| {
            bridge.start();
            drive(&mut stream, &mut session, &mut bridge, options, cancel)
        });

    bridge.stop();
    let _ = stream.shutdown(Shutdown::Both);

    match &result {
        Ok(()) => info!("Bridge: session ended"),
        Err(e) => error!("Bridge: {e}"),
    }
    result
}

fn drive<P>(
    stream: &mut TcpStream,
    session: &mut LinkSession,
    bridge: &mut ActionDispatcher<P>,
    options: &RunOptions,
    cancel: &CancelToken,
) -> Result<(), RunError>
where
    P: Peripheral + PollSources,
{
    let emulator = poll::handle_of(&*stream);
    let mut poller = Poller::new();

    while !cancel.is_cancelled() {
        poller.clear();
        let link = poller.register(emulator);
        poller.register_all(bridge.peripheral());

        let timeout = if bridge.has_pending() {
            Duration::ZERO
        } else {
            options.poll_interval
        };
        poller.wait_readable(timeout).map_err(RunError::Poll)?;

        if poller.is_readable(link) {
            session.step(stream, bridge)?;
        }
        bridge.tick();
    }

    info!("Bridge: cancelled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mobile_bgb_adapter::PollHandle;
    use mobile_bgb_core::{Action, Command, LinkPacket, SessionState};
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Mutex;
    use std::thread;

    #[derive(Debug, Default)]
    struct Trace {
        started: u32,
        stopped: u32,
        received: Vec<u8>,
        processed: Vec<Action>,
    }

    struct Echo {
        trace: Arc<Mutex<Trace>>,
        actions: VecDeque<Action>,
    }

    impl Peripheral for Echo {
        fn start(&mut self) {
            self.trace.lock().unwrap().started += 1;
        }

        fn stop(&mut self) {
            self.trace.lock().unwrap().stopped += 1;
        }

        fn transfer(&mut self, byte: u8) -> u8 {
            self.trace.lock().unwrap().received.push(byte);
            byte.wrapping_add(1)
        }

        fn action_get(&mut self) -> Action {
            self.actions.pop_front().unwrap_or(Action::NONE)
        }

        fn action_process(&mut self, action: Action) {
            self.trace.lock().unwrap().processed.push(action);
        }
    }

    impl PollSources for Echo {
        fn poll_handles(&self, _out: &mut Vec<PollHandle>) {}
    }

    fn options() -> RunOptions {
        RunOptions {
            link: LinkConfig::new(0xD2),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn read_packet(stream: &mut TcpStream) -> LinkPacket {
        let mut buf = [0u8; 8];
        stream.read_exact(&mut buf).unwrap();
        LinkPacket::from_bytes(&buf)
    }

    fn write_packet(stream: &mut TcpStream, packet: LinkPacket) {
        stream.write_all(&packet.to_bytes()).unwrap();
    }

    /// Accepts the bridge, completes the immediate handshake and hands the
    /// stream to `script`.
    fn emulator(
        script: impl FnOnce(&mut TcpStream) + Send + 'static,
    ) -> (TcpStream, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let version = read_packet(&mut stream);
            assert_eq!(version, LinkPacket::version());
            write_packet(&mut stream, version);
            let status = read_packet(&mut stream);
            assert_eq!(status.kind(), Some(Command::Status));
            script(&mut stream);
        });
        (TcpStream::connect(addr).unwrap(), handle)
    }

    #[test]
    fn exchanges_bytes_and_stops_on_cancel() {
        let cancel = CancelToken::new();
        let remote_cancel = cancel.clone();
        let (stream, emu) = emulator(move |stream| {
            write_packet(stream, LinkPacket::new(Command::Sync1, 0x42, 0x81, 0, 1000));
            let reply = read_packet(stream);
            assert_eq!(reply.kind(), Some(Command::Sync2));
            assert_eq!(reply.b2, 0xD2);

            write_packet(stream, LinkPacket::new(Command::Sync1, 0x10, 0x81, 0, 1008));
            let reply = read_packet(stream);
            assert_eq!(reply.b2, 0x43);
            remote_cancel.cancel();

            // Hold the link open until the bridge hangs up.
            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).unwrap();
            assert!(rest.is_empty());
        });

        let trace = Arc::new(Mutex::new(Trace::default()));
        let peripheral = Echo {
            trace: trace.clone(),
            actions: VecDeque::from([Action::from_bits(1), Action::from_bits(2)]),
        };
        let clock = SharedClock::new();

        run(stream, peripheral, clock.clone(), &options(), &cancel).unwrap();
        emu.join().unwrap();

        let trace = trace.lock().unwrap();
        assert_eq!(trace.received, vec![0x42, 0x10]);
        assert_eq!(
            trace.processed,
            vec![Action::from_bits(1), Action::from_bits(2)]
        );
        assert_eq!((trace.started, trace.stopped), (1, 1));
        assert_eq!(clock.get(), 1008);
    }

    #[test]
    fn quiet_emulator_does_not_stall_actions_or_cancel() {
        let cancel = CancelToken::new();
        let remote_cancel = cancel.clone();
        let trace = Arc::new(Mutex::new(Trace::default()));
        let watched = trace.clone();
        let (stream, emu) = emulator(move |stream| {
            // Stay silent while the bridge works through its actions.
            for _ in 0..400 {
                if watched.lock().unwrap().processed.len() == 3 {
                    break;
                }
                thread::sleep(Duration::from_millis(5));
            }
            remote_cancel.cancel();

            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).unwrap();
            assert!(rest.is_empty());
        });

        let peripheral = Echo {
            trace: trace.clone(),
            actions: VecDeque::from([
                Action::from_bits(1),
                Action::from_bits(2),
                Action::from_bits(4),
            ]),
        };

        run(stream, peripheral, SharedClock::new(), &options(), &cancel).unwrap();
        emu.join().unwrap();

        let trace = trace.lock().unwrap();
        assert_eq!(trace.processed.len(), 3);
        assert!(trace.received.is_empty());
        assert_eq!((trace.started, trace.stopped), (1, 1));
    }

    #[test]
    fn disconnect_request_is_reported_and_stops_the_peripheral() {
        let (stream, emu) = emulator(|stream| {
            write_packet(stream, LinkPacket::new(Command::WantDisconnect, 0, 0, 0, 0));
        });

        let trace = Arc::new(Mutex::new(Trace::default()));
        let peripheral = Echo {
            trace: trace.clone(),
            actions: VecDeque::new(),
        };

        let err = run(
            stream,
            peripheral,
            SharedClock::new(),
            &options(),
            &CancelToken::new(),
        )
        .unwrap_err();
        emu.join().unwrap();

        assert!(matches!(err, RunError::Link(LinkError::PeerDisconnect(_))));
        let trace = trace.lock().unwrap();
        assert_eq!((trace.started, trace.stopped), (1, 1));
    }

    #[test]
    fn failed_handshake_never_starts_the_peripheral() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let emu = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _ = read_packet(&mut stream);
            write_packet(&mut stream, LinkPacket::new(Command::Version, 1, 2, 0, 0));
            // Nothing else may follow a rejected handshake.
            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).unwrap();
            assert!(rest.is_empty());
        });

        let trace = Arc::new(Mutex::new(Trace::default()));
        let peripheral = Echo {
            trace: trace.clone(),
            actions: VecDeque::new(),
        };
        let err = run(
            TcpStream::connect(addr).unwrap(),
            peripheral,
            SharedClock::new(),
            &options(),
            &CancelToken::new(),
        )
        .unwrap_err();
        emu.join().unwrap();

        assert!(matches!(
            err,
            RunError::Link(LinkError::HandshakeMismatch { .. })
        ));
        assert_eq!(trace.lock().unwrap().started, 0);
    }

    #[test]
    fn dispatcher_state_follows_the_session() {
        let trace = Arc::new(Mutex::new(Trace::default()));
        let mut bridge = ActionDispatcher::new(
            Echo {
                trace,
                actions: VecDeque::new(),
            },
            SharedClock::new(),
        );
        bridge.begin_handshake();
        assert_eq!(bridge.state(), SessionState::Handshaking);
        bridge.start();
        assert_eq!(bridge.state(), SessionState::Running);
        bridge.stop();
        assert_eq!(bridge.state(), SessionState::Stopped);
    }
}

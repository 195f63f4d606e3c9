//! Link protocol tests over a real TCP connection.
//!
//! The test plays the emulator: it listens, the bridge side connects, and
//! packets are exchanged exactly as an emulator in master mode would send them.
//!
//! Packets are 8 bytes: command, three payload bytes, little-endian timestamp.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use mobile_bgb_core::{
    Action, ActionDispatcher, HandshakeMode, LinkConfig, LinkError, LinkPacket, LinkSession,
    Peripheral, SessionState, SharedClock,
};

const IDLE_BYTE: u8 = 0xD2;

/// Peripheral that echoes the complement of every byte and never has work.
#[derive(Default)]
struct Loopback {
    received: Vec<u8>,
    started: bool,
}

impl Peripheral for Loopback {
    fn start(&mut self) {
        self.started = true;
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn transfer(&mut self, byte: u8) -> u8 {
        self.received.push(byte);
        !byte
    }

    fn action_get(&mut self) -> Action {
        Action::NONE
    }

    fn action_process(&mut self, _action: Action) {}
}

fn send(stream: &mut TcpStream, bytes: [u8; 8]) {
    stream.write_all(&bytes).unwrap();
}

fn recv(stream: &mut TcpStream) -> [u8; 8] {
    let mut buf = [0u8; 8];
    stream.read_exact(&mut buf).unwrap();
    buf
}

fn connect_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let bridge = TcpStream::connect(addr).unwrap();
    let (emulator, _) = listener.accept().unwrap();
    emulator
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    bridge.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    (bridge, emulator)
}

#[test]
fn handshake_then_first_transfer() {
    let (mut bridge, mut emulator) = connect_pair();

    let emu = thread::spawn(move || {
        assert_eq!(recv(&mut emulator), [1, 1, 4, 0, 0, 0, 0, 0]);
        send(&mut emulator, [1, 1, 4, 0, 0, 0, 0, 0]);
        assert_eq!(recv(&mut emulator), [108, 3, 0, 0, 0, 0, 0, 0]);

        // SYNC1 carrying 0x42 at t=1000.
        send(&mut emulator, [104, 0x42, 0, 0, 0xE8, 0x03, 0, 0]);
        let reply = recv(&mut emulator);
        assert_eq!(reply, [105, IDLE_BYTE, 0x80, 0, 0, 0, 0, 0]);

        send(&mut emulator, [104, 0x10, 0x81, 0, 0xF0, 0x03, 0, 0]);
        recv(&mut emulator)
    });

    let mut dispatcher = ActionDispatcher::new(Loopback::default(), SharedClock::new());
    dispatcher.begin_handshake();
    let mut session = LinkSession::handshake(&mut bridge, &LinkConfig::new(IDLE_BYTE)).unwrap();
    dispatcher.start();
    assert_eq!(dispatcher.state(), SessionState::Running);

    session.step(&mut bridge, &mut dispatcher).unwrap();
    assert_eq!(dispatcher.peripheral().received, vec![0x42]);
    assert_eq!(dispatcher.clock().get(), 1000);

    session.step(&mut bridge, &mut dispatcher).unwrap();
    let second_reply = emu.join().unwrap();
    assert_eq!(second_reply, [105, 0xBD, 0x80, 0, 0, 0, 0, 0]);
    assert_eq!(dispatcher.clock().get(), 1008);
}

#[test]
fn handshake_mismatch_sends_nothing_else() {
    let (mut bridge, mut emulator) = connect_pair();

    let emu = thread::spawn(move || {
        recv(&mut emulator);
        // Version 1.3.0 instead of 1.4.0.
        send(&mut emulator, [1, 1, 3, 0, 0, 0, 0, 0]);
        emulator
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut buf = [0u8; 8];
        emulator.read(&mut buf)
    });

    let err = LinkSession::handshake(&mut bridge, &LinkConfig::new(IDLE_BYTE)).unwrap_err();
    assert!(matches!(err, LinkError::HandshakeMismatch { .. }));
    drop(bridge);

    // Either the read timed out or the bridge closed the stream; no data either way.
    match emu.join().unwrap() {
        Ok(n) => assert_eq!(n, 0),
        Err(_) => {}
    }
}

#[test]
fn await_status_handshake_with_late_status() {
    let (mut bridge, mut emulator) = connect_pair();

    let emu = thread::spawn(move || {
        recv(&mut emulator);
        send(&mut emulator, [1, 1, 4, 0, 0, 0, 0, 0]);
        assert_eq!(recv(&mut emulator)[..2], [108, 0x07]);
        send(&mut emulator, [108, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(recv(&mut emulator)[..2], [108, 0x05]);

        // Any later STATUS is left unanswered; SYNC3 type 0 is echoed back.
        send(&mut emulator, [108, 0x01, 0, 0, 0, 0, 0, 0]);
        send(&mut emulator, [106, 0, 0, 0, 0x00, 0x10, 0, 0]);
        recv(&mut emulator)
    });

    let mut config = LinkConfig::new(IDLE_BYTE);
    config.handshake = HandshakeMode::AwaitStatus;
    let mut session = LinkSession::handshake(&mut bridge, &config).unwrap();
    assert!(session.status_acknowledged());

    let mut dispatcher = ActionDispatcher::new(Loopback::default(), SharedClock::new());
    session.step(&mut bridge, &mut dispatcher).unwrap();
    session.step(&mut bridge, &mut dispatcher).unwrap();

    assert_eq!(emu.join().unwrap(), [106, 0, 0, 0, 0x00, 0x10, 0, 0]);
    assert_eq!(session.clock(), 0x1000);
}

#[test]
fn emulator_hangup_is_a_transport_error() {
    let (mut bridge, mut emulator) = connect_pair();

    // Reply ahead of time; the handshake packets sit in the socket buffer.
    send(&mut emulator, [1, 1, 4, 0, 0, 0, 0, 0]);
    let mut session = LinkSession::handshake(&mut bridge, &LinkConfig::new(IDLE_BYTE)).unwrap();
    drop(emulator);

    let mut dispatcher = ActionDispatcher::new(Loopback::default(), SharedClock::new());
    let err = session.step(&mut bridge, &mut dispatcher).unwrap_err();
    assert!(matches!(err, LinkError::Transport(_)));
    assert!(!err.is_protocol_violation());
}

#[test]
fn disconnect_request_ends_the_session() {
    let (mut bridge, mut emulator) = connect_pair();

    // Reply ahead of time; the handshake packets sit in the socket buffer.
    send(&mut emulator, [1, 1, 4, 0, 0, 0, 0, 0]);
    let mut session = LinkSession::handshake(&mut bridge, &LinkConfig::new(IDLE_BYTE)).unwrap();
    send(&mut emulator, [109, 0, 0, 0, 0, 0, 0, 0]);

    let mut dispatcher = ActionDispatcher::new(Loopback::default(), SharedClock::new());
    let err = session.step(&mut bridge, &mut dispatcher).unwrap_err();
    assert!(matches!(err, LinkError::PeerDisconnect(p) if p == LinkPacket::from_bytes(&[109, 0, 0, 0, 0, 0, 0, 0])));
}

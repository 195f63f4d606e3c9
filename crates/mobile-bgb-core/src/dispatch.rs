//! Cooperative action dispatch between the link loop and the peripheral.

use log::{debug, info};

use crate::clock::SharedClock;
use crate::link::LinkHandler;
use crate::peripheral::{Action, Peripheral};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Handshaking,
    Running,
    Stopped,
}

/// Owns the peripheral and its single outstanding action.
///
/// Everything runs on the caller's thread: the link session calls into the
/// dispatcher through [`LinkHandler`] while a packet is handled, and the run
/// loop calls [`ActionDispatcher::tick`] between packets.
pub struct ActionDispatcher<P: Peripheral> {
    peripheral: P,
    clock: SharedClock,
    pending: Option<Action>,
    reset_requested: bool,
    started: bool,
    state: SessionState,
}

impl<P: Peripheral> ActionDispatcher<P> {
    pub fn new(peripheral: P, clock: SharedClock) -> Self {
        Self {
            peripheral,
            clock,
            pending: None,
            reset_requested: false,
            started: false,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn peripheral(&self) -> &P {
        &self.peripheral
    }

    pub fn peripheral_mut(&mut self) -> &mut P {
        &mut self.peripheral
    }

    pub fn pending(&self) -> Option<Action> {
        self.pending
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn reset_requested(&self) -> bool {
        self.reset_requested
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!("Bridge: session {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    pub fn begin_handshake(&mut self) {
        self.set_state(SessionState::Handshaking);
    }

    /// Starts the peripheral once the emulator accepted the handshake.
    pub fn start(&mut self) {
        if !self.started {
            self.peripheral.start();
            self.started = true;
        }
        self.set_state(SessionState::Running);
    }

    /// Stops the peripheral and drops any pending action. Idempotent.
    pub fn stop(&mut self) {
        if self.started {
            self.peripheral.stop();
            self.started = false;
        }
        self.pending = None;
        self.reset_requested = false;
        self.set_state(SessionState::Stopped);
    }

    /// Asks the peripheral for its next action unless one is already pending.
    pub fn request_next(&mut self) {
        if self.pending.is_some() {
            return;
        }
        let mask = self.peripheral.serial_reset_mask();
        let action = self.peripheral.action_get().without(mask);
        if !action.is_none() {
            self.pending = Some(action);
        }
    }

    /// Runs one iteration of dispatch. Returns the action processed, if any.
    pub fn tick(&mut self) -> Option<Action> {
        if self.state != SessionState::Running {
            return None;
        }

        if std::mem::take(&mut self.reset_requested) {
            info!("Bridge: restarting adapter session");
            self.pending = None;
            self.peripheral.stop();
            self.set_state(SessionState::Idle);
            self.peripheral.start();
            self.set_state(SessionState::Running);
        }

        self.request_next();
        let action = self.pending.take()?;
        self.peripheral.action_process(action);
        self.request_next();
        Some(action)
    }
}

impl<P: Peripheral> LinkHandler for ActionDispatcher<P> {
    fn transfer(&mut self, byte: u8) -> u8 {
        self.peripheral.transfer(byte)
    }

    fn clock_update(&mut self, timestamp: u32) {
        self.clock.set(timestamp);
    }

    fn clock_reset(&mut self, timestamp: u32) {
        self.clock.set(timestamp);
        self.reset_requested = true;
    }
}

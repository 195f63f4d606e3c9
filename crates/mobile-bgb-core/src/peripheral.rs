//! Capability interface of the emulated serial peripheral.

use std::fmt;

/// Opaque set of actions requested by a peripheral.
///
/// The peripheral owns the meaning of the bits; the dispatcher only cares
/// whether anything is set and which bits mean "serial desync reset".
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Action(u32);

impl Action {
    pub const NONE: Action = Action(0);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Returns `self` with every bit of `mask` cleared.
    pub const fn without(self, mask: Action) -> Self {
        Self(self.0 & !mask.0)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action({:#04x})", self.0)
    }
}

/// The peripheral as seen by the link loop.
///
/// `transfer` is called once per SYNC1 and must not block. Actions follow a
/// pull model: at most one is outstanding, and after processing it the
/// caller asks for the next one.
pub trait Peripheral {
    fn start(&mut self);
    fn stop(&mut self);

    /// Shifts one byte in and returns the byte to shift out on the next transfer.
    fn transfer(&mut self, byte: u8) -> u8;

    fn action_get(&mut self) -> Action;
    fn action_process(&mut self, action: Action);

    /// Bits of [`Action`] that ask for a serial resynchronization. A serial
    /// line inside an emulator cannot desync, so these are dropped.
    fn serial_reset_mask(&self) -> Action {
        Action::NONE
    }
}

impl<P: Peripheral + ?Sized> Peripheral for Box<P> {
    fn start(&mut self) {
        (**self).start();
    }

    fn stop(&mut self) {
        (**self).stop();
    }

    fn transfer(&mut self, byte: u8) -> u8 {
        (**self).transfer(byte)
    }

    fn action_get(&mut self) -> Action {
        (**self).action_get()
    }

    fn action_process(&mut self, action: Action) {
        (**self).action_process(action);
    }

    fn serial_reset_mask(&self) -> Action {
        (**self).serial_reset_mask()
    }
}

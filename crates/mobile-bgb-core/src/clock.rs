//! Emulator clock tracking.
//!
//! The emulator stamps SYNC1/SYNC3 packets with its own clock, which runs at
//! 2^21 Hz and wraps at 2^31. [`ClockFilter`] turns the raw stream of
//! timestamps into ticks and resets; [`ClockLatches`] measures elapsed time
//! against the last accepted value.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use log::warn;

use crate::packet::TIMESTAMP_MASK;

/// Ticks per second of the emulator clock.
pub const CLOCK_HZ: u64 = 1 << 21;

/// Backward movements strictly smaller than this are treated as drift.
pub const DEFAULT_DRIFT_WINDOW: u32 = 0x100;

/// Forward jumps of at least this many ticks are treated as a discontinuity.
pub const DEFAULT_RESET_THRESHOLD: u32 = 0x1000;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ClockMode {
    /// Clamp backward drift and report large forward jumps as resets.
    #[default]
    ResetAware,
    /// Only clamp backward drift, as older emulator builds expect.
    ClampOnly,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClockConfig {
    pub mode: ClockMode,
    pub drift_window: u32,
    pub reset_threshold: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            mode: ClockMode::ResetAware,
            drift_window: DEFAULT_DRIFT_WINDOW,
            reset_threshold: DEFAULT_RESET_THRESHOLD,
        }
    }
}

/// Outcome of feeding one timestamp into a [`ClockFilter`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClockEvent {
    /// Nothing changed (or the value was clamped).
    Unchanged,
    /// Time moved to the given value.
    Tick(u32),
    /// The emulator state changed underneath us (reset, savestate, new session).
    Reset(u32),
}

#[derive(Debug, Clone)]
pub struct ClockFilter {
    config: ClockConfig,
    last: u32,
    initialized: bool,
}

impl ClockFilter {
    pub fn new(config: ClockConfig) -> Self {
        Self {
            config,
            last: 0,
            initialized: false,
        }
    }

    /// Last accepted clock value.
    pub fn current(&self) -> u32 {
        self.last
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn observe(&mut self, timestamp: u32) -> ClockEvent {
        if !self.initialized {
            self.initialized = true;
            self.last = timestamp;
            return ClockEvent::Tick(timestamp);
        }

        let mut timestamp = timestamp;

        // Some emulator options (e.g. "break on ld d,d") make the clock step
        // backwards by a few ticks.
        let back = self.last.wrapping_sub(timestamp) & TIMESTAMP_MASK;
        if back != 0 && back < self.config.drift_window {
            warn!(
                "Link: emulator went back in time? old: 0x{:08X}; new: 0x{:08X}",
                self.last, timestamp
            );
            timestamp = self.last;
        }

        let forward = timestamp.wrapping_sub(self.last) & TIMESTAMP_MASK;
        let event = if self.config.mode == ClockMode::ResetAware
            && forward >= self.config.reset_threshold
        {
            ClockEvent::Reset(timestamp)
        } else if timestamp != self.last {
            ClockEvent::Tick(timestamp)
        } else {
            ClockEvent::Unchanged
        };

        self.last = timestamp;
        event
    }
}

/// Clock value shared between the link loop and the adapter's time callbacks.
#[derive(Debug, Clone, Default)]
pub struct SharedClock(Arc<AtomicU32>);

impl SharedClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: u32) {
        self.0.store(value, Ordering::Release);
    }
}

/// Converts milliseconds into emulator clock ticks.
pub fn ms_to_ticks(ms: u32) -> u64 {
    ms as u64 * CLOCK_HZ / 1000
}

/// One latch per adapter timer.
#[derive(Debug)]
pub struct ClockLatches<const N: usize> {
    clock: SharedClock,
    latches: [u32; N],
}

impl<const N: usize> ClockLatches<N> {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            latches: [0; N],
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Records the current clock for `timer`. Unknown timers are ignored.
    pub fn latch(&mut self, timer: usize) {
        let now = self.clock.get();
        if let Some(slot) = self.latches.get_mut(timer) {
            *slot = now;
        }
    }

    /// Whether at least `ms` emulated milliseconds passed since `timer` was latched.
    pub fn elapsed_ms(&self, timer: usize, ms: u32) -> bool {
        let Some(&latched) = self.latches.get(timer) else {
            return false;
        };
        let elapsed = self.clock.get().wrapping_sub(latched) & TIMESTAMP_MASK;
        elapsed as u64 >= ms_to_ticks(ms)
    }
}

//! Raw control of the ACSI bus lines.
//!
//! The ACSI port on the host side exposes an 8-bit bidirectional data bus and
//! a handful of control lines. All control lines are active low and open
//! drain: "asserting" pulls a line low, "releasing" lets it float back to the
//! pulled-up idle level.
//!
//! | Line  | Direction | Meaning                                              |
//! | ----- | --------- | ---------------------------------------------------- |
//! | `CS`  | host      | Chip select / byte strobe                            |
//! | `A1`  | host      | Low while the first byte of a command is on the bus  |
//! | `ACK` | host      | DMA acknowledge, one pulse per transferred byte      |
//! | `IRQ` | device    | Command byte request, and status ready               |
//! | `DRQ` | device    | DMA request, one pulse per transferred byte          |
//!
//! Nothing in this module knows about the protocol. The handshakes built on
//! top of it live in [`dma`] and [`crate::acsi`].

pub mod dma;
pub mod register;

use bitflags::bitflags;

bitflags! {
    /// A set of ACSI control lines.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Lines: u8 {
        const CS = 0b0000_0001;
        const A1 = 0b0000_0010;
        const ACK = 0b0000_0100;
        const IRQ = 0b0000_1000;
        const DRQ = 0b0001_0000;
    }
}

impl Lines {
    /// Lines driven by the host computer. The device only ever samples these.
    pub const HOST: Lines = Lines::CS.union(Lines::A1).union(Lines::ACK);
    /// Lines the device is allowed to drive.
    pub const DEVICE: Lines = Lines::IRQ.union(Lines::DRQ);
}

/// Hardware primitives for the bus. No operation blocks, and none can fail.
///
/// Every call is an immediate change (or sample) of the physical line state;
/// it is up to the caller to sequence them into a valid handshake.
pub trait BusSignals {
    /// Let the given device lines float back to their idle (high) level.
    fn release(&mut self, lines: Lines);

    /// Pull the given device lines low.
    fn assert(&mut self, lines: Lines);

    /// Switch the data lines to outputs and drive `value` onto them.
    fn drive_data(&mut self, value: u8);

    /// Switch the data lines back to high impedance inputs.
    fn release_data(&mut self);

    /// Sample the 8 data lines.
    fn read_data(&mut self) -> u8;

    /// Hold `line` low for roughly `cycles` core cycles, then release it.
    fn pulse(&mut self, line: Lines, cycles: u32);

    /// Sample a single line, `true` when it is asserted (low).
    fn is_asserted(&mut self, line: Lines) -> bool;

    /// Turn the activity indicator on or off.
    fn set_activity(&mut self, on: bool);

    /// Return every device line and the data lines to high impedance.
    fn release_all(&mut self) {
        self.release_data();
        self.release(Lines::DEVICE);
    }
}

/// Suspends and restores interrupt delivery on the core.
///
/// Implementations must tolerate nesting: `resume` is always called with the
/// token returned by the matching `suspend`, innermost first.
pub trait InterruptControl {
    type Token;

    fn suspend(&self) -> Self::Token;

    fn resume(&self, token: Self::Token);
}

/// Exclusive, interrupt-free access to the bus for the lifetime of the guard.
///
/// Interrupts are restored when the guard is dropped, on every exit path.
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct ExclusiveAccess<'a, C: InterruptControl> {
    control: &'a C,
    token: Option<C::Token>,
}

impl<'a, C: InterruptControl> ExclusiveAccess<'a, C> {
    pub fn new(control: &'a C) -> Self {
        let token = control.suspend();
        Self {
            control,
            token: Some(token),
        }
    }
}

impl<C: InterruptControl> Drop for ExclusiveAccess<'_, C> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.control.resume(token);
        }
    }
}

/// The hardware watchdog. If it is not fed within its reload period the whole
/// board resets.
pub trait Watchdog {
    fn feed(&mut self);
}

/// Millisecond delays, used between storage retries.
pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

/// Spin until `line` reaches the requested level. There is no timeout: a
/// peer that never answers is recovered by the watchdog resetting the board.
pub fn wait_for<B: BusSignals + ?Sized>(bus: &mut B, line: Lines, asserted: bool) {
    while bus.is_asserted(line) != asserted {
        core::hint::spin_loop();
    }
}

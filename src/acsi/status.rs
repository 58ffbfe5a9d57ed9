//! The one byte status that ends every command.

use crate::bus::{BusSignals, ExclusiveAccess, InterruptControl, Lines, wait_for};

/// Status codes sent to the host. ACSI carries no detail beyond pass/fail.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Good = 0,
    /// "CHECK CONDITION", returned for every kind of failure.
    Error = 2,
}

impl Status {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Puts `status` on the bus, raises `IRQ`, and waits for the host to strobe
/// it in with `CS`. Clears the activity indicator.
pub fn send_status<B, C>(bus: &mut B, interrupts: &C, status: Status)
where
    B: BusSignals + ?Sized,
    C: InterruptControl,
{
    bus.set_activity(false);
    let _exclusive = ExclusiveAccess::new(interrupts);
    bus.drive_data(status.code());
    bus.assert(Lines::IRQ);
    wait_for(bus, Lines::CS, true);
    wait_for(bus, Lines::CS, false);
    bus.release_all();
}

pub fn send_good<B, C>(bus: &mut B, interrupts: &C)
where
    B: BusSignals + ?Sized,
    C: InterruptControl,
{
    send_status(bus, interrupts, Status::Good);
}

pub fn send_error<B, C>(bus: &mut B, interrupts: &C)
where
    B: BusSignals + ?Sized,
    C: InterruptControl,
{
    send_status(bus, interrupts, Status::Error);
}

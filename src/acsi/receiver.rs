//! Detection and reception of a command frame addressed to this device.
//!
//! The host starts a command by putting the first byte on the data lines with
//! `A1` low and strobing `CS`. Every following byte is requested by the device
//! pulling `IRQ` low, and delivered by the host with another `CS` strobe.
//!
//! ```text
//! Idle --(A1 + CS)--> AddressMatch --(ID matches)--> ReceivingBytes --> Complete
//!   ^                      |
//!   +----(other ID)--------+
//! ```

use super::command::{CommandFrame, FRAME_LEN};
use crate::bus::{BusSignals, ExclusiveAccess, InterruptControl, Lines, wait_for};

/// Result of a single poll of the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reception {
    /// No command is being started.
    Idle,
    /// A command for another device on the bus went by.
    Ignored { device_id: u8 },
    /// A whole frame for this device has been received. The activity
    /// indicator is on and stays on until the status is sent.
    Frame(CommandFrame),
}

pub struct Receiver {
    device_id: u8,
}

impl Receiver {
    pub fn new(device_id: u8) -> Self {
        Self {
            device_id: device_id & 0x07,
        }
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    /// Samples the bus once, receiving the rest of the frame if a command for
    /// this device is starting.
    ///
    /// Callers loop on this and feed the watchdog between calls, since the
    /// bus can stay idle indefinitely.
    pub fn poll<B, C>(&self, bus: &mut B, interrupts: &C) -> Reception
    where
        B: BusSignals + ?Sized,
        C: InterruptControl,
    {
        if !(bus.is_asserted(Lines::A1) && bus.is_asserted(Lines::CS)) {
            return Reception::Idle;
        }

        let first = bus.read_data();
        let device_id = first >> 5;
        if device_id != self.device_id {
            // let the strobe of the foreign command pass
            wait_for(bus, Lines::CS, false);
            return Reception::Ignored { device_id };
        }

        bus.set_activity(true);
        let _exclusive = ExclusiveAccess::new(interrupts);
        wait_for(bus, Lines::CS, false);

        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = first;
        for byte in bytes.iter_mut().skip(1) {
            bus.assert(Lines::IRQ);
            wait_for(bus, Lines::CS, true);
            bus.release(Lines::IRQ);
            *byte = bus.read_data();
            wait_for(bus, Lines::CS, false);
        }

        Reception::Frame(CommandFrame::from_bytes(bytes))
    }
}

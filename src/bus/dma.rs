//! Byte-at-a-time DMA handshake with the host.
//!
//! Each byte is paced by one `DRQ` pulse from the device, answered by one
//! `ACK` pulse from the host's DMA chip. The host latches (or presents) the
//! data while `DRQ` is low, so the pulse widths are tuned to its DMA logic and
//! nothing may stretch the gap between pulses. Both transfers therefore run
//! with interrupts suspended.

use super::{BusSignals, ExclusiveAccess, InterruptControl, Lines, wait_for};

/// Pulse widths of the `DRQ` line, in core cycles.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PulseTiming {
    /// Device to host. Long enough for the host to latch the data lines.
    pub send: u32,
    /// Host to device. Long enough for the host to drive the data lines
    /// before the pulse ends.
    pub receive: u32,
}

impl Default for PulseTiming {
    fn default() -> Self {
        // calibrated for a 72 MHz core
        Self { send: 8, receive: 16 }
    }
}

/// Sends `buf` to the host, one byte per `DRQ` pulse.
///
/// Blocks until the host has acknowledged every byte.
pub fn send<B, C>(bus: &mut B, interrupts: &C, timing: PulseTiming, buf: &[u8])
where
    B: BusSignals + ?Sized,
    C: InterruptControl,
{
    let _exclusive = ExclusiveAccess::new(interrupts);
    for &byte in buf {
        bus.drive_data(byte);
        bus.pulse(Lines::DRQ, timing.send);
        wait_for(bus, Lines::ACK, true);
    }
    bus.release_all();
}

/// Fills `buf` from the host, one byte per `DRQ` pulse.
///
/// Blocks until the host has acknowledged every byte.
pub fn receive<B, C>(bus: &mut B, interrupts: &C, timing: PulseTiming, buf: &mut [u8])
where
    B: BusSignals + ?Sized,
    C: InterruptControl,
{
    let _exclusive = ExclusiveAccess::new(interrupts);
    bus.release_data();
    for byte in buf.iter_mut() {
        bus.pulse(Lines::DRQ, timing.receive);
        *byte = bus.read_data();
        wait_for(bus, Lines::ACK, true);
    }
    bus.release_all();
}

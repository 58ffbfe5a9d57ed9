//! The hardware binding of [`BusSignals`] onto memory-mapped GPIO ports.
//!
//! The register layout is the classic F1-style GPIO block:
//!
//! | Offset | Register | Use here                                         |
//! | ------ | -------- | ------------------------------------------------ |
//! | 0x00   | `CRL`    | unused                                           |
//! | 0x04   | `CRH`    | Data port: direction of pins 8..=15              |
//! | 0x08   | `IDR`    | Line and data sampling                           |
//! | 0x0C   | `ODR`    | unused                                           |
//! | 0x10   | `BSRR`   | Atomic set (low half) / reset (high half) writes |
//!
//! The data lines sit on pins 8..=15 of the data port so a single `CRH` write
//! flips their direction. The control lines are expected to be configured as
//! open-drain outputs (device lines) or floating inputs (host lines) during
//! board bring-up, which is outside this crate.

use super::{BusSignals, InterruptControl, Lines};

// word indices into the register block
const CRH: usize = 1; // 0x04
const IDR: usize = 2; // 0x08
const BSRR: usize = 4; // 0x10

/// Pins 8..=15 as 50 MHz push-pull outputs.
const CRH_OUTPUT: u32 = 0x3333_3333;
/// Pins 8..=15 as floating inputs.
const CRH_INPUT: u32 = 0x4444_4444;

/// First pin of the data lines on the data port.
const DATA_SHIFT: u32 = 8;

/// Pin numbers of the control lines on the control port.
#[derive(Copy, Clone, Debug)]
pub struct PinMap {
    pub cs: u8,
    pub a1: u8,
    pub ack: u8,
    pub irq: u8,
    pub drq: u8,
    /// Activity LED, lit when driven low.
    pub led: u8,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            cs: 12,
            a1: 8,
            ack: 11,
            irq: 9,
            drq: 10,
            led: 13,
        }
    }
}

impl PinMap {
    fn mask(&self, lines: Lines) -> u32 {
        let mut mask = 0;
        for (line, pin) in [
            (Lines::CS, self.cs),
            (Lines::A1, self.a1),
            (Lines::ACK, self.ack),
            (Lines::IRQ, self.irq),
            (Lines::DRQ, self.drq),
        ] {
            if lines.contains(line) {
                mask |= 1 << pin;
            }
        }
        mask
    }
}

/// ACSI bus lines bound to two GPIO register blocks.
pub struct RegisterBus {
    control: *mut u32,
    data: *mut u32,
    pins: PinMap,
}

impl RegisterBus {
    /// # Safety
    ///
    /// `control` and `data` must point to GPIO register blocks that stay
    /// mapped for the lifetime of the returned value, and nothing else may
    /// write the pins named in `pins` or the data port's pins 8..=15.
    pub unsafe fn new(control: *mut u32, data: *mut u32, pins: PinMap) -> Self {
        Self {
            control,
            data,
            pins,
        }
    }

    fn read(port: *mut u32, register: usize) -> u32 {
        // SAFETY: `new` requires the port to be a live register block, and
        // every register index used here lies inside it
        unsafe { port.add(register).read_volatile() }
    }

    fn write(port: *mut u32, register: usize, value: u32) {
        // SAFETY: see `read`
        unsafe { port.add(register).write_volatile(value) }
    }
}

/// Busy-loop for roughly `cycles` core cycles.
#[inline(always)]
pub fn spin_cycles(cycles: u32) {
    for _ in 0..cycles {
        core::hint::spin_loop();
    }
}

impl BusSignals for RegisterBus {
    fn release(&mut self, lines: Lines) {
        let mask = self.pins.mask(lines & Lines::DEVICE);
        Self::write(self.control, BSRR, mask);
    }

    fn assert(&mut self, lines: Lines) {
        let mask = self.pins.mask(lines & Lines::DEVICE);
        Self::write(self.control, BSRR, mask << 16);
    }

    fn drive_data(&mut self, value: u8) {
        let set = u32::from(value) << DATA_SHIFT;
        let reset = u32::from(!value) << DATA_SHIFT;
        // latch the level before switching direction so the bus never sees a
        // stale byte
        Self::write(self.data, BSRR, set | (reset << 16));
        Self::write(self.data, CRH, CRH_OUTPUT);
    }

    fn release_data(&mut self) {
        Self::write(self.data, CRH, CRH_INPUT);
    }

    fn read_data(&mut self) -> u8 {
        (Self::read(self.data, IDR) >> DATA_SHIFT) as u8
    }

    fn pulse(&mut self, line: Lines, cycles: u32) {
        self.assert(line);
        spin_cycles(cycles);
        self.release(line);
    }

    fn is_asserted(&mut self, line: Lines) -> bool {
        Self::read(self.control, IDR) & self.pins.mask(line) == 0
    }

    fn set_activity(&mut self, on: bool) {
        let bit = 1 << self.pins.led;
        Self::write(self.control, BSRR, if on { bit << 16 } else { bit });
    }
}

/// Interrupt masking through the platform's `critical-section` implementation.
#[derive(Default)]
pub struct CriticalSectionInterrupts;

impl InterruptControl for CriticalSectionInterrupts {
    type Token = critical_section::RestoreState;

    fn suspend(&self) -> Self::Token {
        // SAFETY: the only caller is `ExclusiveAccess`, which releases with
        // this token when it is dropped, so acquire/release stay paired and
        // nested
        unsafe { critical_section::acquire() }
    }

    fn resume(&self, token: Self::Token) {
        // SAFETY: see `suspend`
        unsafe { critical_section::release(token) }
    }
}

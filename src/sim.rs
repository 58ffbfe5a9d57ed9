//! A software stand-in for the host computer and the board around the bridge.
//!
//! [`SimulatedHost`] implements [`BusSignals`] by reacting to what the device
//! does, the way the host's ACSI DMA chip would: it strobes command bytes in
//! when `IRQ` asks for them, acknowledges every `DRQ` pulse, and strobes the
//! status byte out. Commands are scripted with [`SimulatedHost::queue`] and
//! their results collected as [`Outcome`]s.
//!
//! The rest of the module are the small collaborators a desktop run needs:
//! interrupt bookkeeping, a counting watchdog, a no-op delay and a sparse
//! in-memory card with fault injection.

use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use thiserror::Error;

use crate::acsi::command::{CommandFrame, FRAME_LEN};
use crate::bus::{BusSignals, Delay, InterruptControl, Lines, Watchdog};
use crate::storage::{BLOCK_SIZE, Block, BlockDevice};

#[derive(Default)]
struct InterruptState {
    depth: Cell<usize>,
    suspends: Cell<usize>,
}

/// Tracks interrupt suspension. Clones share the same state, so the host can
/// tell whether a pulse happened inside an exclusive section.
#[derive(Clone, Default)]
pub struct SimInterrupts {
    state: Rc<InterruptState>,
}

impl SimInterrupts {
    /// Current nesting depth, zero when interrupts are enabled.
    pub fn depth(&self) -> usize {
        self.state.depth.get()
    }

    /// Total number of suspensions so far.
    pub fn suspend_count(&self) -> usize {
        self.state.suspends.get()
    }
}

impl InterruptControl for SimInterrupts {
    type Token = ();

    fn suspend(&self) {
        self.state.depth.set(self.state.depth.get() + 1);
        self.state.suspends.set(self.state.suspends.get() + 1);
    }

    fn resume(&self, _: ()) {
        self.state.depth.set(self.state.depth.get() - 1);
    }
}

#[derive(Default)]
pub struct SimWatchdog {
    feeds: usize,
}

impl SimWatchdog {
    pub fn feeds(&self) -> usize {
        self.feeds
    }
}

impl Watchdog for SimWatchdog {
    fn feed(&mut self) {
        self.feeds += 1;
    }
}

/// Returns immediately, remembering how long it was asked to wait.
#[derive(Default)]
pub struct NoDelay {
    total_ms: u64,
}

impl NoDelay {
    pub fn total_ms(&self) -> u64 {
        self.total_ms
    }
}

impl Delay for NoDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.total_ms += u64::from(ms);
    }
}

/// The result of one scripted command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub frame: [u8; FRAME_LEN],
    /// Status byte, `None` if the device never answered the command.
    pub status: Option<u8>,
    /// Everything the device sent during the data phase.
    pub data: Vec<u8>,
    /// How many of the queued data bytes the device took.
    pub consumed: usize,
}

struct Transaction {
    frame: [u8; FRAME_LEN],
    data_out: Vec<u8>,
    consumed: usize,
    data_in: Vec<u8>,
}

impl Transaction {
    fn new(frame: [u8; FRAME_LEN], data_out: Vec<u8>) -> Self {
        Self {
            frame,
            data_out,
            consumed: 0,
            data_in: Vec::new(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    /// Nothing in flight.
    Idle,
    /// Sending the command frame. `strobe` is the state of `CS`.
    Command { next: usize, strobe: bool },
    /// Between the frame and the status: DMA transfers happen here.
    Data,
    /// `IRQ` is up with the status on the bus.
    Status { value: u8, strobed: bool },
}

pub struct SimulatedHost {
    interrupts: SimInterrupts,
    pending: VecDeque<Transaction>,
    current: Option<Transaction>,
    phase: Phase,
    outcomes: Vec<Outcome>,
    asserted: Lines,
    /// Value the device is driving onto the data lines, if any.
    device_data: Option<u8>,
    /// Value the host is presenting on the data lines.
    host_data: u8,
    ack: bool,
    activity: bool,
    pulse_widths: Vec<u32>,
    unguarded: usize,
    unlit: usize,
}

impl SimulatedHost {
    pub fn new(interrupts: &SimInterrupts) -> Self {
        Self {
            interrupts: interrupts.clone(),
            pending: VecDeque::new(),
            current: None,
            phase: Phase::Idle,
            outcomes: Vec::new(),
            asserted: Lines::empty(),
            device_data: None,
            host_data: 0xFF,
            ack: false,
            activity: false,
            pulse_widths: Vec::new(),
            unguarded: 0,
            unlit: 0,
        }
    }

    /// Schedules a command. `data_out` is what the host will hand over if the
    /// device asks for data.
    pub fn queue(&mut self, frame: CommandFrame, data_out: Vec<u8>) {
        self.pending
            .push_back(Transaction::new(*frame.as_bytes(), data_out));
    }

    /// Skips the command phase, as if a frame had just been received.
    pub fn begin_data_phase(&mut self, data_out: Vec<u8>) {
        self.current = Some(Transaction::new([0; FRAME_LEN], data_out));
        self.phase = Phase::Data;
    }

    /// `true` once every queued command has finished or been abandoned.
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.current.is_none()
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    /// Data sent by the device for the command in flight, or the last one.
    pub fn data_from_device(&self) -> &[u8] {
        match (&self.current, self.outcomes.last()) {
            (Some(current), _) => &current.data_in,
            (None, Some(last)) => &last.data,
            (None, None) => &[],
        }
    }

    pub fn activity(&self) -> bool {
        self.activity
    }

    pub fn device_driving_data(&self) -> bool {
        self.device_data.is_some()
    }

    /// Width of every `DRQ` pulse, in order.
    pub fn pulse_widths(&self) -> &[u32] {
        &self.pulse_widths
    }

    /// Handshake edges that happened with interrupts enabled.
    pub fn unguarded_pulses(&self) -> usize {
        self.unguarded
    }

    /// `DRQ` pulses that happened with the activity indicator off.
    pub fn unlit_pulses(&self) -> usize {
        self.unlit
    }

    fn check_guarded(&mut self) {
        if self.interrupts.depth() == 0 {
            self.unguarded += 1;
        }
    }

    /// Starts the next queued command if nothing is in flight.
    fn advance(&mut self) {
        if self.current.is_some() {
            return;
        }
        if let Some(next) = self.pending.pop_front() {
            self.host_data = next.frame[0];
            self.current = Some(next);
            self.phase = Phase::Command {
                next: 0,
                strobe: true,
            };
        }
    }

    fn finish(&mut self, status: Option<u8>) {
        if let Some(done) = self.current.take() {
            self.outcomes.push(Outcome {
                frame: done.frame,
                status,
                data: done.data_in,
                consumed: done.consumed,
            });
        }
        self.phase = Phase::Idle;
    }
}

impl BusSignals for SimulatedHost {
    fn release(&mut self, lines: Lines) {
        self.asserted.remove(lines);
        if let Phase::Status {
            value,
            strobed: true,
        } = self.phase
        {
            if lines.contains(Lines::IRQ) {
                self.finish(Some(value));
            }
        }
    }

    fn assert(&mut self, lines: Lines) {
        self.asserted.insert(lines & Lines::DEVICE);
        if !lines.contains(Lines::IRQ) {
            return;
        }
        self.check_guarded();
        match self.phase {
            Phase::Command {
                next,
                strobe: false,
            } if next > 0 => {
                if let Some(current) = &self.current {
                    self.host_data = current.frame[next];
                }
                self.phase = Phase::Command { next, strobe: true };
            }
            Phase::Data => {
                self.phase = Phase::Status {
                    value: self.device_data.unwrap_or(0xFF),
                    strobed: false,
                };
            }
            _ => {}
        }
    }

    fn drive_data(&mut self, value: u8) {
        self.device_data = Some(value);
    }

    fn release_data(&mut self) {
        self.device_data = None;
    }

    fn read_data(&mut self) -> u8 {
        if let Some(value) = self.device_data {
            return value;
        }
        if let Phase::Command { next, strobe: true } = self.phase {
            let value = self.host_data;
            let next = next + 1;
            self.phase = if next == FRAME_LEN {
                Phase::Data
            } else {
                Phase::Command {
                    next,
                    strobe: false,
                }
            };
            return value;
        }
        self.host_data
    }

    fn pulse(&mut self, line: Lines, cycles: u32) {
        if line != Lines::DRQ {
            return;
        }
        self.pulse_widths.push(cycles);
        self.check_guarded();
        if !self.activity {
            self.unlit += 1;
        }
        let Some(current) = self.current.as_mut() else {
            return;
        };
        match self.device_data {
            Some(value) => current.data_in.push(value),
            None => {
                self.host_data = current.data_out.get(current.consumed).copied().unwrap_or(0);
                current.consumed += 1;
            }
        }
        self.ack = true;
    }

    fn is_asserted(&mut self, line: Lines) -> bool {
        if Lines::DEVICE.contains(line) {
            return self.asserted.contains(line);
        }
        if line == Lines::ACK {
            return std::mem::take(&mut self.ack);
        }

        // an unanswered command times out on the host side
        if let Phase::Command {
            next,
            strobe: false,
        } = self.phase
        {
            if next > 0 && line == Lines::A1 && !self.asserted.contains(Lines::IRQ) {
                self.finish(None);
            }
        }
        self.advance();

        match (line, self.phase) {
            (Lines::A1, Phase::Command { next: 0, strobe }) => strobe,
            (Lines::CS, Phase::Command { strobe, .. }) => strobe,
            (Lines::CS, Phase::Status { value, strobed }) => {
                if strobed {
                    false
                } else {
                    self.phase = Phase::Status {
                        value,
                        strobed: true,
                    };
                    true
                }
            }
            _ => false,
        }
    }

    fn set_activity(&mut self, on: bool) {
        self.activity = on;
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("injected fault")]
    Injected,
    #[error("block {0} out of range")]
    OutOfRange(u32),
}

/// A sparse in-memory card. Unwritten blocks read as zero.
#[derive(Default)]
pub struct MemoryDevice {
    blocks: BTreeMap<u32, Block>,
    capacity: u32,
    init_fails: bool,
    init_calls: usize,
    failing_reads: usize,
    failing_writes: usize,
    bad_block: Option<u32>,
    reads: Vec<u32>,
    writes: Vec<u32>,
}

const ZERO_BLOCK: Block = [0; BLOCK_SIZE];

impl MemoryDevice {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn block(&self, index: u32) -> &Block {
        self.blocks.get(&index).unwrap_or(&ZERO_BLOCK)
    }

    pub fn fill_block(&mut self, index: u32, value: u8) {
        self.blocks.insert(index, [value; BLOCK_SIZE]);
    }

    pub fn set_init_fails(&mut self, fails: bool) {
        self.init_fails = fails;
    }

    pub fn fail_next_reads(&mut self, count: usize) {
        self.failing_reads = count;
    }

    pub fn fail_next_writes(&mut self, count: usize) {
        self.failing_writes = count;
    }

    /// Every read of `index` fails.
    pub fn fail_reads_of(&mut self, index: u32) {
        self.bad_block = Some(index);
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls
    }

    /// Indices of every read attempted, failed ones included.
    pub fn reads(&self) -> &[u32] {
        &self.reads
    }

    /// Indices of every write attempted, failed ones included.
    pub fn writes(&self) -> &[u32] {
        &self.writes
    }

    fn take_fault(counter: &mut usize) -> bool {
        if *counter == 0 {
            return false;
        }
        *counter -= 1;
        true
    }
}

impl BlockDevice for MemoryDevice {
    type Error = MemoryError;

    fn init(&mut self) -> Result<(), Self::Error> {
        self.init_calls += 1;
        if self.init_fails {
            return Err(MemoryError::Injected);
        }
        Ok(())
    }

    fn read_block(&mut self, index: u32, block: &mut Block) -> Result<(), Self::Error> {
        self.reads.push(index);
        if Self::take_fault(&mut self.failing_reads) || self.bad_block == Some(index) {
            return Err(MemoryError::Injected);
        }
        if index >= self.capacity {
            return Err(MemoryError::OutOfRange(index));
        }
        block.copy_from_slice(self.block(index));
        Ok(())
    }

    fn write_block(&mut self, index: u32, block: &Block) -> Result<(), Self::Error> {
        self.writes.push(index);
        if Self::take_fault(&mut self.failing_writes) {
            return Err(MemoryError::Injected);
        }
        if index >= self.capacity {
            return Err(MemoryError::OutOfRange(index));
        }
        self.blocks.insert(index, *block);
        Ok(())
    }

    fn capacity_in_blocks(&self) -> u32 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acsi::command;

    #[test]
    fn host_walks_through_a_command() {
        let interrupts = SimInterrupts::default();
        let mut host = SimulatedHost::new(&interrupts);
        host.queue(command::inquiry(0, 4), Vec::new());

        assert!(host.is_asserted(Lines::A1));
        assert!(host.is_asserted(Lines::CS));
        assert_eq!(host.read_data(), 0x12);
        assert!(!host.is_asserted(Lines::CS));

        for expected in [0, 0, 0, 4, 0] {
            host.assert(Lines::IRQ);
            assert!(host.is_asserted(Lines::CS));
            host.release(Lines::IRQ);
            assert_eq!(host.read_data(), expected);
        }

        host.drive_data(0x55);
        host.pulse(Lines::DRQ, 1);
        assert!(host.is_asserted(Lines::ACK));
        assert!(!host.is_asserted(Lines::ACK));

        host.drive_data(0);
        host.assert(Lines::IRQ);
        assert!(host.is_asserted(Lines::CS));
        assert!(!host.is_asserted(Lines::CS));
        host.release_all();

        assert!(host.is_drained());
        let outcome = &host.outcomes()[0];
        assert_eq!(outcome.status, Some(0));
        assert_eq!(outcome.data, vec![0x55]);
        // nothing above ran inside an exclusive section
        assert_eq!(host.unguarded_pulses(), 7);
    }

    #[test]
    fn memory_device_faults_are_counted() {
        let mut device = MemoryDevice::new(4);
        device.fail_next_reads(1);
        let mut block = [0u8; BLOCK_SIZE];
        assert_eq!(device.read_block(0, &mut block), Err(MemoryError::Injected));
        assert_eq!(device.read_block(0, &mut block), Ok(()));
        assert_eq!(
            device.read_block(4, &mut block),
            Err(MemoryError::OutOfRange(4))
        );
        assert_eq!(device.reads(), &[0, 0, 4]);
    }
}

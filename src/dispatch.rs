//! The command loop: receive a frame, carry it out, report a status.
//!
//! [`Bridge`] owns everything a command touches (the bus, interrupt control,
//! the card, the watchdog and the transfer buffer), so one command is
//! always fully processed before the next one is looked at.

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::acsi::command::{CommandFrame, OpCode};
use crate::acsi::receiver::{Receiver, Reception};
use crate::acsi::response;
use crate::acsi::status::{Status, send_status};
use crate::bus::dma;
use crate::bus::{BusSignals, Delay, InterruptControl, Watchdog};
use crate::config::BridgeConfig;
use crate::storage::{BLOCK_SIZE, Block, BlockDevice, Storage, StorageError};

/// Why a command failed. The host only ever sees [`Status::Error`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unsupported opcode {0:#04x}")]
    Unsupported(u8),
    #[error("unsupported mode sense page {0:#04x}")]
    UnsupportedPage(u8),
    #[error("{count} blocks from {start} exceed capacity of {capacity} blocks")]
    OutOfRange { start: u32, count: u32, capacity: u32 },
    #[error("storage not ready")]
    NotReady,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Staging area for DMA transfers and synthesized responses.
pub struct TransferBuffer {
    block: Block,
}

impl TransferBuffer {
    pub fn new() -> Self {
        Self {
            block: [0; BLOCK_SIZE],
        }
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn block_mut(&mut self) -> &mut Block {
        &mut self.block
    }
}

impl Default for TransferBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Bridge<B, C, D, W, T> {
    bus: B,
    interrupts: C,
    storage: Storage<D, T>,
    watchdog: W,
    receiver: Receiver,
    buffer: TransferBuffer,
    config: BridgeConfig,
}

impl<B, C, D, W, T> Bridge<B, C, D, W, T>
where
    B: BusSignals,
    C: InterruptControl,
    D: BlockDevice,
    W: Watchdog,
    T: Delay,
{
    /// Releases every bus line and wraps the collaborators. The card is not
    /// touched until the first command arrives.
    pub fn new(
        mut bus: B,
        interrupts: C,
        device: D,
        watchdog: W,
        delay: T,
        config: BridgeConfig,
    ) -> Self {
        bus.release_all();
        bus.set_activity(false);
        Self {
            bus,
            interrupts,
            storage: Storage::new(
                device,
                delay,
                config.storage_attempts,
                config.retry_delay_ms,
            ),
            watchdog,
            receiver: Receiver::new(config.device_id),
            buffer: TransferBuffer::new(),
            config,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn storage(&self) -> &Storage<D, T> {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut Storage<D, T> {
        &mut self.storage
    }

    pub fn watchdog(&self) -> &W {
        &self.watchdog
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Serves commands forever.
    pub fn run(&mut self) -> ! {
        loop {
            self.step();
        }
    }

    /// One iteration of the idle loop: feed the watchdog, poll the bus, and
    /// fully process a command if one arrived.
    ///
    /// Returns the status sent, if any.
    pub fn step(&mut self) -> Option<Status> {
        self.watchdog.feed();
        match self.receiver.poll(&mut self.bus, &self.interrupts) {
            Reception::Idle => None,
            Reception::Ignored { device_id } => {
                trace!(device_id, "ignoring command for another device");
                None
            }
            Reception::Frame(frame) => Some(self.dispatch(&frame)),
        }
    }

    /// Carries out `frame` and sends its status. Every path ends in exactly
    /// one status handshake.
    pub fn dispatch(&mut self, frame: &CommandFrame) -> Status {
        let status = match self.execute(frame) {
            Ok(()) => Status::Good,
            Err(error) => {
                warn!(opcode = frame.raw_opcode(), %error, "command failed");
                Status::Error
            }
        };
        send_status(&mut self.bus, &self.interrupts, status);
        status
    }

    fn execute(&mut self, frame: &CommandFrame) -> Result<(), CommandError> {
        if !self.storage.is_ready() {
            self.storage
                .initialize()
                .map_err(|_| CommandError::NotReady)?;
        }

        let opcode = frame.opcode().map_err(CommandError::Unsupported)?;
        debug!(
            ?opcode,
            block = frame.block_address(),
            length = frame.length(),
            "command"
        );

        match opcode {
            OpCode::Seek | OpCode::CorrectionPattern | OpCode::ModeSelect | OpCode::Ship => Ok(()),
            OpCode::TestUnitReady
            | OpCode::FormatDrive
            | OpCode::VerifyTrack
            | OpCode::FormatTrack => {
                self.storage.initialize()?;
                Ok(())
            }
            OpCode::RequestSense => self.request_sense(frame),
            OpCode::Read => self.read(frame),
            OpCode::Write => self.write(frame),
            OpCode::Inquiry => {
                let len = response::inquiry(
                    self.buffer.block_mut(),
                    &self.config.identification,
                    frame.length(),
                );
                self.send(len);
                Ok(())
            }
            OpCode::ModeSense => self.mode_sense(frame),
        }
    }

    fn request_sense(&mut self, frame: &CommandFrame) -> Result<(), CommandError> {
        // sense data is returned even if the card is gone, with whatever
        // capacity was last seen
        let _ = self.storage.initialize();
        let len = response::request_sense(
            self.buffer.block_mut(),
            self.storage.capacity(),
            frame.length(),
        );
        self.send(len);
        Ok(())
    }

    fn mode_sense(&mut self, frame: &CommandFrame) -> Result<(), CommandError> {
        let capacity = self.storage.capacity();
        let len = match frame.page_code() {
            0 => response::mode_page_0(self.buffer.block_mut(), capacity),
            4 => response::mode_page_4(self.buffer.block_mut(), capacity, self.config.heads),
            page => return Err(CommandError::UnsupportedPage(page)),
        };
        self.send(len);
        Ok(())
    }

    /// Block range of a read or write, checked against the card size.
    fn block_range(&self, frame: &CommandFrame) -> Result<(u32, u32), CommandError> {
        let start = frame.block_address();
        let count = u32::from(frame.length());
        let capacity = self.storage.capacity();
        if u64::from(start) + u64::from(count) > u64::from(capacity) {
            return Err(CommandError::OutOfRange {
                start,
                count,
                capacity,
            });
        }
        Ok((start, count))
    }

    fn read(&mut self, frame: &CommandFrame) -> Result<(), CommandError> {
        let (start, count) = self.block_range(frame)?;
        for index in start..start + count {
            self.watchdog.feed();
            self.storage
                .read_block(index, self.buffer.block_mut(), &mut self.watchdog)?;
            self.send(BLOCK_SIZE);
        }
        Ok(())
    }

    fn write(&mut self, frame: &CommandFrame) -> Result<(), CommandError> {
        let (start, count) = self.block_range(frame)?;
        for index in start..start + count {
            self.watchdog.feed();
            // the host sends the block whether or not it can be stored
            dma::receive(
                &mut self.bus,
                &self.interrupts,
                self.config.timing,
                self.buffer.block_mut(),
            );
            self.storage
                .write_block(index, self.buffer.block(), &mut self.watchdog)?;
        }
        Ok(())
    }

    fn send(&mut self, len: usize) {
        dma::send(
            &mut self.bus,
            &self.interrupts,
            self.config.timing,
            &self.buffer.block()[..len],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acsi::command;
    use crate::sim::{MemoryDevice, NoDelay, SimInterrupts, SimWatchdog, SimulatedHost};

    type TestBridge = Bridge<SimulatedHost, SimInterrupts, MemoryDevice, SimWatchdog, NoDelay>;

    fn bridge(device: MemoryDevice) -> TestBridge {
        let interrupts = SimInterrupts::default();
        let host = SimulatedHost::new(&interrupts);
        Bridge::new(
            host,
            interrupts,
            device,
            SimWatchdog::default(),
            NoDelay::default(),
            BridgeConfig::default(),
        )
    }

    /// Queues `frame` and steps the bridge until the host has an outcome.
    fn run(bridge: &mut TestBridge, frame: CommandFrame, data_out: Vec<u8>) -> Option<u8> {
        let before = bridge.bus().outcomes().len();
        bridge.bus_mut().queue(frame, data_out);
        while !bridge.bus().is_drained() {
            bridge.step();
        }
        let outcomes = bridge.bus().outcomes();
        assert_eq!(outcomes.len(), before + 1);
        outcomes[before].status
    }

    fn last_data(bridge: &TestBridge) -> &[u8] {
        &bridge.bus().outcomes().last().unwrap().data
    }

    #[test]
    fn no_op_commands_touch_nothing() {
        let mut bridge = bridge(MemoryDevice::new(100));
        bridge.storage_mut().initialize().unwrap();
        for opcode in [
            OpCode::Seek,
            OpCode::CorrectionPattern,
            OpCode::ModeSelect,
            OpCode::Ship,
        ] {
            let frame = CommandFrame::new(0, opcode as u8, 0xFF_FFFF, 0xFF);
            assert_eq!(run(&mut bridge, frame, Vec::new()), Some(0));
            assert!(last_data(&bridge).is_empty());
        }
        let device = bridge.storage().device();
        assert_eq!(device.init_calls(), 1);
        assert!(device.reads().is_empty());
        assert!(device.writes().is_empty());
    }

    #[test]
    fn unknown_opcode_fails_without_transfer() {
        let mut bridge = bridge(MemoryDevice::new(100));
        let frame = CommandFrame::new(0, 0x1F, 0, 16);
        assert_eq!(run(&mut bridge, frame, Vec::new()), Some(2));
        assert!(last_data(&bridge).is_empty());
    }

    #[test]
    fn not_ready_fails_every_command() {
        let mut device = MemoryDevice::new(100);
        device.set_init_fails(true);
        let mut bridge = bridge(device);
        assert_eq!(run(&mut bridge, command::inquiry(0, 36), Vec::new()), Some(2));
        assert_eq!(run(&mut bridge, command::read(0, 0, 1), Vec::new()), Some(2));
        assert!(bridge.bus().outcomes().iter().all(|o| o.data.is_empty()));
        assert!(bridge.storage().device().reads().is_empty());
    }

    #[test]
    fn first_command_initializes_storage() {
        let mut bridge = bridge(MemoryDevice::new(100));
        assert!(!bridge.storage().is_ready());
        assert_eq!(run(&mut bridge, command::mode_sense(0, 0), Vec::new()), Some(0));
        assert!(bridge.storage().is_ready());
        assert_eq!(bridge.storage().device().init_calls(), 1);
    }

    #[test]
    fn test_unit_ready_reprobes() {
        let mut bridge = bridge(MemoryDevice::new(100));
        for opcode in [
            OpCode::TestUnitReady,
            OpCode::FormatDrive,
            OpCode::VerifyTrack,
            OpCode::FormatTrack,
        ] {
            let frame = CommandFrame::new(0, opcode as u8, 0, 0);
            assert_eq!(run(&mut bridge, frame, Vec::new()), Some(0));
        }
        // first command initializes twice: once for not-ready, once forced
        assert_eq!(bridge.storage().device().init_calls(), 5);

        bridge.storage_mut().device_mut().set_init_fails(true);
        assert_eq!(
            run(&mut bridge, command::test_unit_ready(0), Vec::new()),
            Some(2)
        );
        assert!(!bridge.storage().is_ready());
    }

    #[test]
    fn inquiry_returns_identification() {
        let mut bridge = bridge(MemoryDevice::new(100));
        assert_eq!(run(&mut bridge, command::inquiry(0, 31), Vec::new()), Some(0));
        let mut expected = [0u8; 64];
        response::inquiry(&mut expected, &bridge.config().identification, 31);
        assert_eq!(last_data(&bridge), &expected[..31]);
        assert_eq!(&last_data(&bridge)[8..16], b"ACSI2SD ");
    }

    #[test]
    fn inquiry_pads_to_requested_length() {
        let mut bridge = bridge(MemoryDevice::new(100));
        assert_eq!(run(&mut bridge, command::inquiry(0, 40), Vec::new()), Some(0));
        let data = last_data(&bridge);
        assert_eq!(data.len(), 40);
        assert_eq!(&data[32..36], b"0100");
        assert_eq!(&data[36..], &[0, 0, 0, 0]);
    }

    #[test]
    fn request_sense_reports_capacity() {
        let mut bridge = bridge(MemoryDevice::new(0x01_0203));
        assert_eq!(
            run(&mut bridge, command::request_sense(0, 6), Vec::new()),
            Some(0)
        );
        assert_eq!(last_data(&bridge), &[0x80, 0x01, 0x02, 0x03, 0, 0]);
    }

    #[test]
    fn mode_sense_page_0() {
        let mut bridge = bridge(MemoryDevice::new(0x001E_8480));
        assert_eq!(run(&mut bridge, command::mode_sense(0, 0), Vec::new()), Some(0));
        let data = last_data(&bridge);
        assert_eq!(data.len(), 16);
        assert_eq!(&data[5..8], &[0x1E, 0x84, 0x80]);
    }

    #[test]
    fn mode_sense_page_4() {
        let mut bridge = bridge(MemoryDevice::new(0x001E_8480));
        assert_eq!(run(&mut bridge, command::mode_sense(0, 4), Vec::new()), Some(0));
        let data = last_data(&bridge);
        assert_eq!(data.len(), 24);
        // 2_000_000 blocks / 128 heads = 15625 cylinders
        assert_eq!(&data[..6], &[0x04, 0x16, 0x00, 0x3D, 0x09, 0x80]);
    }

    #[test]
    fn mode_sense_other_page_fails() {
        let mut bridge = bridge(MemoryDevice::new(100));
        assert_eq!(run(&mut bridge, command::mode_sense(0, 3), Vec::new()), Some(2));
        assert!(last_data(&bridge).is_empty());
    }

    #[test]
    fn mode_sense_page_control_bits_fail() {
        let mut bridge = bridge(MemoryDevice::new(100));
        // page 0 with the "changeable values" page control bits set
        let frame = CommandFrame::from_bytes([0x1A, 0, 0x40, 0, 0, 0]);
        assert_eq!(run(&mut bridge, frame, Vec::new()), Some(2));
        assert!(last_data(&bridge).is_empty());
    }

    #[test]
    fn activity_stays_lit_through_transfers() {
        let mut bridge = bridge(MemoryDevice::new(100));
        assert_eq!(run(&mut bridge, command::read(0, 4, 3), Vec::new()), Some(0));
        let payload = vec![0x5A; 2 * BLOCK_SIZE];
        assert_eq!(run(&mut bridge, command::write(0, 8, 2), payload), Some(0));
        assert_eq!(run(&mut bridge, command::inquiry(0, 36), Vec::new()), Some(0));

        assert_eq!(bridge.bus().pulse_widths().len(), 5 * BLOCK_SIZE + 36);
        assert_eq!(bridge.bus().unlit_pulses(), 0);
        assert!(!bridge.bus().activity());
    }

    #[test]
    fn read_sends_requested_blocks() {
        let mut device = MemoryDevice::new(100);
        device.fill_block(10, 0xAA);
        device.fill_block(11, 0xBB);
        let mut bridge = bridge(device);

        assert_eq!(run(&mut bridge, command::read(0, 10, 2), Vec::new()), Some(0));

        assert_eq!(bridge.storage().device().reads(), &[10, 11]);
        let data = last_data(&bridge);
        assert_eq!(data.len(), 2 * BLOCK_SIZE);
        assert!(data[..BLOCK_SIZE].iter().all(|&b| b == 0xAA));
        assert!(data[BLOCK_SIZE..].iter().all(|&b| b == 0xBB));
        assert_eq!(bridge.bus().unguarded_pulses(), 0);
        assert!(!bridge.bus().activity());
    }

    #[test]
    fn read_past_capacity_is_rejected() {
        let mut bridge = bridge(MemoryDevice::new(100));
        assert_eq!(run(&mut bridge, command::read(0, 99, 5), Vec::new()), Some(2));
        assert!(bridge.storage().device().reads().is_empty());
        assert!(last_data(&bridge).is_empty());
    }

    #[test]
    fn range_check_boundaries() {
        let mut bridge = bridge(MemoryDevice::new(100));
        assert_eq!(run(&mut bridge, command::read(0, 99, 1), Vec::new()), Some(0));
        assert_eq!(run(&mut bridge, command::read(0, 100, 1), Vec::new()), Some(2));
        assert_eq!(run(&mut bridge, command::write(0, 98, 3), vec![0; 3 * BLOCK_SIZE]), Some(2));
        assert_eq!(bridge.storage().device().reads(), &[99]);
        assert!(bridge.storage().device().writes().is_empty());
    }

    #[test]
    fn zero_count_transfers_nothing() {
        let mut bridge = bridge(MemoryDevice::new(100));
        assert_eq!(run(&mut bridge, command::read(0, 5, 0), Vec::new()), Some(0));
        assert!(last_data(&bridge).is_empty());
        assert!(bridge.storage().device().reads().is_empty());
    }

    #[test]
    fn read_failure_keeps_earlier_blocks() {
        let mut device = MemoryDevice::new(100);
        device.fail_reads_of(21);
        let mut bridge = bridge(device);

        assert_eq!(run(&mut bridge, command::read(0, 20, 3), Vec::new()), Some(2));

        // block 20 made it out, block 22 was never attempted
        assert_eq!(last_data(&bridge).len(), BLOCK_SIZE);
        let reads = bridge.storage().device().reads();
        assert_eq!(reads[0], 20);
        assert!(reads[1..].iter().all(|&i| i == 21));
        assert!(!bridge.storage().is_ready());
    }

    #[test]
    fn write_stores_host_data() {
        let mut bridge = bridge(MemoryDevice::new(100));
        let mut payload = vec![0x11; BLOCK_SIZE];
        payload.extend(std::iter::repeat_n(0x22, BLOCK_SIZE));

        assert_eq!(run(&mut bridge, command::write(0, 40, 2), payload), Some(0));

        let device = bridge.storage().device();
        assert_eq!(device.writes(), &[40, 41]);
        assert!(device.block(40).iter().all(|&b| b == 0x11));
        assert!(device.block(41).iter().all(|&b| b == 0x22));
        assert_eq!(bridge.bus().outcomes().last().unwrap().consumed, 2 * BLOCK_SIZE);
    }

    #[test]
    fn write_failure_still_consumes_block() {
        let mut device = MemoryDevice::new(100);
        device.fail_next_writes(usize::MAX);
        let mut bridge = bridge(device);

        let payload = vec![0x33; 2 * BLOCK_SIZE];
        assert_eq!(run(&mut bridge, command::write(0, 0, 2), payload), Some(2));

        // the first block was taken off the bus before the write failed
        assert_eq!(bridge.bus().outcomes().last().unwrap().consumed, BLOCK_SIZE);
        assert!(bridge.storage().device().writes().iter().all(|&i| i == 0));
    }

    #[test]
    fn watchdog_fed_per_block() {
        let mut bridge = bridge(MemoryDevice::new(100));
        bridge.storage_mut().initialize().unwrap();
        bridge.bus_mut().queue(command::read(0, 0, 4), Vec::new());
        let before = bridge.watchdog().feeds();
        assert_eq!(bridge.step(), Some(Status::Good));
        // one for the poll, one per block
        assert_eq!(bridge.watchdog().feeds() - before, 5);
    }

    #[test]
    fn foreign_frames_never_dispatch() {
        let mut bridge = bridge(MemoryDevice::new(100));
        bridge.bus_mut().queue(command::read(3, 0, 1), Vec::new());
        bridge.bus_mut().queue(command::test_unit_ready(0), Vec::new());

        let mut statuses = Vec::new();
        while !bridge.bus().is_drained() {
            statuses.extend(bridge.step());
        }

        assert_eq!(statuses, vec![Status::Good]);
        let outcomes = bridge.bus().outcomes();
        assert_eq!(outcomes[0].status, None);
        assert_eq!(outcomes[1].status, Some(0));
        assert!(bridge.storage().device().reads().is_empty());
    }

    #[test]
    fn idle_polling_feeds_watchdog() {
        let mut bridge = bridge(MemoryDevice::new(100));
        for _ in 0..10 {
            assert_eq!(bridge.step(), None);
        }
        assert_eq!(bridge.watchdog().feeds(), 10);
        assert_eq!(bridge.storage().device().init_calls(), 0);
    }
}

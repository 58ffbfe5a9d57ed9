//! Block access to the SD card, with retry and recovery.
//!
//! Removable media fail in transient ways (contact bounce, a dip in the
//! supply while the card is busy), so a failed block operation is retried a
//! bounded number of times. Once half of the attempts are used up the card is
//! reinitialized once; if that fails too the operation is abandoned.

pub mod image;

use std::fmt::Debug;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bus::{Delay, Watchdog};

/// Every transfer moves whole 512 byte blocks.
pub const BLOCK_SIZE: usize = 512;

pub type Block = [u8; BLOCK_SIZE];

/// The card driver underneath the bridge.
pub trait BlockDevice {
    type Error: Debug;

    /// (Re)initializes the card. Safe to call at any time.
    fn init(&mut self) -> Result<(), Self::Error>;

    fn read_block(&mut self, index: u32, block: &mut Block) -> Result<(), Self::Error>;

    fn write_block(&mut self, index: u32, block: &Block) -> Result<(), Self::Error>;

    /// Size of the card, valid after a successful `init`.
    fn capacity_in_blocks(&self) -> u32;
}

/// What is known about the card right now.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub ready: bool,
    pub capacity: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage device failed to initialize")]
    NotReady,
    #[error("block {index} failed after {attempts} attempts")]
    Exhausted { index: u32, attempts: u32 },
    #[error("storage device failed to reinitialize while retrying block {index}")]
    ReinitFailed { index: u32 },
}

pub struct Storage<D, T> {
    device: D,
    delay: T,
    state: DeviceState,
    attempts: u32,
    retry_delay_ms: u32,
}

impl<D: BlockDevice, T: Delay> Storage<D, T> {
    /// Wraps `device`. It is considered not ready until [`Self::initialize`]
    /// succeeds.
    pub fn new(device: D, delay: T, attempts: u32, retry_delay_ms: u32) -> Self {
        Self {
            device,
            delay,
            state: DeviceState::default(),
            attempts: attempts.max(1),
            retry_delay_ms,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state.ready
    }

    pub fn capacity(&self) -> u32 {
        self.state.capacity
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Probes the card and refreshes the recorded capacity.
    ///
    /// The card is probed every time, even if it is already marked ready.
    pub fn initialize(&mut self) -> Result<u32, StorageError> {
        match self.device.init() {
            Ok(()) => {
                let capacity = self.device.capacity_in_blocks();
                if !self.state.ready || self.state.capacity != capacity {
                    info!(capacity, "storage ready");
                }
                self.state = DeviceState {
                    ready: true,
                    capacity,
                };
                Ok(capacity)
            }
            Err(error) => {
                warn!(?error, "storage initialization failed");
                self.state.ready = false;
                Err(StorageError::NotReady)
            }
        }
    }

    pub fn read_block<W>(
        &mut self,
        index: u32,
        block: &mut Block,
        watchdog: &mut W,
    ) -> Result<(), StorageError>
    where
        W: Watchdog + ?Sized,
    {
        self.with_retry(index, watchdog, |device| device.read_block(index, block))
    }

    pub fn write_block<W>(
        &mut self,
        index: u32,
        block: &Block,
        watchdog: &mut W,
    ) -> Result<(), StorageError>
    where
        W: Watchdog + ?Sized,
    {
        self.with_retry(index, watchdog, |device| device.write_block(index, block))
    }

    fn with_retry<W, F>(
        &mut self,
        index: u32,
        watchdog: &mut W,
        mut op: F,
    ) -> Result<(), StorageError>
    where
        W: Watchdog + ?Sized,
        F: FnMut(&mut D) -> Result<(), D::Error>,
    {
        let reinit_threshold = self.attempts / 2;
        let mut reinitialized = false;

        for attempt in 1..=self.attempts {
            match op(&mut self.device) {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(index, attempt, "block operation recovered");
                    }
                    return Ok(());
                }
                Err(error) => warn!(index, attempt, ?error, "block operation failed"),
            }

            let remaining = self.attempts - attempt;
            if remaining == 0 {
                break;
            }

            // a full retry can outlast the watchdog period
            self.delay.delay_ms(self.retry_delay_ms);
            watchdog.feed();

            if remaining <= reinit_threshold && !reinitialized {
                reinitialized = true;
                if self.initialize().is_err() {
                    return Err(StorageError::ReinitFailed { index });
                }
            }
        }

        self.state.ready = false;
        Err(StorageError::Exhausted {
            index,
            attempts: self.attempts,
        })
    }
}

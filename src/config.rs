//! Tunables of the bridge.

use crate::bus::dma::PulseTiming;

/// Vendor, product and revision strings reported by INQUIRY. The field
/// lengths are fixed by the INQUIRY layout; pad with spaces.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Identification {
    pub vendor: [u8; 8],
    pub product: [u8; 16],
    pub revision: [u8; 4],
}

impl Default for Identification {
    fn default() -> Self {
        Self {
            vendor: *b"ACSI2SD ",
            product: *b"SD CARD BRIDGE  ",
            revision: *b"0100",
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct BridgeConfig {
    /// ACSI device ID this bridge answers to, 0..=7.
    pub device_id: u8,
    /// Attempts per block before a storage operation is given up.
    pub storage_attempts: u32,
    /// Pause between storage attempts, in milliseconds.
    pub retry_delay_ms: u32,
    pub timing: PulseTiming,
    /// Heads reported in the geometry mode page.
    pub heads: u8,
    pub identification: Identification,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            storage_attempts: 5,
            retry_delay_ms: 10,
            timing: PulseTiming::default(),
            heads: 128,
            identification: Identification::default(),
        }
    }
}

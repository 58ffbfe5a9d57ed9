//! An SD card on the Atari ACSI bus.
//!
//! The bridge answers ACSI commands for one device ID, turning them into
//! 512 byte block reads and writes on a card. Everything timing critical
//! (command reception, the DMA handshake, the status handshake) runs with
//! interrupts suspended; everything that may legitimately take long feeds
//! the watchdog.
//!
//! - [`bus`]: line primitives, the DMA handshake and the hardware binding
//! - [`acsi`]: command frames, reception, status and synthesized responses
//! - [`storage`]: the card, with retry and reinitialization
//! - [`dispatch`]: the [`Bridge`] that ties them together
//! - [`sim`]: a simulated host and card for tests and desktop runs

pub mod acsi;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod sim;
pub mod storage;

pub use config::BridgeConfig;
pub use dispatch::{Bridge, CommandError};

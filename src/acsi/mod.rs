//! The ACSI side of the bridge: command reception, the status handshake, and
//! the command set's synthesized responses.
//!
//! ACSI is the Atari hard disk interface. It is a thin relative of SCSI: the
//! same group 0 commands, but a fixed 6 byte command frame, a single status
//! byte and no message phase. Useful references:
//! - Atari ACSI/DMA Integration Guide (1986)
//! - SCSI Primary Commands – 2 (SPC-2), for the INQUIRY and MODE SENSE layouts:
//!   <https://www.rockbox.org/wiki/pub/Main/DataSheets/spc2r20.pdf>

pub mod command;
pub mod receiver;
pub mod response;
pub mod status;

pub use command::{CommandFrame, OpCode};
pub use receiver::{Receiver, Reception};
pub use status::Status;

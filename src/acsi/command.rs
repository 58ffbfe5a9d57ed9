//! The 6 byte ACSI command frame.
//!
//! ACSI commands are a subset of SCSI group 0 commands, with the top three
//! bits of the first byte reused as the target device ID:
//!
//! | Byte | Bits  | Content                                           |
//! | ---- | ----- | ------------------------------------------------- |
//! | 0    | 7:5   | Device ID, filtered at reception                  |
//! | 0    | 4:0   | Operation code                                    |
//! | 1..4 |       | 24-bit big endian block address                   |
//! | 4    |       | Block count or allocation length                  |
//! | 5    |       | Control byte, ignored                             |
//!
//! The free functions at the bottom build frames the way the host computer
//! would, and are used to script the simulated host.

/// Every ACSI command is exactly 6 bytes long.
pub const FRAME_LEN: usize = 6;

/// Operation codes understood by the dispatcher.
///
/// These are the 5-bit codes of the Atari ACSI command set, which are the
/// SCSI group 0 opcodes with the same value.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpCode {
    TestUnitReady = 0x00,
    RequestSense = 0x03,
    FormatDrive = 0x04,
    VerifyTrack = 0x05,
    FormatTrack = 0x06,
    Read = 0x08,
    Write = 0x0A,
    Seek = 0x0B,
    /// Set error correction pattern
    CorrectionPattern = 0x0D,
    Inquiry = 0x12,
    ModeSelect = 0x15,
    ModeSense = 0x1A,
    /// Park the heads before power off
    Ship = 0x1B,
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => OpCode::TestUnitReady,
            0x03 => OpCode::RequestSense,
            0x04 => OpCode::FormatDrive,
            0x05 => OpCode::VerifyTrack,
            0x06 => OpCode::FormatTrack,
            0x08 => OpCode::Read,
            0x0A => OpCode::Write,
            0x0B => OpCode::Seek,
            0x0D => OpCode::CorrectionPattern,
            0x12 => OpCode::Inquiry,
            0x15 => OpCode::ModeSelect,
            0x1A => OpCode::ModeSense,
            0x1B => OpCode::Ship,
            other => return Err(other),
        })
    }
}

/// A received command, exactly as it came over the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CommandFrame {
    bytes: [u8; FRAME_LEN],
}

impl CommandFrame {
    pub fn from_bytes(bytes: [u8; FRAME_LEN]) -> Self {
        Self { bytes }
    }

    /// Packs the fields of a frame. Only the low 3 bits of `device_id` and
    /// the low 24 bits of `block_address` are kept.
    pub fn new(device_id: u8, opcode: u8, block_address: u32, length: u8) -> Self {
        let [_, high, mid, low] = block_address.to_be_bytes();
        Self {
            bytes: [
                ((device_id & 0x07) << 5) | (opcode & 0x1F),
                high,
                mid,
                low,
                length,
                0,
            ],
        }
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    /// Target device ID from bits 7:5 of the first byte.
    pub fn device_id(&self) -> u8 {
        self.bytes[0] >> 5
    }

    /// The raw 5-bit operation code.
    pub fn raw_opcode(&self) -> u8 {
        self.bytes[0] & 0x1F
    }

    /// The decoded operation code, or the raw value if it is not supported.
    pub fn opcode(&self) -> Result<OpCode, u8> {
        OpCode::try_from(self.raw_opcode())
    }

    /// 24-bit big endian block address from bytes 1..=3.
    pub fn block_address(&self) -> u32 {
        u32::from_be_bytes([0, self.bytes[1], self.bytes[2], self.bytes[3]])
    }

    /// Block count for reads and writes, allocation length for everything
    /// that returns data.
    pub fn length(&self) -> u8 {
        self.bytes[4]
    }

    /// Mode sense page selector, the whole of byte 2. Page control bits
    /// (7:6) are not supported, so a non-zero value there never matches a
    /// known page.
    pub fn page_code(&self) -> u8 {
        self.bytes[2]
    }
}

/// "TEST UNIT READY": succeeds when the medium is usable.
pub fn test_unit_ready(device_id: u8) -> CommandFrame {
    CommandFrame::new(device_id, OpCode::TestUnitReady as u8, 0, 0)
}

/// "REQUEST SENSE", returning `length` bytes of sense data.
pub fn request_sense(device_id: u8, length: u8) -> CommandFrame {
    CommandFrame::new(device_id, OpCode::RequestSense as u8, 0, length)
}

/// "READ": `count` blocks starting at `block`.
pub fn read(device_id: u8, block: u32, count: u8) -> CommandFrame {
    CommandFrame::new(device_id, OpCode::Read as u8, block, count)
}

/// "WRITE": `count` blocks starting at `block`.
pub fn write(device_id: u8, block: u32, count: u8) -> CommandFrame {
    CommandFrame::new(device_id, OpCode::Write as u8, block, count)
}

/// "INQUIRY", returning `length` bytes of identification data.
pub fn inquiry(device_id: u8, length: u8) -> CommandFrame {
    CommandFrame::new(device_id, OpCode::Inquiry as u8, 0, length)
}

/// "MODE SENSE" for a single page. The page code travels in byte 2.
pub fn mode_sense(device_id: u8, page: u8) -> CommandFrame {
    CommandFrame::new(device_id, OpCode::ModeSense as u8, u32::from(page & 0x3F) << 8, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_decode_from_wire_bytes() {
        let frame = CommandFrame::from_bytes([0b011_01000, 0x12, 0x34, 0x56, 0x02, 0xFF]);
        assert_eq!(frame.device_id(), 3);
        assert_eq!(frame.opcode(), Ok(OpCode::Read));
        assert_eq!(frame.block_address(), 0x12_3456);
        assert_eq!(frame.length(), 2);
    }

    #[test]
    fn new_masks_out_of_range_fields() {
        let frame = CommandFrame::new(0xFF, 0xFF, 0xAABB_CCDD, 9);
        assert_eq!(frame.as_bytes(), &[0xFF, 0xBB, 0xCC, 0xDD, 9, 0]);
        assert_eq!(frame.device_id(), 7);
        assert_eq!(frame.block_address(), 0xBB_CCDD);
    }

    #[test]
    fn unknown_opcode_is_reported_raw() {
        let frame = CommandFrame::new(0, 0x1F, 0, 0);
        assert_eq!(frame.opcode(), Err(0x1F));
    }

    #[test]
    fn mode_sense_page_in_byte_two() {
        let frame = mode_sense(1, 4);
        assert_eq!(frame.as_bytes()[2], 4);
        assert_eq!(frame.page_code(), 4);
        assert_eq!(frame.opcode(), Ok(OpCode::ModeSense));
    }

    #[test]
    fn page_code_keeps_page_control_bits() {
        let frame = CommandFrame::from_bytes([0x1A, 0, 0x44, 0, 0, 0]);
        assert_eq!(frame.page_code(), 0x44);
    }

    #[test]
    fn every_opcode_round_trips_through_its_discriminant() {
        for op in [
            OpCode::TestUnitReady,
            OpCode::RequestSense,
            OpCode::FormatDrive,
            OpCode::VerifyTrack,
            OpCode::FormatTrack,
            OpCode::Read,
            OpCode::Write,
            OpCode::Seek,
            OpCode::CorrectionPattern,
            OpCode::Inquiry,
            OpCode::ModeSelect,
            OpCode::ModeSense,
            OpCode::Ship,
        ] {
            assert_eq!(OpCode::try_from(op as u8), Ok(op));
        }
    }
}

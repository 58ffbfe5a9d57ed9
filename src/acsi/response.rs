//! Data returned by the commands that do not touch the medium.
//!
//! Every builder writes into the start of the caller's buffer and returns the
//! number of bytes that should be sent to the host.

use crate::config::Identification;

/// Bytes 0..=4 of the standard inquiry data, followed by the 31 bytes the
/// additional length announces.
pub const INQUIRY_LEN: usize = 36;

/// Length of the mode sense page 0 (block descriptor) response.
pub const MODE_PAGE_0_LEN: usize = 16;

/// Length of the mode sense page 4 (rigid disk geometry) response.
pub const MODE_PAGE_4_LEN: usize = 24;

/// Sense byte 0 as sent by this device.
pub const SENSE_FLAGS: u8 = 0x80;

/// Standard INQUIRY data for a direct access device.
///
/// See SPC-2 7.3.2, table 46. Only the fields up to the revision level are
/// filled in.
#[repr(C)]
pub struct Inquiry {
    /// PERIPHERAL QUALIFIER (7:5) and PERIPHERAL DEVICE TYPE (4:0), zero for
    /// a connected direct access device.
    pub peripheral_info: u8,
    /// RMB and DEVICE TYPE QUALIFIER
    pub device_qualifier: u8,
    pub version: u8,
    _reserved: u8,
    /// Number of bytes following this one.
    pub additional_length: u8,
    _vendor_specific: [u8; 3],
    pub vendor: [u8; 8],
    pub product: [u8; 16],
    pub revision: [u8; 4],
}

impl Inquiry {
    pub fn new(id: &Identification) -> Self {
        const {
            assert!(
                std::mem::size_of::<Inquiry>() == INQUIRY_LEN,
                "Inquiry not 36 bytes in size"
            );
        };
        Self {
            peripheral_info: 0,
            device_qualifier: 0,
            version: 1,
            _reserved: 0,
            additional_length: (INQUIRY_LEN - 5) as u8,
            _vendor_specific: [0; 3],
            vendor: id.vendor,
            product: id.product,
            revision: id.revision,
        }
    }

    pub fn to_bytes(&self) -> [u8; INQUIRY_LEN] {
        let mut out = [0u8; INQUIRY_LEN];
        out[0] = self.peripheral_info;
        out[1] = self.device_qualifier;
        out[2] = self.version;
        out[3] = self._reserved;
        out[4] = self.additional_length;
        out[5..8].copy_from_slice(&self._vendor_specific);
        out[8..16].copy_from_slice(&self.vendor);
        out[16..32].copy_from_slice(&self.product);
        out[32..36].copy_from_slice(&self.revision);
        out
    }
}

/// Copies `record` into `buf`, truncated or zero padded to `length` bytes.
fn fill_padded(buf: &mut [u8], record: &[u8], length: usize) -> usize {
    let length = length.min(buf.len());
    let copied = record.len().min(length);
    buf[..copied].copy_from_slice(&record[..copied]);
    buf[copied..length].fill(0);
    length
}

/// INQUIRY data, `length` bytes of it.
pub fn inquiry(buf: &mut [u8], id: &Identification, length: u8) -> usize {
    fill_padded(buf, &Inquiry::new(id).to_bytes(), usize::from(length))
}

/// REQUEST SENSE data: a flag byte followed by the capacity in blocks,
/// padded to `length` bytes.
pub fn request_sense(buf: &mut [u8], capacity: u32, length: u8) -> usize {
    let [_, high, mid, low] = capacity.to_be_bytes();
    fill_padded(buf, &[SENSE_FLAGS, high, mid, low], usize::from(length))
}

/// MODE SENSE page 0: a header and one block descriptor holding the block
/// count and a 512 byte block length.
pub fn mode_page_0(buf: &mut [u8], capacity: u32) -> usize {
    let [_, high, mid, low] = capacity.to_be_bytes();
    let page: [u8; MODE_PAGE_0_LEN] = [
        0, 0, 0, 8, // header, block descriptor length
        0, high, mid, low, // density, number of blocks
        0, 0, 0x02, 0, // reserved, block length (512)
        0, 0, 0, 0,
    ];
    fill_padded(buf, &page, MODE_PAGE_0_LEN)
}

/// MODE SENSE page 4: the capacity expressed as cylinders of `heads`
/// single-sector tracks.
pub fn mode_page_4(buf: &mut [u8], capacity: u32, heads: u8) -> usize {
    let cylinders = capacity / u32::from(heads.max(1));
    let [_, high, mid, low] = cylinders.to_be_bytes();
    let mut page = [0u8; MODE_PAGE_4_LEN];
    page[0] = 0x04;
    page[1] = (MODE_PAGE_4_LEN - 2) as u8;
    page[2..5].copy_from_slice(&[high, mid, low]);
    page[5] = heads;
    fill_padded(buf, &page, MODE_PAGE_4_LEN)
}

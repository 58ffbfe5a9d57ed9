//! A raw disk image file standing in for the SD card.
//!
//! Used by the desktop simulator. The image is a plain dump of the card,
//! block 0 first, so a real card can be imaged with `dd` and served as is.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use color_eyre::eyre::{WrapErr, ensure};
use tracing::{debug, warn};

use super::{BLOCK_SIZE, Block, BlockDevice};

/// ACSI block addresses are 24 bits wide, anything past this is unreachable.
pub const MAX_BLOCKS: u32 = 0x00FF_FFFF;

pub struct ImageDevice {
    path: PathBuf,
    file: File,
    blocks: u32,
}

impl ImageDevice {
    /// Opens an image for reading and writing.
    ///
    /// The image length must be a whole number of blocks.
    pub fn open(path: impl AsRef<Path>) -> color_eyre::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open image {}", path.display()))?;
        let blocks = Self::probe(&file)?;
        ensure!(blocks > 0, "image {} is empty", path.display());
        Ok(Self { path, file, blocks })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn probe(file: &File) -> color_eyre::Result<u32> {
        let len = file.metadata()?.len();
        ensure!(
            len % BLOCK_SIZE as u64 == 0,
            "image length {len} is not a multiple of {BLOCK_SIZE} bytes"
        );
        let blocks = len / BLOCK_SIZE as u64;
        if blocks > u64::from(MAX_BLOCKS) {
            warn!(blocks, "image larger than 24-bit block addressing, truncating");
        }
        Ok(blocks.min(u64::from(MAX_BLOCKS)) as u32)
    }

    fn seek_to(&mut self, index: u32) -> io::Result<()> {
        if index >= self.blocks {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block {index} past end of image ({} blocks)", self.blocks),
            ));
        }
        self.file
            .seek(SeekFrom::Start(u64::from(index) * BLOCK_SIZE as u64))?;
        Ok(())
    }
}

impl BlockDevice for ImageDevice {
    type Error = io::Error;

    fn init(&mut self) -> Result<(), Self::Error> {
        // the image can be swapped or resized under us, like a card
        let len = self.file.metadata()?.len();
        self.blocks = (len / BLOCK_SIZE as u64).min(u64::from(MAX_BLOCKS)) as u32;
        debug!(path = %self.path.display(), blocks = self.blocks, "image probed");
        if self.blocks == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "image is empty"));
        }
        Ok(())
    }

    fn read_block(&mut self, index: u32, block: &mut Block) -> Result<(), Self::Error> {
        self.seek_to(index)?;
        self.file.read_exact(block)
    }

    fn write_block(&mut self, index: u32, block: &Block) -> Result<(), Self::Error> {
        self.seek_to(index)?;
        self.file.write_all(block)?;
        self.file.flush()
    }

    fn capacity_in_blocks(&self) -> u32 {
        self.blocks
    }
}

//! Thin adapter over the raw flash primitives.
//!
//! Alignment is not enforced here, callers only issue sector aligned erases and writes.
//! Every device error is mapped to [`Error::Flash`] carrying the offending address.

use embedded_storage_async::nor_flash::{NorFlash, NorFlashError};

use crate::{CopyOperation, Error, SECTOR_SIZE, error::FlashOp};

pub struct FlashAdapter<F> {
    flash: F,
    scratch: [u8; SECTOR_SIZE],
}

impl<F: NorFlash> FlashAdapter<F> {
    pub fn new(flash: F) -> Self {
        const { assert!(SECTOR_SIZE % F::ERASE_SIZE == 0) };

        Self {
            flash,
            scratch: [0xff; SECTOR_SIZE],
        }
    }

    pub fn inner(&self) -> &F {
        &self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    pub fn capacity(&self) -> usize {
        self.flash.capacity()
    }

    pub async fn read(&mut self, address: u32, out: &mut [u8]) -> Result<(), Error> {
        self.flash
            .read(address, out)
            .await
            .map_err(|e| flash_error(FlashOp::Read, address, e))
    }

    /// Erase `len` bytes starting at `address`.
    pub async fn erase(&mut self, address: u32, len: u32) -> Result<(), Error> {
        log::trace!("erase 0x{:08x}+0x{:x}", address, len);

        self.flash
            .erase(address, address + len)
            .await
            .map_err(|e| flash_error(FlashOp::Erase, address, e))
    }

    pub async fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        log::trace!("write 0x{:08x}+0x{:x}", address, data.len());

        self.flash
            .write(address, data)
            .await
            .map_err(|e| flash_error(FlashOp::Write, address, e))
    }

    /// Read a full sector into the scratch buffer and return it.
    pub async fn read_sector(&mut self, address: u32) -> Result<&[u8; SECTOR_SIZE], Error> {
        self.flash
            .read(address, &mut self.scratch)
            .await
            .map_err(|e| flash_error(FlashOp::Read, address, e))?;

        Ok(&self.scratch)
    }

    /// Perform a single sector relocation through the scratch buffer.
    ///
    /// The source is fully read before the destination is erased.
    pub async fn copy(&mut self, operation: CopyOperation) -> Result<(), Error> {
        log::trace!("copy 0x{:08x} -> 0x{:08x}", operation.from, operation.to);

        self.flash
            .read(operation.from, &mut self.scratch)
            .await
            .map_err(|e| flash_error(FlashOp::Read, operation.from, e))?;

        self.flash
            .erase(operation.to, operation.to + SECTOR_SIZE as u32)
            .await
            .map_err(|e| flash_error(FlashOp::Erase, operation.to, e))?;

        self.flash
            .write(operation.to, &self.scratch)
            .await
            .map_err(|e| flash_error(FlashOp::Write, operation.to, e))
    }
}

fn flash_error<E: NorFlashError>(op: FlashOp, address: u32, error: E) -> Error {
    Error::Flash {
        op,
        address,
        kind: error.kind(),
    }
}

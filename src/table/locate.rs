use embedded_storage_async::nor_flash::NorFlash;

use crate::{Error, flash::FlashAdapter, table::ENTRY_MAGIC};

/// Finds the partition table by probing a short list of candidate addresses.
///
/// A found address is remembered for the lifetime of the locator, flash layout does not move
/// underneath a running firmware. A miss is not remembered.
pub struct TableLocator {
    candidates: [u32; 2],
    cached: Option<u32>,
}

impl TableLocator {
    pub const fn new(candidates: [u32; 2]) -> Self {
        Self {
            candidates,
            cached: None,
        }
    }

    pub const fn cached(&self) -> Option<u32> {
        self.cached
    }

    /// Base address of the partition table, `None` if no candidate carries the entry magic.
    pub async fn locate<F: NorFlash>(
        &mut self,
        flash: &mut FlashAdapter<F>,
    ) -> Result<Option<u32>, Error> {
        if let Some(base) = self.cached {
            return Ok(Some(base));
        }

        for &candidate in &self.candidates {
            let mut prefix = [0u8; 4];
            flash.read(candidate, &mut prefix).await?;

            if prefix[..2] == ENTRY_MAGIC {
                log::debug!("partition table found at 0x{:08x}", candidate);
                self.cached = Some(candidate);
                return Ok(Some(candidate));
            }
        }

        log::debug!("no partition table at {:08x?}", self.candidates);
        Ok(None)
    }
}

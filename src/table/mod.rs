//! Binary partition table codec.
//!
//! The table occupies a single sector. Entries sit at 32 byte strides from the start of the sector,
//! optionally followed by a digest record holding the MD5 of all preceding bytes.
//! Parsing keeps the raw sector, so entry mutations land in the exact buffer that gets written back.

use embedded_storage_async::nor_flash::NorFlash;
use md5::{Digest, Md5};

use crate::{Error, MAX_ENTRIES, SECTOR_SIZE, flash::FlashAdapter};

pub mod entry;
pub mod locate;

pub use entry::{ENTRY_MAGIC, ENTRY_SIZE, EntryKind, EntryMut, Label, PartitionEntry};
pub use locate::TableLocator;

/// First two bytes of the digest record.
pub const DIGEST_MAGIC: [u8; 2] = [0xEB, 0xEB];

/// Prefix of the digest record, the digest itself follows directly after it.
///
/// ESP-IDF pads the two magic bytes with `0xFF` up to 16 bytes, so the MD5 sits at record
/// offset 16, not 2.
pub const DIGEST_MARKER: [u8; 16] = [
    0xEB, 0xEB, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

pub const DIGEST_LEN: usize = 16;

pub struct PartitionTable {
    base: u32,
    raw: [u8; SECTOR_SIZE],
    len: usize,
    digest_at: Option<usize>,
}

impl PartitionTable {
    /// Parse a raw table sector that was read from `base`.
    ///
    /// Scanning stops at the digest record, at the first stride not carrying the entry magic,
    /// or at the end of the sector.
    pub fn parse(base: u32, raw: [u8; SECTOR_SIZE]) -> Result<Self, Error> {
        let mut len = 0;
        let mut digest_at = None;

        for (index, record) in raw.chunks_exact(ENTRY_SIZE).enumerate() {
            if record[..2] == ENTRY_MAGIC {
                if len == MAX_ENTRIES {
                    return Err(Error::TooManyEntries { max: MAX_ENTRIES });
                }
                len += 1;
            } else {
                if record[..2] == DIGEST_MAGIC {
                    digest_at = Some(index * ENTRY_SIZE);
                }
                break;
            }
        }

        log::debug!(
            "parsed {} entries at 0x{:08x}, digest {}",
            len,
            base,
            digest_at.is_some()
        );

        Ok(Self {
            base,
            raw,
            len,
            digest_at,
        })
    }

    /// Read and parse the table sector at `base`.
    pub async fn read<F: NorFlash>(flash: &mut FlashAdapter<F>, base: u32) -> Result<Self, Error> {
        let raw = *flash.read_sector(base).await?;
        Self::parse(base, raw)
    }

    /// Recompute the digest, then erase the table sector and write the buffer back.
    pub async fn commit<F: NorFlash>(&mut self, flash: &mut FlashAdapter<F>) -> Result<(), Error> {
        self.seal();
        flash.erase(self.base, SECTOR_SIZE as u32).await?;
        flash.write(self.base, &self.raw).await
    }

    pub const fn base(&self) -> u32 {
        self.base
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn entry(&self, index: usize) -> Option<PartitionEntry> {
        self.record(index).and_then(PartitionEntry::decode)
    }

    pub fn entries(&self) -> impl Iterator<Item = PartitionEntry> + '_ {
        (0..self.len).filter_map(|index| self.entry(index))
    }

    /// View onto the raw record of an entry.
    pub fn entry_mut(&mut self, index: usize) -> Option<EntryMut<'_>> {
        if index >= self.len {
            return None;
        }

        self.raw
            .chunks_exact_mut(ENTRY_SIZE)
            .nth(index)
            .and_then(|record| record.try_into().ok())
            .map(EntryMut::new)
    }

    pub const fn has_digest(&self) -> bool {
        self.digest_at.is_some()
    }

    /// Digest currently stored in the digest record.
    pub fn stored_digest(&self) -> Option<[u8; DIGEST_LEN]> {
        let at = self.digest_at? + DIGEST_MARKER.len();
        self.raw[at..at + DIGEST_LEN].try_into().ok()
    }

    /// Digest of all bytes preceding the digest record, as they are now.
    pub fn compute_digest(&self) -> Option<[u8; DIGEST_LEN]> {
        let at = self.digest_at?;
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&Md5::digest(&self.raw[..at]));
        Some(digest)
    }

    /// `None` when the table has no digest record.
    pub fn verify_digest(&self) -> Option<bool> {
        Some(self.stored_digest()? == self.compute_digest()?)
    }

    /// Rewrite the digest record to match the current entries. No-op without a digest record.
    pub fn seal(&mut self) {
        let Some(at) = self.digest_at else {
            return;
        };
        let Some(digest) = self.compute_digest() else {
            return;
        };

        self.raw[at..at + DIGEST_MARKER.len()].copy_from_slice(&DIGEST_MARKER);
        let at = at + DIGEST_MARKER.len();
        self.raw[at..at + DIGEST_LEN].copy_from_slice(&digest);
    }

    pub const fn as_bytes(&self) -> &[u8; SECTOR_SIZE] {
        &self.raw
    }

    fn record(&self, index: usize) -> Option<&[u8; ENTRY_SIZE]> {
        if index >= self.len {
            return None;
        }

        self.raw
            .chunks_exact(ENTRY_SIZE)
            .nth(index)
            .and_then(|record| record.try_into().ok())
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::*;
    use crate::mock::{MockFlash, TableBuilder, fixtures};

    #[test]
    fn parse_stock_layout() {
        let raw = fixtures::stock().build();
        let table = PartitionTable::parse(0x8000, raw).unwrap();

        assert_eq!(table.len(), 6);
        assert!(table.has_digest());
        assert_eq!(table.verify_digest(), Some(true));

        let labels: std::vec::Vec<_> = table
            .entries()
            .map(|e| std::string::String::from(e.label.as_str()))
            .collect();
        assert_eq!(labels, ["nvs", "otadata", "app0", "app1", "spiffs", "coredump"]);
    }

    #[test]
    fn unmodified_table_round_trips() {
        let raw = fixtures::stock().build();
        let mut table = PartitionTable::parse(0x8000, raw).unwrap();
        assert_eq!(table.as_bytes(), &raw);

        // Sealing an untouched table reproduces the stored digest.
        table.seal();
        assert_eq!(table.as_bytes(), &raw);
    }

    #[test]
    fn digest_follows_mutation() {
        let raw = fixtures::stock().build();
        let mut table = PartitionTable::parse(0x8000, raw).unwrap();
        let before = table.stored_digest().unwrap();

        // Writing back the same value leaves the digest alone.
        {
            let mut entry = table.entry_mut(4).unwrap();
            let size = entry.size();
            entry.set_size(size);
        }
        assert_eq!(table.compute_digest(), Some(before));

        table.entry_mut(4).unwrap().set_size(0x10_0000);
        assert_eq!(table.verify_digest(), Some(false));
        assert_ne!(table.compute_digest(), Some(before));

        table.seal();
        assert_eq!(table.verify_digest(), Some(true));
        assert_ne!(table.stored_digest(), Some(before));
        assert_eq!(table.entry(4).unwrap().size, 0x10_0000);
    }

    #[test]
    fn table_without_digest() {
        let raw = fixtures::stock().without_digest().build();
        let mut table = PartitionTable::parse(0x8000, raw).unwrap();

        assert!(!table.has_digest());
        assert_eq!(table.verify_digest(), None);

        table.seal();
        assert_eq!(table.as_bytes(), &raw);
    }

    #[test]
    fn too_many_entries() {
        let mut builder = TableBuilder::new();
        for i in 0..=MAX_ENTRIES as u32 {
            builder = builder.data(0x02, 0x1_0000 + i * 0x1000, 0x1000, "nvs");
        }

        let result = PartitionTable::parse(0x8000, builder.build());
        assert!(matches!(
            result,
            Err(Error::TooManyEntries { max: MAX_ENTRIES })
        ));
    }

    #[test]
    fn entry_out_of_range() {
        let raw = fixtures::stock().build();
        let mut table = PartitionTable::parse(0x8000, raw).unwrap();

        assert!(table.entry(6).is_none());
        assert!(table.entry_mut(6).is_none());
    }

    #[test]
    fn commit_writes_sealed_sector() {
        let mut flash = MockFlash::new(16);
        flash.load(0x8000, &fixtures::stock().build());
        let mut flash = FlashAdapter::new(flash);

        let mut table = block_on(PartitionTable::read(&mut flash, 0x8000)).unwrap();
        table.entry_mut(2).unwrap().set_size(0x18_0000);
        block_on(table.commit(&mut flash)).unwrap();

        let reread = block_on(PartitionTable::read(&mut flash, 0x8000)).unwrap();
        assert_eq!(reread.entry(2).unwrap().size, 0x18_0000);
        assert_eq!(reread.verify_digest(), Some(true));
    }
}

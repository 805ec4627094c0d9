//! Partition table images for tests.

use std::vec::Vec;

use md5::{Digest, Md5};

use crate::{
    SECTOR_SIZE,
    table::{DIGEST_MARKER, ENTRY_SIZE, EntryKind, PartitionEntry},
};

/// Builds a raw table sector the way the ESP-IDF partition generator lays it out.
pub struct TableBuilder {
    entries: Vec<PartitionEntry>,
    digest: bool,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            digest: true,
        }
    }

    pub fn app(self, subtype: u8, address: u32, size: u32, label: &str) -> Self {
        self.entry(PartitionEntry::new(
            EntryKind::App,
            subtype,
            address,
            size,
            label,
        ))
    }

    pub fn data(self, subtype: u8, address: u32, size: u32, label: &str) -> Self {
        self.entry(PartitionEntry::new(
            EntryKind::Data,
            subtype,
            address,
            size,
            label,
        ))
    }

    pub fn entry(mut self, entry: PartitionEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn without_digest(mut self) -> Self {
        self.digest = false;
        self
    }

    pub fn build(&self) -> [u8; SECTOR_SIZE] {
        let mut raw = [0xff; SECTOR_SIZE];

        for (record, entry) in raw.chunks_exact_mut(ENTRY_SIZE).zip(&self.entries) {
            entry.encode(record.try_into().unwrap());
        }

        if self.digest {
            let at = self.entries.len() * ENTRY_SIZE;
            let digest = Md5::digest(&raw[..at]);
            raw[at..at + 16].copy_from_slice(&DIGEST_MARKER);
            raw[at + 16..at + 32].copy_from_slice(&digest);
        }

        raw
    }
}

/// Arduino default layout for 4 MB flash.
pub fn stock() -> TableBuilder {
    TableBuilder::new()
        .data(0x02, 0x9000, 0x5000, "nvs")
        .data(0x00, 0xe000, 0x2000, "otadata")
        .app(0x10, 0x1_0000, 0x14_0000, "app0")
        .app(0x11, 0x15_0000, 0x14_0000, "app1")
        .data(0x82, 0x29_0000, 0x16_0000, "spiffs")
        .data(0x03, 0x3f_0000, 0x1_0000, "coredump")
}

/// Two 1 MB app slots followed by a 2 MB data partition.
pub fn app_app_data() -> TableBuilder {
    TableBuilder::new()
        .app(0x10, 0x1_0000, 0x10_0000, "app0")
        .app(0x11, 0x11_0000, 0x10_0000, "app1")
        .data(0x82, 0x21_0000, 0x20_0000, "spiffs")
}

/// A coredump partition sits between the app slots and the donor.
pub fn with_coredump() -> TableBuilder {
    TableBuilder::new()
        .data(0x02, 0x9000, 0x5000, "nvs")
        .data(0x00, 0xe000, 0x2000, "otadata")
        .app(0x10, 0x1_0000, 0x14_0000, "app0")
        .app(0x11, 0x15_0000, 0x14_0000, "app1")
        .data(0x03, 0x29_0000, 0x1_0000, "coredump")
        .data(0x82, 0x2a_0000, 0x16_0000, "spiffs")
}

//! A single 32 byte partition table record.
//!
//! ```text
//! 0..2    magic 0xAA 0x50
//! 2       type
//! 3       subtype
//! 4..8    address, little endian
//! 8..12   size, little endian
//! 12..28  label, zero terminated unless all 16 bytes are used
//! 28..32  flags, little endian (bit 0 encrypted, bit 1 read-only)
//! ```

use core::fmt;

use serde::{Deserialize, Serialize};

pub const ENTRY_SIZE: usize = 32;
pub const ENTRY_MAGIC: [u8; 2] = [0xAA, 0x50];
pub const LABEL_LEN: usize = 16;

const TYPE: usize = 2;
const SUBTYPE: usize = 3;
const ADDRESS: usize = 4;
const SIZE: usize = 8;
const LABEL: usize = 12;
const FLAGS: usize = 28;

const FLAG_ENCRYPTED: u32 = 1 << 0;
const FLAG_READ_ONLY: u32 = 1 << 1;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EntryKind {
    App,
    Data,
    Other(u8),
}

impl EntryKind {
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => EntryKind::App,
            0x01 => EntryKind::Data,
            other => EntryKind::Other(other),
        }
    }

    pub const fn to_byte(self) -> u8 {
        match self {
            EntryKind::App => 0x00,
            EntryKind::Data => 0x01,
            EntryKind::Other(other) => other,
        }
    }
}

/// Partition label, up to 16 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Label([u8; LABEL_LEN]);

impl Label {
    /// Truncates to 16 bytes.
    pub fn new(text: &str) -> Self {
        let mut raw = [0u8; LABEL_LEN];
        let len = text.len().min(LABEL_LEN);
        raw[..len].copy_from_slice(&text.as_bytes()[..len]);
        Self(raw)
    }

    pub const fn from_raw(raw: [u8; LABEL_LEN]) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(LABEL_LEN);
        match core::str::from_utf8(&self.0[..len]) {
            Ok(text) => text,
            Err(e) => {
                // Keep the valid prefix, labels are ASCII in practice.
                let valid = e.valid_up_to();
                core::str::from_utf8(&self.0[..valid]).unwrap_or_default()
            }
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded copy of a partition table record.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PartitionEntry {
    pub kind: EntryKind,
    pub subtype: u8,
    pub address: u32,
    pub size: u32,
    pub label: Label,
    pub encrypted: bool,
    pub read_only: bool,
}

impl PartitionEntry {
    pub fn new(kind: EntryKind, subtype: u8, address: u32, size: u32, label: &str) -> Self {
        Self {
            kind,
            subtype,
            address,
            size,
            label: Label::new(label),
            encrypted: false,
            read_only: false,
        }
    }

    /// Decode a record, `None` if it does not start with the entry magic.
    pub fn decode(raw: &[u8; ENTRY_SIZE]) -> Option<Self> {
        if raw[..2] != ENTRY_MAGIC {
            return None;
        }

        let mut label = [0u8; LABEL_LEN];
        label.copy_from_slice(&raw[LABEL..LABEL + LABEL_LEN]);
        let flags = read_u32(raw, FLAGS);

        Some(Self {
            kind: EntryKind::from_byte(raw[TYPE]),
            subtype: raw[SUBTYPE],
            address: read_u32(raw, ADDRESS),
            size: read_u32(raw, SIZE),
            label: Label(label),
            encrypted: flags & FLAG_ENCRYPTED != 0,
            read_only: flags & FLAG_READ_ONLY != 0,
        })
    }

    pub fn encode(&self, raw: &mut [u8; ENTRY_SIZE]) {
        raw[..2].copy_from_slice(&ENTRY_MAGIC);
        raw[TYPE] = self.kind.to_byte();
        raw[SUBTYPE] = self.subtype;
        write_u32(raw, ADDRESS, self.address);
        write_u32(raw, SIZE, self.size);
        raw[LABEL..LABEL + LABEL_LEN].copy_from_slice(&self.label.0);

        let mut flags = 0;
        if self.encrypted {
            flags |= FLAG_ENCRYPTED;
        }
        if self.read_only {
            flags |= FLAG_READ_ONLY;
        }
        write_u32(raw, FLAGS, flags);
    }

    /// First address past the partition, `None` if it does not fit the 32-bit address space.
    pub const fn end(&self) -> Option<u32> {
        self.address.checked_add(self.size)
    }

    pub const fn subtype_name(&self) -> SubtypeName {
        SubtypeName {
            kind: self.kind,
            subtype: self.subtype,
        }
    }
}

/// Mutable view of a record inside the table sector.
///
/// Writes go straight into the buffer that is later committed to flash.
pub struct EntryMut<'a> {
    raw: &'a mut [u8; ENTRY_SIZE],
}

impl<'a> EntryMut<'a> {
    pub(crate) fn new(raw: &'a mut [u8; ENTRY_SIZE]) -> Self {
        Self { raw }
    }

    pub fn address(&self) -> u32 {
        read_u32(self.raw, ADDRESS)
    }

    pub fn size(&self) -> u32 {
        read_u32(self.raw, SIZE)
    }

    pub fn set_address(&mut self, address: u32) {
        write_u32(self.raw, ADDRESS, address);
    }

    pub fn set_size(&mut self, size: u32) {
        write_u32(self.raw, SIZE, size);
    }
}

/// Human readable subtype, e.g. `ota_1` or `spiffs`.
#[derive(Clone, Copy)]
pub struct SubtypeName {
    kind: EntryKind,
    subtype: u8,
}

impl fmt::Display for SubtypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.subtype) {
            (EntryKind::App, 0x00) => f.write_str("factory"),
            (EntryKind::App, n @ 0x10..=0x1f) => write!(f, "ota_{}", n - 0x10),
            (EntryKind::App, 0x20) => f.write_str("test"),
            (EntryKind::Data, 0x00) => f.write_str("ota"),
            (EntryKind::Data, 0x01) => f.write_str("phy"),
            (EntryKind::Data, 0x02) => f.write_str("nvs"),
            (EntryKind::Data, 0x03) => f.write_str("coredump"),
            (EntryKind::Data, 0x04) => f.write_str("nvs_keys"),
            (EntryKind::Data, 0x05) => f.write_str("efuse"),
            (EntryKind::Data, 0x81) => f.write_str("fat"),
            (EntryKind::Data, 0x82) => f.write_str("spiffs"),
            (EntryKind::Data, 0x83) => f.write_str("littlefs"),
            (_, other) => write!(f, "0x{other:02x}"),
        }
    }
}

fn read_u32(raw: &[u8; ENTRY_SIZE], at: usize) -> u32 {
    u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

fn write_u32(raw: &mut [u8; ENTRY_SIZE], at: usize, value: u32) {
    raw[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

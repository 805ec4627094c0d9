//! Operator facing reports: device identity, bootloader digest, table listing, table search and hex dumps.

use core::{fmt, ops::Range};

use embedded_storage_async::nor_flash::NorFlash;
use md5::{Digest, Md5};

use crate::{
    Device, Error, SECTOR_SIZE,
    flash::FlashAdapter,
    table::{ENTRY_MAGIC, PartitionEntry, PartitionTable},
    transcript::{Sink, Transcript},
};

/// Identity strings supplied by the platform.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceIdentity {
    pub build: &'static str,
    pub sdk_version: &'static str,
    pub chip_model: &'static str,
    pub chip_id: u32,
    pub flash_chip_id: u32,
    /// Bytes.
    pub flash_size: u32,
    /// Bytes.
    pub heap_size: u32,
    /// Bytes.
    pub program_size: u32,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Build: {} SDK {} / {} ({})",
            self.build, self.sdk_version, self.chip_id, self.chip_model
        )?;
        writeln!(
            f,
            "Flash chip ID / Size: 0x{:x} / {} KB",
            self.flash_chip_id,
            self.flash_size / 1024
        )?;
        write!(
            f,
            "Program heap / program size: {} KB / {} KB",
            self.heap_size / 1024,
            self.program_size / 1024
        )
    }
}

/// One line per entry, in the format operators know from the partition listing.
pub struct EntryLine<'a>(pub &'a PartitionEntry);

impl fmt::Display for EntryLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entry = self.0;
        write!(
            f,
            "Type: {:02x}, Subtype: {:02x}, Addr: 0x{:08x}, Size: 0x{:08x} ({}K), Label: {} ({})",
            entry.kind.to_byte(),
            entry.subtype,
            entry.address,
            entry.size,
            entry.size / 1024,
            entry.label,
            entry.subtype_name(),
        )
    }
}

/// 16 bytes per line: hex pairs, then the printable ASCII rendering.
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.0.chunks(16) {
            for byte in line {
                write!(f, "{byte:02x} ")?;
            }
            for _ in line.len()..16 {
                f.write_str("   ")?;
            }
            for &byte in line {
                let c = if (32..=126).contains(&byte) {
                    byte as char
                } else {
                    '.'
                };
                write!(f, "{c}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// MD5 rendered as four space separated groups of eight hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DigestHex(pub [u8; 16]);

impl fmt::Display for DigestHex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.0.chunks(4).enumerate() {
            if i != 0 {
                f.write_str(" ")?;
            }
            for byte in group {
                write!(f, "{byte:02x}")?;
            }
        }
        Ok(())
    }
}

/// MD5 over the bootloader, from `start` up to the partition table at `end`.
pub async fn bootloader_digest<F: NorFlash>(
    flash: &mut FlashAdapter<F>,
    start: u32,
    end: u32,
) -> Result<DigestHex, Error> {
    let mut hasher = Md5::new();

    for address in (start..end).step_by(SECTOR_SIZE) {
        let sector = flash.read_sector(address).await?;
        hasher.update(sector);
    }

    let mut digest = [0u8; 16];
    digest.copy_from_slice(&hasher.finalize());
    Ok(DigestHex(digest))
}

/// Scan `window` sector by sector for anything that looks like a partition table.
///
/// Returns the number of candidates reported.
pub async fn search_table<F: NorFlash, S: Sink>(
    flash: &mut FlashAdapter<F>,
    window: Range<u32>,
    transcript: &mut Transcript<S>,
) -> Result<usize, Error> {
    let mut found = 0;

    for address in window.step_by(SECTOR_SIZE) {
        let mut prefix = [0u8; 4];
        flash.read(address, &mut prefix).await?;

        if prefix[..2] == ENTRY_MAGIC {
            transcript.line(format_args!("Possible partition table at 0x{address:08x}"));
            found += 1;
        }
    }

    if found == 0 {
        transcript.line("No partition table signature found");
    }

    Ok(found)
}

/// List every entry, the running and next app slot, and whether the device can be repartitioned.
pub fn list_layout<D: Device, S: Sink>(
    table: &PartitionTable,
    device: &D,
    transcript: &mut Transcript<S>,
) {
    transcript.line(format_args!("Partition table at 0x{:08x}:", table.base()));
    for entry in table.entries() {
        transcript.line(EntryLine(&entry));
    }

    match table.verify_digest() {
        Some(true) => transcript.ok("Table digest"),
        Some(false) => transcript.line("Table digest does not match"),
        None => transcript.line("Table has no digest"),
    }

    let running = device.running_app_address();
    let next = device.next_update_app_address();
    let label = |address| {
        table
            .entries()
            .find(|e| e.address == address)
            .map(|e| e.label)
    };

    match label(running) {
        Some(l) => transcript.line(format_args!("Running: Addr: 0x{running:08x}, Label: {l}")),
        None => transcript.line(format_args!("Running: Addr: 0x{running:08x}")),
    }
    match label(next) {
        Some(l) => transcript.line(format_args!("Next:    Addr: 0x{next:08x}, Label: {l}")),
        None => transcript.line(format_args!("Next:    Addr: 0x{next:08x}")),
    }

    if running < next {
        transcript.line("Current partition is first; you are ready.");
    } else {
        transcript.line("YOU MUST UPLOAD AN UPDATE FIRST. Current partition is the later one.");
    }
}

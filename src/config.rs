//! Tunables of a repartition run.

use serde::{Deserialize, Serialize};

use crate::{Error, SECTOR_SIZE};

/// Configuration of the planner, the table probe and the restart.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Minimum size both resizable app partitions should end up with.
    pub target_app_size: u32,

    /// Candidate flash addresses probed, in order, for the partition table.
    pub table_candidates: [u32; 2],

    /// Required alignment of the start of every app partition.
    pub app_alignment: u32,

    /// Start of the second stage bootloader, covered by the bootloader digest.
    pub bootloader_offset: u32,

    /// Pause before restarting so buffered output reaches the client.
    pub restart_delay_ms: u32,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            target_app_size: 0x18_0000,
            table_candidates: [0x8000, 0x9000],
            app_alignment: 0x1_0000,
            bootloader_offset: 0x1000,
            restart_delay_ms: 500,
        }
    }

    pub const fn with_target_app_size(mut self, size: u32) -> Self {
        self.target_app_size = size;
        self
    }

    pub const fn with_table_candidates(mut self, candidates: [u32; 2]) -> Self {
        self.table_candidates = candidates;
        self
    }

    pub const fn with_app_alignment(mut self, alignment: u32) -> Self {
        self.app_alignment = alignment;
        self
    }

    pub const fn with_restart_delay_ms(mut self, ms: u32) -> Self {
        self.restart_delay_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        let sector = SECTOR_SIZE as u32;

        if self.target_app_size == 0 || self.target_app_size % sector != 0 {
            return Err(Error::InvalidConfig(
                "target app size must be a non-zero multiple of the sector size",
            ));
        }
        if self.app_alignment == 0 || self.app_alignment % sector != 0 {
            return Err(Error::InvalidConfig(
                "app alignment must be a non-zero multiple of the sector size",
            ));
        }
        if self.bootloader_offset % sector != 0 {
            return Err(Error::InvalidConfig(
                "bootloader offset must be sector aligned",
            ));
        }
        if self
            .table_candidates
            .iter()
            .any(|&addr| addr == 0 || addr % sector != 0)
        {
            return Err(Error::InvalidConfig(
                "table candidates must be non-zero and sector aligned",
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

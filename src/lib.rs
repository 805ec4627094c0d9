//! Toolkit for growing the app slots of a flash partition table in place, without external tools.
//!
//! The partition table is read from raw flash, a new layout is planned by shrinking a data partition,
//! and the table plus any displaced partition contents are rewritten sector by sector.
#![no_std]

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod flash;
pub mod planner;
pub mod table;
pub mod transcript;

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod mock;

pub use config::Config;
pub use error::Error;
pub use executor::{Mode, Outcome, Repartitioner};
pub use transcript::{Sink, Transcript};

/// Smallest independently erasable unit of flash.
///
/// All erase and write operations issued by this crate are aligned to, and a multiple of, this size.
pub const SECTOR_SIZE: usize = 4096;

/// Maximum number of entries a partition table may hold before parsing fails.
pub const MAX_ENTRIES: usize = 16;

/// Platform facilities that are not raw flash.
///
/// Implemented by the firmware for the concrete chip, and by a mock in tests.
#[allow(async_fn_in_trait)]
pub trait Device {
    /// Whether flash-level encryption is active. Rewriting the table under encryption is refused.
    fn flash_encryption_enabled(&self) -> bool;

    /// Whether the device is still in its initial setup portal, in which case apply is refused.
    fn in_setup_mode(&self) -> bool;

    /// Flash address of the app slot the current firmware is running from.
    fn running_app_address(&self) -> u32;

    /// Flash address of the app slot the next firmware update would be written to.
    fn next_update_app_address(&self) -> u32;

    /// Identity strings for diagnostics.
    fn identity(&self) -> diagnostics::DeviceIdentity;

    /// Wait, letting buffered output drain.
    async fn delay_ms(&mut self, ms: u32);

    /// Restart the device.
    ///
    /// On hardware this does not return.
    fn restart(&mut self);
}

/// Relocate one sector: read `from`, erase `to`, write the read content to `to`.
///
/// Both addresses are sector aligned. `from` is left intact unless it is the same sector as `to`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CopyOperation {
    pub from: u32,
    pub to: u32,
}

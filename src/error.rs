use core::fmt;

use embedded_storage_async::nor_flash::NorFlashErrorKind;

/// Raw flash primitive that failed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashOp {
    Read,
    Erase,
    Write,
}

impl fmt::Display for FlashOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlashOp::Read => "read",
            FlashOp::Erase => "erase",
            FlashOp::Write => "write",
        })
    }
}

/// Reason a repartition run stopped early.
///
/// Everything except [`Error::Flash`] is raised before flash is mutated and is safe to retry
/// once the condition is corrected. A flash error during apply leaves flash in whatever state the
/// failing step produced.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    EncryptionEnabled,
    SetupMode,
    /// The running firmware is not in the lowest app slot.
    NotLowestSlot {
        running: u32,
        next: u32,
    },
    TableNotFound,
    TooManyEntries {
        max: usize,
    },
    InsufficientPartitions {
        apps: usize,
        data: usize,
    },
    /// The donor data partition lies before one of the app partitions that has to grow.
    UnsupportedOrder,
    Misaligned {
        address: u32,
        size: u32,
    },
    /// Entry wraps the address space, overlaps or precedes its predecessor, or ends past the flash.
    InvalidLayout {
        address: u32,
        size: u32,
    },
    DataTooSmall {
        needed: u32,
        available: u32,
    },
    OffsetTooSmall {
        shift: u32,
    },
    InvalidConfig(&'static str),
    Flash {
        op: FlashOp,
        address: u32,
        kind: NorFlashErrorKind,
    },
}

impl Error {
    /// Status for the HTTP layer. Only a refused apply in setup mode is a server error,
    /// all other failures are reported through the transcript.
    pub const fn status_code(&self) -> u16 {
        match self {
            Error::SetupMode => 500,
            _ => 200,
        }
    }

    /// Whether flash may have been modified before this error was raised.
    pub const fn is_io(&self) -> bool {
        matches!(self, Error::Flash { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EncryptionEnabled => {
                write!(f, "flash encryption is enabled, refusing to rewrite the partition table")
            }
            Error::SetupMode => write!(f, "device is in setup mode"),
            Error::NotLowestSlot { running, next } => write!(
                f,
                "YOU MUST UPLOAD AN UPDATE FIRST. Current partition is the later one (running 0x{running:08x}, next 0x{next:08x})"
            ),
            Error::TableNotFound => write!(f, "partition table not found"),
            Error::TooManyEntries { max } => {
                write!(f, "partition table has more than {max} entries")
            }
            Error::InsufficientPartitions { apps, data } => write!(
                f,
                "insufficient partitions: {apps} app and {data} data, need at least 2 app and 1 data"
            ),
            Error::UnsupportedOrder => {
                write!(f, "partition table does not have app partitions before the data partition")
            }
            Error::Misaligned { address, size } => write!(
                f,
                "misaligned partition at 0x{address:08x} with size 0x{size:08x}"
            ),
            Error::InvalidLayout { address, size } => write!(
                f,
                "invalid layout: partition at 0x{address:08x} with size 0x{size:08x} is out of order or out of bounds"
            ),
            Error::DataTooSmall { needed, available } => write!(
                f,
                "data partition too small: need 0x{needed:08x}, have 0x{available:08x}"
            ),
            Error::OffsetTooSmall { shift } => write!(
                f,
                "offset too small: data partition would only move by 0x{shift:x}"
            ),
            Error::InvalidConfig(reason) => write!(f, "invalid configuration: {reason}"),
            Error::Flash { op, address, kind } => {
                write!(f, "failed to {op} flash at 0x{address:08x}: {kind:?}")
            }
        }
    }
}

impl core::error::Error for Error {}

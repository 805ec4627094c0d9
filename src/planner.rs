//! Layout planner: grow the two resizable app partitions by shrinking one data partition.
//!
//! The first two app entries in table order are resizable. Every one of them smaller than the
//! target size grows to it. The first one to grow keeps its content and grows in place, any later one
//! is erased since its image will be uploaded again anyway. The largest data partition donates the
//! combined growth, and everything between the growing apps and the donor shifts up by the accumulated
//! growth.
//!
//! This is a single donor, single pass planner. It does not balance between several data partitions
//! and never reorders entries.

use serde::{Deserialize, Serialize};

use crate::{
    Config, CopyOperation, Error, MAX_ENTRIES, SECTOR_SIZE,
    table::{EntryKind, Label, PartitionEntry, PartitionTable},
};

const SECTOR: u32 = SECTOR_SIZE as u32;

/// Planned change to a single table entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PlanEntry {
    /// Position in the table.
    pub index: usize,
    pub kind: EntryKind,
    pub label: Label,
    pub old_address: u32,
    pub old_size: u32,
    /// `None` if the address is unchanged.
    pub new_address: Option<u32>,
    /// `None` if the size is unchanged.
    pub new_size: Option<u32>,
    /// Content is discarded: the region is erased instead of relocated.
    pub erase: bool,
    /// Content is relocated to the new address.
    pub relocate: bool,
}

impl PlanEntry {
    const EMPTY: PlanEntry = PlanEntry {
        index: 0,
        kind: EntryKind::Other(0xff),
        label: Label::from_raw([0; 16]),
        old_address: 0,
        old_size: 0,
        new_address: None,
        new_size: None,
        erase: false,
        relocate: false,
    };

    fn unchanged(index: usize, entry: &PartitionEntry) -> Self {
        Self {
            index,
            kind: entry.kind,
            label: entry.label,
            old_address: entry.address,
            old_size: entry.size,
            new_address: None,
            new_size: None,
            erase: false,
            relocate: false,
        }
    }

    /// Address after migration.
    pub fn address(&self) -> u32 {
        self.new_address.unwrap_or(self.old_address)
    }

    /// Size after migration.
    pub fn size(&self) -> u32 {
        self.new_size.unwrap_or(self.old_size)
    }

    pub fn is_changed(&self) -> bool {
        self.new_address.is_some() || self.new_size.is_some()
    }

    /// Region to erase for a content discarding resize, covering both the old and the new extent.
    pub fn erase_range(&self) -> Option<(u32, u32)> {
        if !self.erase {
            return None;
        }

        let start = self.old_address.min(self.address());
        let end = self
            .old_address
            .checked_add(self.old_size)?
            .max(self.address().checked_add(self.size())?);
        Some((start, end - start))
    }

    /// Sector copies relocating the preserved content, last sector first.
    ///
    /// Every shift in a plan is towards higher addresses, so walking backwards reads each source
    /// sector before any destination overlapping it is erased.
    pub fn relocations(&self) -> impl Iterator<Item = CopyOperation> {
        let sectors = if self.relocate && self.address() != self.old_address {
            self.old_size.min(self.size()) / SECTOR
        } else {
            0
        };
        let from = self.old_address;
        let to = self.address();

        (0..sectors).rev().map(move |sector| CopyOperation {
            from: from + sector * SECTOR,
            to: to + sector * SECTOR,
        })
    }
}

/// Planned migration of every table entry.
#[derive(Clone, Debug)]
pub struct MigrationPlan {
    entries: [PlanEntry; MAX_ENTRIES],
    len: usize,
    size_delta: u32,
    donor: Option<usize>,
}

impl MigrationPlan {
    /// Compute the plan for `entries`, given in table order, on a flash of `flash_size` bytes.
    ///
    /// Entries must be sector aligned, ascending and non-overlapping, and end within the flash.
    pub fn new(
        entries: impl IntoIterator<Item = PartitionEntry>,
        config: &Config,
        flash_size: usize,
    ) -> Result<Self, Error> {
        let target = config.target_app_size;

        let mut plan = Self {
            entries: [PlanEntry::EMPTY; MAX_ENTRIES],
            len: 0,
            size_delta: 0,
            donor: None,
        };

        let mut previous_end = 0;
        for (index, entry) in entries.into_iter().enumerate() {
            if index == MAX_ENTRIES {
                return Err(Error::TooManyEntries { max: MAX_ENTRIES });
            }
            if entry.address % SECTOR != 0 || entry.size % SECTOR != 0 {
                return Err(Error::Misaligned {
                    address: entry.address,
                    size: entry.size,
                });
            }
            let end = entry
                .end()
                .filter(|&end| entry.address >= previous_end && end as usize <= flash_size)
                .ok_or(Error::InvalidLayout {
                    address: entry.address,
                    size: entry.size,
                })?;
            previous_end = end;

            plan.entries[index] = PlanEntry::unchanged(index, &entry);
            plan.len += 1;
        }

        let (first, second) = {
            let mut apps = plan.indices_of(EntryKind::App);
            (apps.next(), apps.next())
        };
        let data = plan.indices_of(EntryKind::Data).count();
        let (Some(primary), Some(secondary)) = (first, second) else {
            return Err(Error::InsufficientPartitions {
                apps: plan.indices_of(EntryKind::App).count(),
                data,
            });
        };
        if data == 0 {
            return Err(Error::InsufficientPartitions { apps: 2, data });
        }

        let mut size_delta = 0;
        let mut grown_in_place = false;
        for index in [primary, secondary] {
            let entry = &mut plan.entries[index];
            if entry.old_size >= target {
                continue;
            }

            size_delta += target - entry.old_size;
            entry.new_size = Some(target);
            if grown_in_place {
                entry.erase = true;
            } else {
                grown_in_place = true;
            }
        }

        if size_delta == 0 {
            return Ok(plan);
        }
        plan.size_delta = size_delta;

        // First one wins on equal size.
        let donor = plan
            .indices_of(EntryKind::Data)
            .fold(None, |best: Option<usize>, index| match best {
                Some(b) if plan.entries[b].old_size >= plan.entries[index].old_size => Some(b),
                _ => Some(index),
            })
            .ok_or(Error::InsufficientPartitions { apps: 2, data })?;

        if donor < secondary {
            return Err(Error::UnsupportedOrder);
        }

        let available = plan.entries[donor].old_size;
        if available < size_delta {
            return Err(Error::DataTooSmall {
                needed: size_delta,
                available,
            });
        }
        plan.entries[donor].new_size = Some(available - size_delta);
        plan.donor = Some(donor);

        // Shift everything after a growing entry by the growth accumulated so far.
        let mut offset: i64 = 0;
        for entry in plan.entries[..plan.len].iter_mut() {
            if offset != 0 {
                let address = u32::try_from(i64::from(entry.old_address) + offset).map_err(|_| {
                    Error::InvalidLayout {
                        address: entry.old_address,
                        size: entry.old_size,
                    }
                })?;
                entry.new_address = Some(address);
                entry.relocate = !entry.erase;
            }
            offset += i64::from(entry.size()) - i64::from(entry.old_size);
        }

        for entry in plan.entries() {
            if entry.kind == EntryKind::App
                && entry.new_address.is_some()
                && entry.address() % config.app_alignment != 0
            {
                return Err(Error::Misaligned {
                    address: entry.address(),
                    size: entry.size(),
                });
            }
        }

        // Equal to `size_delta` as long as the donor follows both apps.
        let donor_entry = &plan.entries[donor];
        let shift = donor_entry.address().saturating_sub(donor_entry.old_address);
        if shift < SECTOR {
            return Err(Error::OffsetTooSmall { shift });
        }

        Ok(plan)
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries[..self.len]
    }

    /// Total growth of the resizable app partitions, which the donor gives up.
    pub const fn size_delta(&self) -> u32 {
        self.size_delta
    }

    /// Whether the app partitions already have the target size.
    pub const fn is_noop(&self) -> bool {
        self.size_delta == 0
    }

    pub fn donor(&self) -> Option<&PlanEntry> {
        self.donor.map(|index| &self.entries[index])
    }

    /// Write the planned addresses and sizes into the table buffer.
    ///
    /// The digest is not touched, it is recomputed when the table is committed.
    pub fn apply_to(&self, table: &mut PartitionTable) {
        for planned in self.entries().iter().filter(|e| e.is_changed()) {
            if let Some(mut entry) = table.entry_mut(planned.index) {
                entry.set_address(planned.address());
                entry.set_size(planned.size());
            }
        }
    }

    fn indices_of(&self, kind: EntryKind) -> impl Iterator<Item = usize> + '_ {
        self.entries()
            .iter()
            .filter(move |e| e.kind == kind)
            .map(|e| e.index)
    }
}

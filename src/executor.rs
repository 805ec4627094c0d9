//! Migration executor.
//!
//! A linear state machine without retries:
//!
//! ```text
//! CheckEncryption -> CheckActiveSlot -> LocateTable -> ReadTable -> Parse -> ValidateShape -> Plan -> Apply
//! ```
//!
//! Every failure is written to the transcript and ends the run. Nothing before [`Stage::Apply`]
//! touches flash. Once the table sector is erased the device is committed: there is no rollback, and a
//! flash error from then on leaves a partially migrated layout behind.

use core::fmt::Write;

use embedded_storage_async::nor_flash::NorFlash;

use crate::{
    Config, Device, Error,
    diagnostics::{self, EntryLine, HexDump},
    flash::FlashAdapter,
    planner::{MigrationPlan, PlanEntry},
    table::{ENTRY_SIZE, EntryKind, PartitionTable, TableLocator},
    transcript::{Sink, Transcript},
};

/// Window scanned for a table signature when no candidate address matches.
const SEARCH_WINDOW: core::ops::Range<u32> = 0x1000..0x1_0000;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Plan and report, leave flash untouched.
    DryRun,
    /// Plan, rewrite flash and restart.
    Apply,
}

/// Where a run currently is, or where it stopped.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    Idle,
    CheckEncryption,
    CheckActiveSlot,
    LocateTable,
    ReadTable,
    Parse,
    ValidateShape,
    Plan,
    Apply,
    Done,
}

#[derive(Debug)]
pub enum Outcome {
    /// Both app partitions already have the target size, the device is ready for a firmware upload.
    AlreadyIdeal,
    /// Dry run finished, this is what apply would do.
    Planned(MigrationPlan),
    /// Flash was rewritten and a restart issued.
    Restarted,
}

pub struct Repartitioner<F, D> {
    config: Config,
    flash: FlashAdapter<F>,
    device: D,
    locator: TableLocator,
    stage: Stage,
}

impl<F: NorFlash, D: Device> Repartitioner<F, D> {
    pub fn new(config: Config, flash: F, device: D) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            config,
            flash: FlashAdapter::new(flash),
            device,
            locator: TableLocator::new(config.table_candidates),
            stage: Stage::Idle,
        })
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn device(&self) -> &D {
        &self.device
    }

    pub fn flash(&self) -> &F {
        self.flash.inner()
    }

    /// Stage the last run reached, the failing one if it stopped early.
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    pub fn into_parts(self) -> (F, D) {
        (self.flash.into_inner(), self.device)
    }

    /// Read-only report: device identity, bootloader digest and the current layout.
    pub async fn inspect<S: Sink>(&mut self, sink: S) -> Result<(), Error> {
        let mut transcript = Transcript::new(sink);
        let t = &mut transcript;

        t.line(self.device.identity());

        let base = self.locate(t).await?;

        let digest = diagnostics::bootloader_digest(
            &mut self.flash,
            self.config.bootloader_offset,
            base,
        )
        .await
        .map_err(|e| t.fail(e))?;
        t.line(format_args!("Bootloader MD5: {digest}"));

        let table = PartitionTable::read(&mut self.flash, base)
            .await
            .map_err(|e| t.fail(e))?;
        diagnostics::list_layout(&table, &self.device, t);

        let used = (table.len() + usize::from(table.has_digest())) * ENTRY_SIZE;
        t.line("Raw table:");
        let _ = write!(t, "{}", HexDump(&table.as_bytes()[..used]));

        Ok(())
    }

    /// Run the full state machine. With [`Mode::Apply`] a successful run ends in a restart.
    pub async fn run<S: Sink>(&mut self, mode: Mode, sink: S) -> Result<Outcome, Error> {
        let mut transcript = Transcript::new(sink);
        let t = &mut transcript;
        self.stage = Stage::Idle;

        if mode == Mode::Apply {
            if self.device.in_setup_mode() {
                return Err(t.fail(Error::SetupMode));
            }
            t.line("If you do not see a line with 'Ready' at the end, this process didn't work.");
        }

        self.stage = Stage::CheckEncryption;
        if self.device.flash_encryption_enabled() {
            return Err(t.fail(Error::EncryptionEnabled));
        }
        t.ok("Flash encryption is disabled");

        self.stage = Stage::CheckActiveSlot;
        let running = self.device.running_app_address();
        let next = self.device.next_update_app_address();
        if running > next {
            return Err(t.fail(Error::NotLowestSlot { running, next }));
        }
        t.ok("Current app partition is first");

        self.stage = Stage::LocateTable;
        let base = self.locate(t).await?;

        self.stage = Stage::ReadTable;
        t.line("Reading partition table...");
        let raw = *self
            .flash
            .read_sector(base)
            .await
            .map_err(|e| t.fail(e))?;
        t.ok("Created local copy of partition table");

        self.stage = Stage::Parse;
        let mut table = PartitionTable::parse(base, raw).map_err(|e| t.fail(e))?;
        for entry in table.entries() {
            t.line(EntryLine(&entry));
        }
        if table.verify_digest() == Some(false) {
            t.line("Table digest does not match, it will be recomputed");
        }

        self.stage = Stage::ValidateShape;
        let primary = table
            .entries()
            .find(|e| e.kind == EntryKind::App)
            .map(|e| e.address);
        if primary.is_some_and(|address| address != running) {
            return Err(t.fail(Error::NotLowestSlot { running, next }));
        }

        self.stage = Stage::Plan;
        let plan = MigrationPlan::new(table.entries(), &self.config, self.flash.capacity())
            .map_err(|e| t.fail(e))?;
        t.ok("Partition layout is supported");

        if plan.is_noop() {
            t.ok("UNNECESSARY: App partitions are already ideal size");
            self.stage = Stage::Done;
            return Ok(Outcome::AlreadyIdeal);
        }
        t.ok("Data partition is large enough to accommodate new app partitions");
        report_plan(&plan, t);

        if mode == Mode::DryRun {
            t.line("Test only, flash left untouched.");
            self.stage = Stage::Done;
            return Ok(Outcome::Planned(plan));
        }

        self.stage = Stage::Apply;
        self.apply(&plan, &mut table, t).await?;

        t.line("Ready...");
        t.line("Partition table updated. Rebooting...");
        self.stage = Stage::Done;

        self.device.delay_ms(self.config.restart_delay_ms).await;
        self.device.restart();

        Ok(Outcome::Restarted)
    }

    async fn locate<S: Sink>(&mut self, t: &mut Transcript<S>) -> Result<u32, Error> {
        t.line("Locating partition table...");
        match self.locator.locate(&mut self.flash).await {
            Ok(Some(base)) => {
                t.ok(format_args!("Partition table at 0x{base:08x}"));
                Ok(base)
            }
            Ok(None) => {
                t.error(Error::TableNotFound);
                diagnostics::search_table(&mut self.flash, SEARCH_WINDOW, t)
                    .await
                    .map_err(|e| t.fail(e))?;
                Err(Error::TableNotFound)
            }
            Err(e) => Err(t.fail(e)),
        }
    }

    /// Rewrite the table, then migrate partition contents from the highest entry down.
    async fn apply<S: Sink>(
        &mut self,
        plan: &MigrationPlan,
        table: &mut PartitionTable,
        t: &mut Transcript<S>,
    ) -> Result<(), Error> {
        plan.apply_to(table);

        t.line("Writing partition table...");
        table
            .commit(&mut self.flash)
            .await
            .map_err(|e| t.fail(e))?;
        t.ok("Partition table rewritten");

        for entry in plan.entries().iter().rev() {
            if let Some((address, len)) = entry.erase_range() {
                t.line(format_args!(
                    "Erasing {} at 0x{address:08x} (0x{len:x} bytes)...",
                    entry.label
                ));
                self.flash
                    .erase(address, len)
                    .await
                    .map_err(|e| t.fail(e))?;
                t.ok(format_args!("Partition {} erased", entry.label));
            }

            if entry.relocate && entry.address() != entry.old_address {
                t.line(format_args!(
                    "Moving {} from 0x{:08x} to 0x{:08x}...",
                    entry.label,
                    entry.old_address,
                    entry.address()
                ));
                for operation in entry.relocations() {
                    self.flash.copy(operation).await.map_err(|e| t.fail(e))?;
                }
                t.ok(format_args!("Partition {} moved", entry.label));
            }
        }

        Ok(())
    }
}

fn report_plan<S: Sink>(plan: &MigrationPlan, t: &mut Transcript<S>) {
    let changed = || plan.entries().iter().filter(|e| e.is_changed());

    for entry in changed() {
        t.line(format_args!(
            "Old: {} partition address: 0x{:08x}, size: 0x{:08x} ({}K)",
            entry.label,
            entry.old_address,
            entry.old_size,
            entry.old_size / 1024
        ));
    }
    for entry in changed() {
        t.line(format_args!(
            "New: {} partition address: 0x{:08x}, size: 0x{:08x} ({}K){}",
            entry.label,
            entry.address(),
            entry.size(),
            entry.size() / 1024,
            action(entry)
        ));
    }
}

fn action(entry: &PlanEntry) -> &'static str {
    match (entry.erase, entry.relocate) {
        (true, _) => ", erase",
        (false, true) => ", move",
        (false, false) => "",
    }
}

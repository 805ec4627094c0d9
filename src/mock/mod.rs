pub mod fixtures;

use std::{string::String, vec, vec::Vec};

use embedded_storage_async::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

use crate::{Device, SECTOR_SIZE, diagnostics::DeviceIdentity, transcript::Sink};

pub use fixtures::TableBuilder;

/// Raw flash primitive as observed by the mock, with address and length.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Op {
    Read(u32, u32),
    Erase(u32, u32),
    Write(u32, u32),
}

impl Op {
    /// Whether this op destroys content somewhere in `[address, address + len)`.
    pub fn clobbers(&self, address: u32, len: u32) -> bool {
        match *self {
            Op::Erase(at, n) | Op::Write(at, n) => at < address + len && address < at + n,
            Op::Read(..) => false,
        }
    }
}

#[derive(Debug)]
pub struct MockFlashError(NorFlashErrorKind);

impl NorFlashError for MockFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        self.0
    }
}

/// NOR flash: erasing sets bytes to `0xff`, writing can only clear bits.
pub struct MockFlash {
    data: Vec<u8>,
    ops: Vec<Op>,
    fail: Option<Op>,
}

impl MockFlash {
    pub fn new(sectors: usize) -> Self {
        Self {
            data: vec![0xff; sectors * SECTOR_SIZE],
            ops: Vec::new(),
            fail: None,
        }
    }

    pub fn load(&mut self, address: u32, bytes: &[u8]) {
        let at = address as usize;
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    pub fn fill_sector(&mut self, sector: usize, byte: u8) {
        self.data[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE].fill(byte);
    }

    /// Give every sector in `[address, address + len)` a distinct content.
    pub fn stamp(&mut self, address: u32, len: u32) {
        for sector_address in (address..address + len).step_by(SECTOR_SIZE) {
            let at = sector_address as usize;
            for (i, byte) in self.data[at..at + SECTOR_SIZE].iter_mut().enumerate() {
                *byte = stamp_byte(sector_address, i);
            }
        }
    }

    pub fn sector(&self, sector: usize) -> &[u8] {
        &self.data[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE]
    }

    pub fn bytes(&self, address: u32, len: u32) -> &[u8] {
        &self.data[address as usize..(address + len) as usize]
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Make exactly this op fail with [`NorFlashErrorKind::Other`].
    pub fn fail_on(&mut self, op: Op) {
        self.fail = Some(op);
    }

    fn record(&mut self, op: Op) -> Result<(), MockFlashError> {
        self.ops.push(op);
        if self.fail == Some(op) {
            return Err(MockFlashError(NorFlashErrorKind::Other));
        }

        let (Op::Read(at, len) | Op::Erase(at, len) | Op::Write(at, len)) = op;
        if (at + len) as usize > self.data.len() {
            return Err(MockFlashError(NorFlashErrorKind::OutOfBounds));
        }
        Ok(())
    }
}

/// Byte `i` of the stamped sector at `sector_address`.
pub fn stamp_byte(sector_address: u32, i: usize) -> u8 {
    let sector = sector_address / SECTOR_SIZE as u32;
    (sector as u8) ^ ((sector >> 8) as u8).rotate_left(4) ^ (i as u8)
}

impl ErrorType for MockFlash {
    type Error = MockFlashError;
}

impl ReadNorFlash for MockFlash {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.record(Op::Read(offset, bytes.len() as u32))?;

        let at = offset as usize;
        bytes.copy_from_slice(&self.data[at..at + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for MockFlash {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = SECTOR_SIZE;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.record(Op::Erase(from, to - from))?;

        if from as usize % SECTOR_SIZE != 0 || to as usize % SECTOR_SIZE != 0 {
            return Err(MockFlashError(NorFlashErrorKind::NotAligned));
        }
        self.data[from as usize..to as usize].fill(0xff);
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.record(Op::Write(offset, bytes.len() as u32))?;

        let at = offset as usize;
        for (cell, byte) in self.data[at..at + bytes.len()].iter_mut().zip(bytes) {
            *cell &= byte;
        }
        Ok(())
    }
}

pub struct MockDevice {
    pub encryption: bool,
    pub setup_mode: bool,
    pub running: u32,
    pub next: u32,
    pub delays: Vec<u32>,
    pub restarts: usize,
}

impl MockDevice {
    pub fn new(running: u32, next: u32) -> Self {
        Self {
            encryption: false,
            setup_mode: false,
            running,
            next,
            delays: Vec::new(),
            restarts: 0,
        }
    }
}

impl Device for MockDevice {
    fn flash_encryption_enabled(&self) -> bool {
        self.encryption
    }

    fn in_setup_mode(&self) -> bool {
        self.setup_mode
    }

    fn running_app_address(&self) -> u32 {
        self.running
    }

    fn next_update_app_address(&self) -> u32 {
        self.next
    }

    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            build: "test",
            sdk_version: "v4.4",
            chip_model: "ESP32-D0WD",
            chip_id: 12345678,
            flash_chip_id: 0x1640ef,
            flash_size: 4 * 1024 * 1024,
            heap_size: 320 * 1024,
            program_size: 1024 * 1024,
        }
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.delays.push(ms);
    }

    fn restart(&mut self) {
        self.restarts += 1;
    }
}

impl Sink for String {
    fn send(&mut self, chunk: &str) {
        self.push_str(chunk);
    }
}

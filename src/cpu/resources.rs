//! The machine's resource model.
//!
//! [`Resources`] owns everything a loaded program can touch: memory, the
//! register file, the device table, and the descriptors of the control
//! sections the loader placed in memory. The loader and the execution
//! engine both operate on a `&mut Resources` handed to them by the owner.

use crate::cpu::device::{DeviceError, DeviceTable, ReadOutcome};
use crate::cpu::memory::Memory;
use crate::cpu::registers::{Register, RegisterError, Registers};
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A linked control section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSection {
    pub name: String,
    /// Absolute load address.
    pub address: u32,
    /// Declared length in bytes.
    pub length: u32,
}

impl ControlSection {
    /// Whether `addr` falls inside this section.
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.address && addr - self.address < self.length
    }
}

/// Memory, registers, devices and control-section metadata.
#[derive(Debug)]
pub struct Resources {
    pub mem: Memory,
    pub regs: Registers,
    devices: DeviceTable,
    sections: BTreeMap<u32, ControlSection>,
    load_base: u32,
    program_start: u32,
}

impl Resources {
    /// Create zeroed resources whose device files live in `device_dir`.
    pub fn new(device_dir: impl Into<PathBuf>) -> Self {
        Self {
            mem: Memory::new(),
            regs: Registers::new(),
            devices: DeviceTable::new(device_dir),
            sections: BTreeMap::new(),
            load_base: 0,
            program_start: 0,
        }
    }

    /// Zero memory and registers, forget every control section and reset
    /// the load base to 0.
    ///
    /// Open devices are left alone; they belong to the session, not the
    /// program image.
    pub fn initialize(&mut self) {
        self.mem.clear();
        self.regs.reset();
        self.sections.clear();
        self.load_base = 0;
        self.program_start = 0;
    }

    #[inline]
    pub fn read_byte(&self, addr: u32) -> u8 {
        self.mem.read_byte(addr)
    }

    #[inline]
    pub fn write_byte(&mut self, addr: u32, value: u8) {
        self.mem.write_byte(addr, value);
    }

    #[inline]
    pub fn read_word(&self, addr: u32) -> i32 {
        self.mem.read_word(addr)
    }

    #[inline]
    pub fn write_word(&mut self, addr: u32, value: i32) {
        self.mem.write_word(addr, value);
    }

    pub fn read_bytes(&self, addr: u32, count: usize) -> Vec<u8> {
        self.mem.read_bytes(addr, count)
    }

    pub fn write_bytes(&mut self, addr: u32, data: &[u8]) {
        self.mem.write_bytes(addr, data);
    }

    pub fn register(&self, reg: Register) -> i32 {
        self.regs.get(reg)
    }

    pub fn set_register(&mut self, reg: Register, value: i32) {
        self.regs.set(reg, value);
    }

    /// Read a register by name, failing for names outside the fixed set.
    pub fn register_by_name(&self, name: &str) -> Result<i32, RegisterError> {
        Ok(self.regs.get(name.parse()?))
    }

    pub fn set_register_by_name(&mut self, name: &str, value: i32) -> Result<(), RegisterError> {
        self.regs.set(name.parse()?, value);
        Ok(())
    }

    pub fn register_by_index(&self, index: u8) -> Result<i32, RegisterError> {
        self.regs.get_index(index)
    }

    pub fn set_register_by_index(&mut self, index: u8, value: i32) -> Result<(), RegisterError> {
        self.regs.set_index(index, value)
    }

    /// Open the named device, setting SW to 1 if it is usable and 0 if not.
    pub fn test_device(&mut self, name: &str) {
        let ready = self.devices.open(name);
        self.regs.sw = i32::from(ready);
    }

    /// Read `count` bytes from an open device.
    ///
    /// A short read zeroes register A and yields [`ReadOutcome::ShortRead`].
    pub fn read_device(&mut self, name: &str, count: usize) -> Result<ReadOutcome, DeviceError> {
        let outcome = self.devices.read(name, count)?;
        if outcome == ReadOutcome::ShortRead {
            self.regs.a = 0;
        }
        Ok(outcome)
    }

    /// Append `data` to an open device, flushing immediately.
    pub fn write_device(&mut self, name: &str, data: &[u8]) -> Result<(), DeviceError> {
        self.devices.write(name, data)
    }

    /// Flush and close every open device.
    pub fn close_devices(&mut self) {
        self.devices.close_all();
    }

    pub fn add_section(&mut self, section: ControlSection) {
        self.sections.insert(section.address, section);
    }

    /// The control section with the greatest load address not above `addr`.
    pub fn section_at(&self, addr: u32) -> Option<&ControlSection> {
        self.sections.range(..=addr).next_back().map(|(_, cs)| cs)
    }

    /// All control sections in load order.
    pub fn sections(&self) -> impl Iterator<Item = &ControlSection> {
        self.sections.values()
    }

    pub fn load_base(&self) -> u32 {
        self.load_base
    }

    pub fn set_load_base(&mut self, base: u32) {
        self.load_base = base;
    }

    pub fn program_start(&self) -> u32 {
        self.program_start
    }

    pub fn set_program_start(&mut self, addr: u32) {
        self.program_start = addr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources() -> (tempfile::TempDir, Resources) {
        let dir = tempfile::tempdir().unwrap();
        let res = Resources::new(dir.path());
        (dir, res)
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (_dir, mut res) = resources();
        res.write_word(0x10, 0x123);
        res.set_register(Register::A, 9);
        res.set_load_base(0x100);
        res.add_section(ControlSection { name: "P".into(), address: 0x100, length: 3 });

        res.initialize();
        res.initialize();

        assert_eq!(res.read_word(0x10), 0);
        assert_eq!(res.regs, Registers::new());
        assert_eq!(res.load_base(), 0);
        assert_eq!(res.sections().count(), 0);
    }

    #[test]
    fn test_register_by_name() {
        let (_dir, mut res) = resources();
        res.set_register_by_name("X", 3).unwrap();
        assert_eq!(res.register_by_name("X").unwrap(), 3);
        assert!(matches!(
            res.register_by_name("Z"),
            Err(RegisterError::UnknownName(_))
        ));
    }

    #[test]
    fn test_device_status() {
        let (dir, mut res) = resources();
        res.test_device("F1");
        assert_eq!(res.regs.sw, 1);

        let mut broken = Resources::new(dir.path().join("nope"));
        broken.regs.sw = 1;
        broken.test_device("F1");
        assert_eq!(broken.regs.sw, 0);
    }

    #[test]
    fn test_short_read_zeroes_a() {
        let (dir, mut res) = resources();
        std::fs::write(dir.path().join("F1"), b"AB").unwrap();
        res.test_device("F1");
        res.regs.a = 77;

        let outcome = res.read_device("F1", 4).unwrap();

        assert_eq!(outcome, ReadOutcome::ShortRead);
        assert_eq!(res.regs.a, 0);
    }

    #[test]
    fn test_section_lookup() {
        let (_dir, mut res) = resources();
        res.add_section(ControlSection { name: "ONE".into(), address: 0x0, length: 0x10 });
        res.add_section(ControlSection { name: "TWO".into(), address: 0x10, length: 0x20 });

        assert_eq!(res.section_at(0x0).unwrap().name, "ONE");
        assert_eq!(res.section_at(0xF).unwrap().name, "ONE");
        assert_eq!(res.section_at(0x10).unwrap().name, "TWO");
        assert!(res.section_at(0x10).unwrap().contains(0x2F));
        assert!(!res.section_at(0x10).unwrap().contains(0x30));
    }
}

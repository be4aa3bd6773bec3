//! Two-pass linking loader.
//!
//! Pass 1 places every control section after the previous one, copies text
//! records into memory, collects each section's defined symbols and notes
//! the entry point. Pass 2 walks the headers again to re-derive the same
//! section addresses and applies every modification record against the
//! symbol tables built in pass 1.

use crate::cpu::memory::bytes_to_word;
use crate::cpu::{ControlSection, Resources};
use crate::loader::record::{ObjectProgram, Record};
use crate::loader::LoadError;
use std::collections::HashMap;
use tracing::{info, trace};

/// Largest field a modification record may patch, in bytes.
const MAX_FIELD_BYTES: u32 = 3;

/// Summary of a completed link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReport {
    /// Sections in load order.
    pub sections: Vec<ControlSection>,
    /// Absolute entry point.
    pub entry_point: u32,
    /// Number of modification records applied.
    pub relocations: usize,
}

impl LinkReport {
    /// Total bytes spanned by all sections.
    pub fn total_length(&self) -> u32 {
        self.sections.iter().map(|cs| cs.length).sum()
    }
}

/// Symbols defined by one control section (name -> absolute address).
#[derive(Debug, Default)]
struct SymbolTable {
    symbols: HashMap<String, u32>,
}

impl SymbolTable {
    fn define(&mut self, name: &str, addr: u32) {
        self.symbols.insert(name.to_string(), addr);
    }

    fn lookup(&self, name: &str) -> Option<u32> {
        self.symbols.get(name).copied()
    }
}

/// The linker state. Lives for one load.
struct Linker {
    base: u32,
    sections: Vec<ControlSection>,
    tables: Vec<SymbolTable>,
    entry_point: Option<u32>,
    explicit_entry: bool,
}

/// Link `program` into `res`, starting at the resources' load base.
pub fn link(res: &mut Resources, program: &ObjectProgram) -> Result<LinkReport, LoadError> {
    let mut linker = Linker::new(res.load_base());
    linker.first_pass(res, program)?;
    let relocations = linker.second_pass(res, program)?;

    let entry_point = linker.entry_point.unwrap_or(linker.base);
    res.set_program_start(entry_point);

    let report = LinkReport {
        sections: linker.sections,
        entry_point,
        relocations,
    };

    info!(
        sections = report.sections.len(),
        length = format_args!("{:04X}", report.total_length()),
        entry = format_args!("{:06X}", report.entry_point),
        relocations,
        "program linked"
    );

    Ok(report)
}

impl Linker {
    fn new(base: u32) -> Self {
        Self {
            base,
            sections: Vec::new(),
            tables: Vec::new(),
            entry_point: None,
            explicit_entry: false,
        }
    }

    /// Address of the section following the last one placed.
    fn next_address(&self, placed: Option<&ControlSection>) -> u32 {
        match placed {
            Some(prev) => prev.address.wrapping_add(prev.length),
            None => self.base,
        }
    }

    fn current(&self, line: usize) -> Result<&ControlSection, LoadError> {
        self.sections.last().ok_or(LoadError::NoControlSection { line })
    }

    fn first_pass(&mut self, res: &mut Resources, program: &ObjectProgram) -> Result<(), LoadError> {
        for (line, record) in &program.records {
            let line = *line;
            match record {
                Record::Header { name, length, .. } => {
                    let address = self.next_address(self.sections.last());
                    let section = ControlSection {
                        name: name.clone(),
                        address,
                        length: *length,
                    };

                    let mut table = SymbolTable::default();
                    table.define(name, address);
                    self.tables.push(table);

                    res.add_section(section.clone());
                    self.sections.push(section);
                }

                Record::Define(symbols) => {
                    let address = self.current(line)?.address;
                    let table = self
                        .tables
                        .last_mut()
                        .ok_or(LoadError::NoControlSection { line })?;
                    for (name, offset) in symbols {
                        table.define(name, address.wrapping_add(*offset));
                    }
                }

                Record::Text { offset, bytes } => {
                    let address = self.current(line)?.address;
                    res.write_bytes(address.wrapping_add(*offset), bytes);
                }

                Record::End { entry } => {
                    let address = self.current(line)?.address;
                    match entry {
                        Some(offset) if !self.explicit_entry => {
                            self.entry_point = Some(self.base.wrapping_add(*offset));
                            self.explicit_entry = true;
                        }
                        None if self.entry_point.is_none() => {
                            self.entry_point = Some(address);
                        }
                        _ => {}
                    }
                }

                Record::Modify { .. } => {}
            }
        }

        Ok(())
    }

    fn second_pass(&self, res: &mut Resources, program: &ObjectProgram) -> Result<usize, LoadError> {
        let mut placed: Vec<ControlSection> = Vec::with_capacity(self.sections.len());
        let mut relocations = 0;

        for (line, record) in &program.records {
            let line = *line;
            match record {
                Record::Header { name, length, .. } => {
                    let address = self.next_address(placed.last());
                    let expected = self
                        .sections
                        .get(placed.len())
                        .ok_or(LoadError::SectionMismatch { line, name: name.clone() })?;
                    if expected.address != address || expected.name != *name {
                        return Err(LoadError::SectionMismatch { line, name: name.clone() });
                    }
                    placed.push(ControlSection {
                        name: name.clone(),
                        address,
                        length: *length,
                    });
                }

                Record::Modify { offset, half_bytes, subtract, symbol } => {
                    let section = placed.last().ok_or(LoadError::NoControlSection { line })?;
                    let value = self.resolve(symbol).ok_or_else(|| LoadError::UnresolvedSymbol {
                        line,
                        symbol: symbol.clone(),
                    })?;

                    let width = (half_bytes + 1) / 2;
                    if width == 0 || width > MAX_FIELD_BYTES {
                        return Err(LoadError::MalformedField {
                            line,
                            field: "modification length",
                            text: format!("{:02X}", half_bytes),
                        });
                    }

                    let addr = section.address.wrapping_add(*offset);
                    let original = bytes_to_word(&res.read_bytes(addr, width as usize));
                    let patched = if *subtract {
                        original.wrapping_sub(value as i32)
                    } else {
                        original.wrapping_add(value as i32)
                    };
                    let encoded = (patched as u32).to_be_bytes();
                    res.write_bytes(addr, &encoded[(4 - width) as usize..]);

                    trace!(
                        addr = format_args!("{:06X}", addr),
                        symbol = %symbol,
                        original = format_args!("{:06X}", original),
                        patched = format_args!("{:06X}", patched & 0xFF_FFFF),
                        "relocated"
                    );
                    relocations += 1;
                }

                _ => {}
            }
        }

        Ok(relocations)
    }

    /// Find a symbol, searching section tables in load order.
    fn resolve(&self, symbol: &str) -> Option<u32> {
        self.tables.iter().find_map(|table| table.lookup(symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::record::parse_object;

    fn resources() -> (tempfile::TempDir, Resources) {
        let dir = tempfile::tempdir().unwrap();
        let res = Resources::new(dir.path());
        (dir, res)
    }

    fn link_str(res: &mut Resources, source: &str) -> Result<LinkReport, LoadError> {
        link(res, &parse_object(source).unwrap())
    }

    #[test]
    fn test_single_section() {
        let (_dir, mut res) = resources();
        let report = link_str(&mut res, "HPROG  000000000006\nT000000060100054B1000\nE\n").unwrap();

        assert_eq!(report.entry_point, 0);
        assert_eq!(report.sections.len(), 1);
        assert_eq!(res.read_bytes(0, 6), vec![0x01, 0x00, 0x05, 0x4B, 0x10, 0x00]);
        assert_eq!(res.regs, crate::cpu::Registers::new());
    }

    #[test]
    fn test_sections_follow_each_other() {
        let (_dir, mut res) = resources();
        res.set_load_base(0x100);
        let source = "\
HONE   000000000010
E000000
HTWO   000000000020
T0000000301AB02
E
HTHREE 000000000005
E
";
        let report = link_str(&mut res, source).unwrap();

        let addrs: Vec<_> = report.sections.iter().map(|cs| cs.address).collect();
        assert_eq!(addrs, vec![0x100, 0x110, 0x130]);
        assert_eq!(res.read_bytes(0x110, 3), vec![0x01, 0xAB, 0x02]);
        assert_eq!(report.entry_point, 0x100);
        assert_eq!(res.program_start(), 0x100);
        assert_eq!(res.section_at(0x12F).unwrap().name, "TWO");
        assert_eq!(report.total_length(), 0x35);
    }

    #[test]
    fn test_modification_with_symbol_from_later_section() {
        let (_dir, mut res) = resources();
        // Section 1 is 0x1000 long, so section 2 loads at 0x1000 and X is
        // defined at its start.
        let source = "\
HMAIN  000000001000
T00000003000005
M00000006+X
E000000
HLIB   000000000010
DX     000000
E
";
        let report = link_str(&mut res, source).unwrap();

        assert_eq!(res.read_word(0), 0x1005);
        assert_eq!(report.relocations, 1);
    }

    #[test]
    fn test_modification_subtracts_and_uses_section_names() {
        let (_dir, mut res) = resources();
        let source = "\
HA     000000000006
T000000060000100000FF
M00000006-B
E
HB     000000000003
E
";
        link_str(&mut res, source).unwrap();
        // B loads at 6
        assert_eq!(res.read_word(0), 0x0A);
    }

    #[test]
    fn test_half_byte_field_keeps_flag_nibble() {
        let (_dir, mut res) = resources();
        // +JSUB with a 20-bit address field patched by a 5 half-byte record
        let source = "\
HMAIN  000000000010
T000000044B100000
M00000105+SUB
E
HSUB   000000000003
E
";
        link_str(&mut res, source).unwrap();
        assert_eq!(res.read_bytes(0, 4), vec![0x4B, 0x10, 0x00, 0x10]);
    }

    #[test]
    fn test_unresolved_symbol_is_fatal() {
        let (_dir, mut res) = resources();
        let err = link_str(&mut res, "HP     000000000003\nM00000006+NOPE\nE\n").unwrap_err();
        assert_eq!(err, LoadError::UnresolvedSymbol { line: 2, symbol: "NOPE".into() });
    }

    #[test]
    fn test_record_before_header() {
        let (_dir, mut res) = resources();
        let err = link_str(&mut res, "T0000000100\n").unwrap_err();
        assert_eq!(err, LoadError::NoControlSection { line: 1 });
    }

    #[test]
    fn test_oversized_modification_field() {
        let (_dir, mut res) = resources();
        let err = link_str(&mut res, "HP     000000000003\nM00000008+P\nE\n").unwrap_err();
        assert!(matches!(err, LoadError::MalformedField { field: "modification length", .. }));
    }
}

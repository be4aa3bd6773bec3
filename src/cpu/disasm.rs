//! Disassembler for SIC/XE programs in memory.
//!
//! Renders instructions back to readable assembly, using the usual
//! operand prefixes: `#` immediate, `@` indirect, `+` extended format,
//! and a `,X` suffix for indexed addressing.

use crate::cpu::decode::{register_fields, Flags, Opcode, FORMAT2_LEN};
use crate::cpu::memory::Memory;
use crate::cpu::registers::Register;

/// Disassemble the instruction at `addr`.
///
/// Returns the text and the instruction length. Bytes that are not a
/// known opcode render as a `BYTE` directive of length 1.
pub fn disassemble_instruction(mem: &Memory, addr: u32) -> (String, u32) {
    let byte1 = mem.read_byte(addr);
    let Some(opcode) = Opcode::from_byte(byte1) else {
        return (format!("BYTE X'{:02X}'", byte1), 1);
    };

    let byte2 = mem.read_byte(addr.wrapping_add(1));

    if opcode.is_register_format() {
        let (r1, r2) = register_fields(byte2);
        let text = match opcode {
            Opcode::Compr => format!("{} {},{}", opcode, format_register(r1), format_register(r2)),
            _ => format!("{} {}", opcode, format_register(r1)),
        };
        return (text, FORMAT2_LEN);
    }

    let flags = Flags::from_bytes(byte1, byte2);
    let length = flags.length();
    let plus = if flags.e { "+" } else { "" };

    if opcode == Opcode::Rsub {
        return (format!("{plus}{opcode}"), length);
    }

    let mut disp = ((byte2 as u32 & 0x0F) << 8) | mem.read_byte(addr.wrapping_add(2)) as u32;
    if flags.e {
        disp = (disp << 8) | mem.read_byte(addr.wrapping_add(3)) as u32;
    }

    let prefix = if flags.is_immediate() {
        "#"
    } else if flags.is_indirect() {
        "@"
    } else {
        ""
    };
    let base = if flags.b {
        "(B)"
    } else if flags.p {
        "(PC)"
    } else {
        ""
    };
    let index = if flags.x { ",X" } else { "" };
    let width = if flags.e { 5 } else { 3 };

    (
        format!("{plus}{opcode} {prefix}{disp:0width$X}{base}{index}"),
        length,
    )
}

/// Disassemble `len` bytes starting at `start`.
pub fn disassemble(mem: &Memory, start: u32, len: u32) -> String {
    let mut output = String::new();
    let mut offset = 0;

    while offset < len {
        let addr = start.wrapping_add(offset);
        let (text, size) = disassemble_instruction(mem, addr);
        let bytes: String = mem
            .read_bytes(addr, size as usize)
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect();
        output.push_str(&format!("{:06X}: {:<8} {}\n", addr, bytes, text));
        offset += size;
    }

    output
}

fn format_register(index: u8) -> String {
    match Register::from_index(index) {
        Ok(reg) => reg.to_string(),
        Err(_) => format!("r{}", index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(bytes: &[u8]) -> Memory {
        let mut mem = Memory::new();
        mem.write_bytes(0, bytes);
        mem
    }

    #[test]
    fn test_disassemble_immediate() {
        let (text, len) = disassemble_instruction(&memory(&[0x01, 0x00, 0x05]), 0);
        assert_eq!(text, "LDA #005");
        assert_eq!(len, 3);
    }

    #[test]
    fn test_disassemble_extended() {
        let (text, len) = disassemble_instruction(&memory(&[0x4B, 0x10, 0x10, 0x36]), 0);
        assert_eq!(text, "+JSUB 01036");
        assert_eq!(len, 4);
    }

    #[test]
    fn test_disassemble_indexed_pc_relative() {
        let (text, _) = disassemble_instruction(&memory(&[0x57, 0xA0, 0x10]), 0);
        assert_eq!(text, "STCH 010(PC),X");
    }

    #[test]
    fn test_disassemble_register_format() {
        let (text, len) = disassemble_instruction(&memory(&[0xA0, 0x15]), 0);
        assert_eq!(text, "COMPR X,T");
        assert_eq!(len, 2);

        let (text, _) = disassemble_instruction(&memory(&[0xB4, 0x70]), 0);
        assert_eq!(text, "CLEAR r7");
    }

    #[test]
    fn test_disassemble_rsub_and_data() {
        let (text, _) = disassemble_instruction(&memory(&[0x4F, 0x00, 0x00]), 0);
        assert_eq!(text, "RSUB");

        let (text, len) = disassemble_instruction(&memory(&[0xFF]), 0);
        assert_eq!(text, "BYTE X'FF'");
        assert_eq!(len, 1);
    }

    #[test]
    fn test_disassemble_listing() {
        let listing = disassemble(&memory(&[0x01, 0x00, 0x05, 0xB4, 0x40]), 0, 5);
        let lines: Vec<_> = listing.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("000000: 010005"));
        assert!(lines[1].contains("CLEAR S"));
    }
}

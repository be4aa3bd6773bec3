//! Instruction decoder for SIC/XE.
//!
//! The first byte of every instruction carries the opcode in its high six
//! bits and the `n`/`i` addressing flags in its low two. Format-3 and
//! format-4 instructions follow with `x b p e` flags and a 12-bit (format 3)
//! or 20-bit (format 4) displacement. Format-2 instructions carry two
//! 4-bit register numbers in their second byte instead.

use crate::cpu::resources::Resources;
use serde::{Serialize, Deserialize};
use std::fmt;
use thiserror::Error;

/// Byte length of a format-2 (register-to-register) instruction.
pub const FORMAT2_LEN: u32 = 2;

/// The modeled opcodes.
///
/// Each variant's discriminant is the opcode byte with the `n`/`i` bits
/// clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // ==================== Load / Store ====================
    Lda = 0x00,
    Sta = 0x0C,
    Stx = 0x10,
    Stl = 0x14,
    Ldch = 0x50,
    Stch = 0x54,
    Ldb = 0x68,
    Ldt = 0x74,

    // ==================== Compare ====================
    Comp = 0x28,

    // ==================== Control Flow ====================
    Jeq = 0x30,
    Jlt = 0x38,
    J = 0x3C,
    Jsub = 0x48,
    Rsub = 0x4C,

    // ==================== Register (format 2) ====================
    Compr = 0xA0,
    Clear = 0xB4,
    Tixr = 0xB8,

    // ==================== Device I/O ====================
    Rd = 0xD8,
    Wd = 0xDC,
    Td = 0xE0,
}

impl Opcode {
    /// Every modeled opcode.
    pub const ALL: [Opcode; 20] = [
        Opcode::Lda,
        Opcode::Sta,
        Opcode::Stx,
        Opcode::Stl,
        Opcode::Ldch,
        Opcode::Stch,
        Opcode::Ldb,
        Opcode::Ldt,
        Opcode::Comp,
        Opcode::Jeq,
        Opcode::Jlt,
        Opcode::J,
        Opcode::Jsub,
        Opcode::Rsub,
        Opcode::Compr,
        Opcode::Clear,
        Opcode::Tixr,
        Opcode::Rd,
        Opcode::Wd,
        Opcode::Td,
    ];

    /// Look up the opcode of an instruction's first byte.
    ///
    /// The low two bits (`n`, `i`) are ignored.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let op = byte & 0xFC;
        Self::ALL.into_iter().find(|code| *code as u8 == op)
    }

    /// The opcode byte with the `n`/`i` bits clear.
    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Lda => "LDA",
            Opcode::Sta => "STA",
            Opcode::Stx => "STX",
            Opcode::Stl => "STL",
            Opcode::Ldch => "LDCH",
            Opcode::Stch => "STCH",
            Opcode::Ldb => "LDB",
            Opcode::Ldt => "LDT",
            Opcode::Comp => "COMP",
            Opcode::Jeq => "JEQ",
            Opcode::Jlt => "JLT",
            Opcode::J => "J",
            Opcode::Jsub => "JSUB",
            Opcode::Rsub => "RSUB",
            Opcode::Compr => "COMPR",
            Opcode::Clear => "CLEAR",
            Opcode::Tixr => "TIXR",
            Opcode::Rd => "RD",
            Opcode::Wd => "WD",
            Opcode::Td => "TD",
        }
    }

    /// Whether this is a 2-byte register-to-register instruction.
    pub fn is_register_format(self) -> bool {
        matches!(self, Opcode::Compr | Opcode::Clear | Opcode::Tixr)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// The six addressing flag bits of a format-3/4 instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Flags {
    pub n: bool,
    pub i: bool,
    pub x: bool,
    pub b: bool,
    pub p: bool,
    pub e: bool,
}

impl Flags {
    /// Extract the flags from the first two instruction bytes.
    pub fn from_bytes(byte1: u8, byte2: u8) -> Self {
        Self {
            n: byte1 & 0x02 != 0,
            i: byte1 & 0x01 != 0,
            x: byte2 & 0x80 != 0,
            b: byte2 & 0x40 != 0,
            p: byte2 & 0x20 != 0,
            e: byte2 & 0x10 != 0,
        }
    }

    /// Immediate addressing: `n=0, i=1`.
    pub fn is_immediate(&self) -> bool {
        !self.n && self.i
    }

    /// Indirect addressing: `n=1, i=0`.
    pub fn is_indirect(&self) -> bool {
        self.n && !self.i
    }

    /// Instruction length in bytes: 4 when extended, else 3.
    pub fn length(&self) -> u32 {
        if self.e { 4 } else { 3 }
    }
}

/// The result of resolving a format-3/4 operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    /// Effective address, or the operand value itself when immediate.
    pub target: i32,
    /// Whether `target` is an immediate value rather than an address.
    pub immediate: bool,
    /// Instruction length in bytes (3 or 4).
    pub length: u32,
}

impl Operand {
    /// The effective address as a memory address.
    #[inline]
    pub fn addr(&self) -> u32 {
        self.target as u32
    }
}

/// Sign-extend the low `bits` bits of `value`.
pub fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Resolve the operand of the format-3/4 instruction fetched at `pc`.
///
/// Steps, in order:
/// 1. Immediate (`n=0, i=1`): the raw displacement is the operand.
/// 2. A 12-bit displacement is sign-extended when used relative to B or PC.
/// 3. Base: `B + disp` if `b`, else `PC + length + disp` if `p`, else `disp`.
/// 4. `X` is added when `x` is set, except under pure indirection.
/// 5. Indirect (`n=1, i=0`): the word at the address is the effective address.
pub fn decode_operand(res: &Resources, pc: u32) -> Operand {
    let byte1 = res.read_byte(pc);
    let byte2 = res.read_byte(pc.wrapping_add(1));
    let byte3 = res.read_byte(pc.wrapping_add(2));
    let flags = Flags::from_bytes(byte1, byte2);
    let length = flags.length();

    let mut disp = ((byte2 as u32 & 0x0F) << 8) | byte3 as u32;
    if flags.e {
        disp = (disp << 8) | res.read_byte(pc.wrapping_add(3)) as u32;
    }

    if flags.is_immediate() {
        return Operand { target: disp as i32, immediate: true, length };
    }

    let disp = if !flags.e && (flags.b || flags.p) {
        sign_extend(disp, 12)
    } else {
        disp as i32
    };

    let mut target = if flags.b {
        res.regs.b.wrapping_add(disp)
    } else if flags.p {
        (pc.wrapping_add(length) as i32).wrapping_add(disp)
    } else {
        disp
    };

    if flags.x && !flags.is_indirect() {
        target = target.wrapping_add(res.regs.x);
    }

    if flags.is_indirect() {
        target = res.read_word(target as u32);
    }

    Operand { target, immediate: false, length }
}

/// Split a format-2 second byte into its two register numbers.
pub fn register_fields(byte2: u8) -> (u8, u8) {
    (byte2 >> 4, byte2 & 0x0F)
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode {opcode:02X} at {pc:06X}")]
    UnknownOpcode { opcode: u8, pc: u32 },
}

//! SIC/XE CPU registers.
//!
//! The machine has nine registers:
//! - A: accumulator
//! - X: index register
//! - L: linkage register (return address of JSUB)
//! - B: base register for base-relative addressing
//! - S, T: general-purpose registers
//! - F: floating-point accumulator (storage only, no float arithmetic)
//! - PC: program counter
//! - SW: status word, holds the condition code (-1 / 0 / 1)
//!
//! Format-2 instructions name registers by a 4-bit number; the numbering
//! is A=0, X=1, L=2, B=3, S=4, T=5, F=6, PC=8, SW=9. Number 7 is unused.

use serde::{Serialize, Deserialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A register name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register {
    A,
    X,
    L,
    B,
    S,
    T,
    F,
    PC,
    SW,
}

impl Register {
    /// Every register, in register-number order.
    pub const ALL: [Register; 9] = [
        Register::A,
        Register::X,
        Register::L,
        Register::B,
        Register::S,
        Register::T,
        Register::F,
        Register::PC,
        Register::SW,
    ];

    /// Look up a register by its format-2 register number.
    pub fn from_index(index: u8) -> Result<Self, RegisterError> {
        match index {
            0 => Ok(Register::A),
            1 => Ok(Register::X),
            2 => Ok(Register::L),
            3 => Ok(Register::B),
            4 => Ok(Register::S),
            5 => Ok(Register::T),
            6 => Ok(Register::F),
            8 => Ok(Register::PC),
            9 => Ok(Register::SW),
            _ => Err(RegisterError::UnknownIndex(index)),
        }
    }

    /// The format-2 register number.
    pub fn index(self) -> u8 {
        match self {
            Register::A => 0,
            Register::X => 1,
            Register::L => 2,
            Register::B => 3,
            Register::S => 4,
            Register::T => 5,
            Register::F => 6,
            Register::PC => 8,
            Register::SW => 9,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::A => "A",
            Register::X => "X",
            Register::L => "L",
            Register::B => "B",
            Register::S => "S",
            Register::T => "T",
            Register::F => "F",
            Register::PC => "PC",
            Register::SW => "SW",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Register {
    type Err = RegisterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Register::ALL
            .into_iter()
            .find(|reg| reg.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RegisterError::UnknownName(s.to_string()))
    }
}

/// The SIC/XE register file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Registers {
    pub a: i32,
    pub x: i32,
    pub l: i32,
    pub b: i32,
    pub s: i32,
    pub t: i32,

    /// F: 48-bit floating-point accumulator. Reserved; no modeled
    /// instruction computes with it.
    pub f: f64,

    pub pc: i32,

    /// SW: status word. Compare instructions leave -1 (less), 0 (equal)
    /// or 1 (greater) here.
    pub sw: i32,
}

impl Registers {
    /// Create a new register file with all values zeroed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all registers to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Read a register as an integer.
    ///
    /// F is converted from its floating-point slot, truncating toward zero.
    pub fn get(&self, reg: Register) -> i32 {
        match reg {
            Register::A => self.a,
            Register::X => self.x,
            Register::L => self.l,
            Register::B => self.b,
            Register::S => self.s,
            Register::T => self.t,
            Register::F => self.f as i32,
            Register::PC => self.pc,
            Register::SW => self.sw,
        }
    }

    pub fn set(&mut self, reg: Register, value: i32) {
        match reg {
            Register::A => self.a = value,
            Register::X => self.x = value,
            Register::L => self.l = value,
            Register::B => self.b = value,
            Register::S => self.s = value,
            Register::T => self.t = value,
            Register::F => self.f = value as f64,
            Register::PC => self.pc = value,
            Register::SW => self.sw = value,
        }
    }

    /// Read a register by its format-2 register number.
    pub fn get_index(&self, index: u8) -> Result<i32, RegisterError> {
        Ok(self.get(Register::from_index(index)?))
    }

    /// Write a register by its format-2 register number.
    pub fn set_index(&mut self, index: u8, value: i32) -> Result<(), RegisterError> {
        self.set(Register::from_index(index)?, value);
        Ok(())
    }

    /// Set SW to the three-valued comparison of `lhs` against `rhs`.
    pub fn set_condition(&mut self, lhs: i32, rhs: i32) {
        self.sw = match lhs.cmp(&rhs) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        };
    }
}

/// Errors raised when addressing a register outside the fixed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("unknown register: {0}")]
    UnknownName(String),

    #[error("unknown register number: {0}")]
    UnknownIndex(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_roundtrip() {
        for reg in Register::ALL {
            assert_eq!(Register::from_index(reg.index()).unwrap(), reg);
        }
    }

    #[test]
    fn test_unknown_index() {
        assert_eq!(Register::from_index(7), Err(RegisterError::UnknownIndex(7)));
        assert_eq!(Register::from_index(10), Err(RegisterError::UnknownIndex(10)));
    }

    #[test]
    fn test_parse_name() {
        assert_eq!("pc".parse::<Register>().unwrap(), Register::PC);
        assert_eq!("SW".parse::<Register>().unwrap(), Register::SW);
        assert!(matches!(
            "Q".parse::<Register>(),
            Err(RegisterError::UnknownName(name)) if name == "Q"
        ));
    }

    #[test]
    fn test_get_set_by_index() {
        let mut regs = Registers::new();
        regs.set_index(5, 42).unwrap();
        assert_eq!(regs.t, 42);
        assert_eq!(regs.get_index(5).unwrap(), 42);
        assert!(regs.set_index(7, 1).is_err());
    }

    #[test]
    fn test_condition() {
        let mut regs = Registers::new();

        regs.set_condition(5, 5);
        assert_eq!(regs.sw, 0);

        regs.set_condition(3, 5);
        assert_eq!(regs.sw, -1);

        regs.set_condition(7, 5);
        assert_eq!(regs.sw, 1);
    }

    #[test]
    fn test_float_slot_integer_view() {
        let mut regs = Registers::new();
        regs.set(Register::F, 12);
        assert_eq!(regs.f, 12.0);
        assert_eq!(regs.get(Register::F), 12);
    }
}

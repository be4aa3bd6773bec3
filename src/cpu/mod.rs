//! CPU emulation for the SIC/XE machine.
//!
//! This module implements the machine's resources and its instruction set:
//! - 64 KiB of byte-addressable memory with 3-byte big-endian words
//! - 9 registers: A, X, L, B, S, T, F (reserved), PC, SW
//! - file-backed devices for TD/RD/WD
//! - 20 instructions across formats 2, 3 and 4

pub mod memory;
pub mod registers;
pub mod device;
pub mod resources;
pub mod decode;
pub mod execute;
pub mod disasm;

pub use memory::Memory;
pub use registers::{Register, RegisterError, Registers};
pub use device::{DeviceError, DeviceTable, ReadOutcome};
pub use resources::{ControlSection, Resources};
pub use decode::{DecodeError, Flags, Opcode, Operand};
pub use execute::{step, CpuError, StepReport};

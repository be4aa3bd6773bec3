//! # SIC/XE Simulator
//!
//! An emulator of the SIC/XE instructional machine together with the
//! relocating linking loader that places object programs in its memory.
//!
//! The crate is built from three layers:
//! - [`cpu`]: memory, registers, devices and the instruction engine
//! - [`loader`]: the H/D/T/M/E object format and the two-pass linker
//! - [`machine`]: the step controller that loads a program and runs it

pub mod cpu;
pub mod loader;
pub mod machine;
pub mod config;

// Re-export commonly used types
pub use cpu::{ControlSection, CpuError, Memory, Opcode, Register, Registers, Resources, StepReport};
pub use loader::{load, load_file, LinkReport, LoadError};
pub use machine::{Machine, MachineError, MachineSnapshot, MachineState};
pub use config::{MachineConfig, StartPolicy};

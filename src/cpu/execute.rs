//! CPU execution engine for SIC/XE.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.
//! The engine keeps no state of its own: every step reads and mutates the
//! [`Resources`] it is handed and reports what it did in a [`StepReport`].

use crate::cpu::decode::{self, DecodeError, Opcode, Operand, FORMAT2_LEN};
use crate::cpu::device::{DeviceError, ReadOutcome};
use crate::cpu::registers::{Register, RegisterError};
use crate::cpu::resources::Resources;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::debug;

/// What a single step did, for the caller's trace and display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// The instruction that ran.
    pub opcode: Opcode,
    /// Address the instruction was fetched from.
    pub pc: u32,
    /// Instruction length in bytes.
    pub length: u32,
    /// Resolved effective address (or immediate value); 0 for register-only
    /// instructions and RSUB.
    pub target: i32,
    /// Device touched by TD/RD/WD.
    pub device: Option<String>,
}

impl StepReport {
    pub fn mnemonic(&self) -> &'static str {
        self.opcode.mnemonic()
    }
}

/// Execute the instruction at the current PC.
///
/// An unknown opcode fails before any state is touched.
pub fn step(res: &mut Resources) -> Result<StepReport, CpuError> {
    // Fetch
    let pc = res.regs.pc as u32;
    let byte1 = res.read_byte(pc);

    // Decode
    let opcode = Opcode::from_byte(byte1).ok_or(DecodeError::UnknownOpcode {
        opcode: byte1 & 0xFC,
        pc,
    })?;

    // Execute
    let report = match opcode {
        // ==================== Load / Store ====================

        Opcode::Lda => with_operand(res, opcode, pc, |res, op, _| {
            res.regs.a = load_word(res, op);
            Ok(Flow::Next)
        })?,
        Opcode::Ldb => with_operand(res, opcode, pc, |res, op, _| {
            res.regs.b = load_word(res, op);
            Ok(Flow::Next)
        })?,
        Opcode::Ldt => with_operand(res, opcode, pc, |res, op, _| {
            res.regs.t = load_word(res, op);
            Ok(Flow::Next)
        })?,

        Opcode::Ldch => with_operand(res, opcode, pc, |res, op, _| {
            res.regs.a = if op.immediate {
                op.target & 0xFF
            } else {
                res.read_byte(op.addr()) as i32
            };
            Ok(Flow::Next)
        })?,

        Opcode::Sta => with_operand(res, opcode, pc, |res, op, _| store_word(res, op, Register::A))?,
        Opcode::Stx => with_operand(res, opcode, pc, |res, op, _| store_word(res, op, Register::X))?,
        Opcode::Stl => with_operand(res, opcode, pc, |res, op, _| store_word(res, op, Register::L))?,

        Opcode::Stch => with_operand(res, opcode, pc, |res, op, _| {
            let value = (res.regs.a & 0xFF) as u8;
            res.write_byte(op.addr(), value);
            Ok(Flow::Next)
        })?,

        // ==================== Compare ====================

        Opcode::Comp => with_operand(res, opcode, pc, |res, op, _| {
            let value = load_word(res, op);
            res.regs.set_condition(res.regs.a, value);
            Ok(Flow::Next)
        })?,

        Opcode::Compr => with_registers(res, opcode, pc, |res, r1, r2| {
            let lhs = res.register_by_index(r1)?;
            let rhs = res.register_by_index(r2)?;
            res.regs.set_condition(lhs, rhs);
            Ok(())
        })?,

        // ==================== Control Flow ====================

        Opcode::J => with_operand(res, opcode, pc, |_, op, _| Ok(Flow::Jump(op.target)))?,

        Opcode::Jeq => with_operand(res, opcode, pc, |res, op, _| {
            Ok(if res.regs.sw == 0 { Flow::Jump(op.target) } else { Flow::Next })
        })?,

        Opcode::Jlt => with_operand(res, opcode, pc, |res, op, _| {
            Ok(if res.regs.sw < 0 { Flow::Jump(op.target) } else { Flow::Next })
        })?,

        Opcode::Jsub => with_operand(res, opcode, pc, |res, op, next| {
            res.regs.l = next;
            Ok(Flow::Jump(op.target))
        })?,

        Opcode::Rsub => {
            // Only the e bit matters; the operand is never resolved.
            let extended = res.read_byte(pc.wrapping_add(1)) & 0x10 != 0;
            res.regs.pc = res.regs.l;
            StepReport {
                opcode,
                pc,
                length: if extended { 4 } else { 3 },
                target: 0,
                device: None,
            }
        }

        // ==================== Register ====================

        Opcode::Clear => with_registers(res, opcode, pc, |res, r1, _| {
            res.set_register_by_index(r1, 0)?;
            Ok(())
        })?,

        Opcode::Tixr => with_registers(res, opcode, pc, |res, r1, _| {
            let reg = Register::from_index(r1)?;
            res.regs.x = res.regs.x.wrapping_add(1);
            let bound = res.register(reg);
            res.regs.set_condition(res.regs.x, bound);
            Ok(())
        })?,

        // ==================== Device I/O ====================

        Opcode::Td => with_operand(res, opcode, pc, |res, op, _| {
            let name = device_name(res, op);
            res.test_device(&name);
            Ok(Flow::Device(name))
        })?,

        Opcode::Rd => with_operand(res, opcode, pc, |res, op, _| {
            let name = device_name(res, op);
            if let ReadOutcome::Data(data) = res.read_device(&name, 1)? {
                res.regs.a = data[0] as i8 as i32;
            }
            Ok(Flow::Device(name))
        })?,

        Opcode::Wd => with_operand(res, opcode, pc, |res, op, _| {
            let name = device_name(res, op);
            let value = (res.regs.a & 0xFF) as u8;
            res.write_device(&name, &[value])?;
            Ok(Flow::Device(name))
        })?,
    };

    debug!(
        pc = format_args!("{:06X}", report.pc),
        mnemonic = report.mnemonic(),
        target = format_args!("{:06X}", report.target),
        "executed"
    );

    Ok(report)
}

/// Where a format-3/4 handler sends PC.
enum Flow {
    /// Fall through to the next instruction.
    Next,
    Jump(i32),
    /// Fall through, having touched the named device.
    Device(String),
}

/// Run a format-2 handler on the instruction's two register numbers.
fn with_registers<F>(res: &mut Resources, opcode: Opcode, pc: u32, exec: F) -> Result<StepReport, CpuError>
where
    F: FnOnce(&mut Resources, u8, u8) -> Result<(), CpuError>,
{
    let (r1, r2) = decode::register_fields(res.read_byte(pc.wrapping_add(1)));
    exec(res, r1, r2)?;
    res.regs.pc = pc.wrapping_add(FORMAT2_LEN) as i32;

    Ok(StepReport {
        opcode,
        pc,
        length: FORMAT2_LEN,
        target: 0,
        device: None,
    })
}

/// Resolve the operand, run a format-3/4 handler, then move PC.
///
/// The handler also receives the address of the next instruction.
fn with_operand<F>(res: &mut Resources, opcode: Opcode, pc: u32, exec: F) -> Result<StepReport, CpuError>
where
    F: FnOnce(&mut Resources, &Operand, i32) -> Result<Flow, CpuError>,
{
    let operand = decode::decode_operand(res, pc);
    let next = pc.wrapping_add(operand.length) as i32;

    let (new_pc, device) = match exec(res, &operand, next)? {
        Flow::Next => (next, None),
        Flow::Jump(target) => (target, None),
        Flow::Device(name) => (next, Some(name)),
    };
    res.regs.pc = new_pc;

    Ok(StepReport {
        opcode,
        pc,
        length: operand.length,
        target: operand.target,
        device,
    })
}

/// Fetch a word operand: the immediate value itself, or the word at the
/// effective address.
fn load_word(res: &Resources, operand: &Operand) -> i32 {
    if operand.immediate {
        operand.target
    } else {
        res.read_word(operand.addr())
    }
}

fn store_word(res: &mut Resources, operand: &Operand, reg: Register) -> Result<Flow, CpuError> {
    let value = res.register(reg);
    res.write_word(operand.addr(), value);
    Ok(Flow::Next)
}

/// The device named by the byte at the effective address, as two hex digits.
fn device_name(res: &Resources, operand: &Operand) -> String {
    format!("{:02X}", res.read_byte(operand.addr()))
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Error)]
pub enum CpuError {
    #[error("decode error: {0}")]
    DecodeError(#[from] DecodeError),

    #[error("register error: {0}")]
    RegisterError(#[from] RegisterError),

    #[error("device error: {0}")]
    DeviceError(#[from] DeviceError),
}

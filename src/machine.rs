//! Step controller.
//!
//! [`Machine`] owns the resources, loads one object program into them, and
//! then drives the execution engine one instruction at a time, keeping a
//! trace of executed mnemonics and the side-channel facts of the last step.

use crate::config::{MachineConfig, StartPolicy};
use crate::cpu::memory::MEMORY_SIZE;
use crate::cpu::{self, ControlSection, CpuError, Registers, Resources, StepReport};
use crate::loader::{self, LinkReport, LoadError};
use serde::{Serialize, Deserialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Machine execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    /// Nothing loaded yet.
    Idle,
    /// A program is loaded and runnable.
    Running,
    /// PC returned to 0 or left memory.
    Halted,
    /// The last step failed.
    Error,
}

/// A serializable view of the machine after a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub state: MachineState,
    pub steps: u64,
    pub registers: Registers,
    pub section: Option<ControlSection>,
    pub last_step: Option<StepReport>,
    pub trace: Vec<String>,
}

/// The SIC/XE machine.
#[derive(Debug)]
pub struct Machine {
    res: Resources,
    config: MachineConfig,
    state: MachineState,
    /// Instructions executed since the last load.
    steps: u64,
    last_step: Option<StepReport>,
    /// Load address of the section that owned PC at the last step.
    current_section: Option<u32>,
    trace: Vec<String>,
    link: Option<LinkReport>,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            res: Resources::new(config.device_dir.clone()),
            config,
            state: MachineState::Idle,
            steps: 0,
            last_step: None,
            current_section: None,
            trace: Vec::new(),
            link: None,
        }
    }

    /// Reset all resources, then link and load object program text.
    pub fn load_str(&mut self, source: &str) -> Result<&LinkReport, MachineError> {
        self.reset();
        let result = loader::load(&mut self.res, source);
        self.finish_load(result)
    }

    /// Reset all resources, then link and load an object program file.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<&LinkReport, MachineError> {
        self.reset();
        let result = loader::load_file(&mut self.res, path);
        self.finish_load(result)
    }

    fn reset(&mut self) {
        self.res.initialize();
        self.res.set_load_base(self.config.load_base);
        self.state = MachineState::Idle;
        self.steps = 0;
        self.last_step = None;
        self.current_section = None;
        self.trace.clear();
        self.link = None;
    }

    fn finish_load(
        &mut self,
        result: Result<LinkReport, LoadError>,
    ) -> Result<&LinkReport, MachineError> {
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                self.state = MachineState::Error;
                return Err(e.into());
            }
        };

        let start = match self.config.start {
            StartPolicy::LoadBase => self.config.load_base,
            StartPolicy::EntryPoint => report.entry_point,
        };
        self.res.regs.pc = start as i32;
        self.current_section = self.res.section_at(start).map(|cs| cs.address);

        if start as usize >= MEMORY_SIZE {
            warn!(start = format_args!("{:06X}", start), "start address outside memory");
            self.state = MachineState::Halted;
        } else {
            info!(start = format_args!("{:06X}", start), "program loaded");
            self.state = MachineState::Running;
        }

        Ok(&*self.link.insert(report))
    }

    /// Execute one instruction.
    ///
    /// Once the machine is no longer runnable this does nothing except
    /// release open devices, and returns `Ok(None)`.
    pub fn step(&mut self) -> Result<Option<&StepReport>, MachineError> {
        if self.state != MachineState::Running {
            self.res.close_devices();
            return Ok(None);
        }

        let pc = self.res.regs.pc as u32;
        self.current_section = self.res.section_at(pc).map(|cs| cs.address);

        let report = match cpu::step(&mut self.res) {
            Ok(report) => report,
            Err(e) => {
                self.state = MachineState::Error;
                self.last_step = None;
                return Err(e.into());
            }
        };

        self.steps += 1;
        self.trace.push(report.mnemonic().to_string());

        if self.is_halt_address(self.res.regs.pc) {
            debug!(pc = self.res.regs.pc, steps = self.steps, "machine halted");
            self.state = MachineState::Halted;
        }

        Ok(Some(&*self.last_step.insert(report)))
    }

    /// Run until PC returns to 0 or leaves memory.
    ///
    /// Returns the number of instructions executed.
    pub fn run(&mut self) -> Result<u64, MachineError> {
        let start_steps = self.steps;

        while self.state == MachineState::Running {
            self.step()?;
        }

        Ok(self.steps - start_steps)
    }

    /// Run for at most `max_steps` instructions.
    pub fn run_limited(&mut self, max_steps: u64) -> Result<u64, MachineError> {
        let start_steps = self.steps;
        let limit = self.steps + max_steps;

        while self.state == MachineState::Running && self.steps < limit {
            self.step()?;
        }

        Ok(self.steps - start_steps)
    }

    fn is_halt_address(&self, pc: i32) -> bool {
        pc <= 0 || pc as usize >= MEMORY_SIZE
    }

    /// Flush and close every open device.
    pub fn shutdown(&mut self) {
        self.res.close_devices();
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn is_runnable(&self) -> bool {
        self.state == MachineState::Running
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn registers(&self) -> &Registers {
        &self.res.regs
    }

    /// Copy `count` bytes of memory starting at `start`.
    pub fn memory(&self, start: u32, count: usize) -> Vec<u8> {
        self.res.read_bytes(start, count)
    }

    pub fn resources(&self) -> &Resources {
        &self.res
    }

    /// The section that owned PC when the last instruction was fetched.
    pub fn current_section(&self) -> Option<&ControlSection> {
        self.current_section.and_then(|addr| self.res.section_at(addr))
    }

    pub fn last_step(&self) -> Option<&StepReport> {
        self.last_step.as_ref()
    }

    /// Mnemonics executed since the last load, oldest first.
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub fn link_report(&self) -> Option<&LinkReport> {
        self.link.as_ref()
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            state: self.state,
            steps: self.steps,
            registers: self.res.regs.clone(),
            section: self.current_section().cloned(),
            last_step: self.last_step.clone(),
            trace: self.trace.clone(),
        }
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}

/// Errors that stop the machine.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    #[error("CPU error: {0}")]
    Cpu(#[from] CpuError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::DecodeError;

    fn machine() -> (tempfile::TempDir, Machine) {
        let dir = tempfile::tempdir().unwrap();
        let config = MachineConfig {
            device_dir: dir.path().to_path_buf(),
            ..MachineConfig::default()
        };
        (dir, Machine::new(config))
    }

    #[test]
    fn test_load_sets_pc_to_load_base() {
        let (_dir, mut machine) = machine();
        machine.load_str("HPROG  000000000003\nT00000003010005\nE\n").unwrap();

        assert!(machine.is_runnable());
        assert_eq!(machine.registers(), &Registers::new());
        assert_eq!(machine.current_section().unwrap().name, "PROG");
    }

    #[test]
    fn test_lda_sta_rsub_program() {
        let (_dir, mut machine) = machine();
        // LDA #5 ; +STA 0x02000 ; RSUB
        let source = "\
HTINY  00000000000A
T0000000A0100050F1020004F0000
E
";
        machine.load_str(source).unwrap();

        let executed = machine.run().unwrap();

        assert_eq!(executed, 3);
        assert_eq!(machine.resources().read_word(0x2000), 5);
        // L was 0, so RSUB returns to 0 and the run ends.
        assert_eq!(machine.registers().pc, 0);
        assert_eq!(machine.state(), MachineState::Halted);
        assert_eq!(machine.trace(), ["LDA", "STA", "RSUB"]);
    }

    #[test]
    fn test_rsub_returns_to_linkage_register() {
        let (_dir, mut machine) = machine();
        let source = "\
HTINY  00000000000A
T0000000A0100050F1020004F0000
E
";
        machine.load_str(source).unwrap();
        machine.res.regs.l = 0x123;

        assert_eq!(machine.run_limited(3).unwrap(), 3);

        assert_eq!(machine.registers().pc, 0x123);
        assert_eq!(machine.registers().a, 5);
        assert!(machine.is_runnable());
    }

    #[test]
    fn test_jump_past_top_of_memory_halts() {
        let (_dir, mut machine) = machine();
        // +J 0x10000
        machine.load_str("HP     000000000004\nT000000043F110000\nE\n").unwrap();

        let report = machine.step().unwrap().unwrap();
        assert_eq!(report.target, 0x1_0000);

        assert_eq!(machine.registers().pc, 0x1_0000);
        assert_eq!(machine.state(), MachineState::Halted);
        assert!(machine.step().unwrap().is_none());
        assert_eq!(machine.steps(), 1);
    }

    #[test]
    fn test_start_outside_memory_is_not_runnable() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = Machine::new(MachineConfig {
            load_base: 0x1_0000,
            device_dir: dir.path().to_path_buf(),
            ..MachineConfig::default()
        });

        machine.load_str("HP     000000000003\nT00000003010005\nE\n").unwrap();

        assert_eq!(machine.state(), MachineState::Halted);
        assert!(machine.step().unwrap().is_none());
        assert_eq!(machine.steps(), 0);
        assert_eq!(machine.registers().a, 0);
    }

    #[test]
    fn test_step_reports_side_channel() {
        let (_dir, mut machine) = machine();
        let source = "HP     000000000005\nT00000005B440010005\nE\n";
        machine.load_str(source).unwrap();

        let report = machine.step().unwrap().unwrap().clone();
        assert_eq!(report.mnemonic(), "CLEAR");
        assert_eq!(report.pc, 0);
        assert_eq!(report.length, 2);
        assert_eq!(report.target, 0);
        assert_eq!(report.device, None);

        let report = machine.step().unwrap().unwrap();
        assert_eq!(report.mnemonic(), "LDA");
        assert_eq!(report.pc, 2);
        assert_eq!(report.target, 5);
    }

    #[test]
    fn test_step_after_halt_is_noop() {
        let (_dir, mut machine) = machine();
        machine.load_str("HP     000000000003\nT000000034F0000\nE\n").unwrap();

        machine.run().unwrap();
        let steps = machine.steps();

        assert!(machine.step().unwrap().is_none());
        assert_eq!(machine.steps(), steps);
    }

    #[test]
    fn test_unknown_opcode_stops_machine() {
        let (_dir, mut machine) = machine();
        machine.load_str("HP     000000000003\nT00000003FC0000\nE\n").unwrap();

        let err = machine.run().unwrap_err();

        assert!(matches!(
            err,
            MachineError::Cpu(CpuError::DecodeError(DecodeError::UnknownOpcode { .. }))
        ));
        assert_eq!(machine.state(), MachineState::Error);
        assert!(machine.trace().is_empty());
        assert!(machine.step().unwrap().is_none());
    }

    #[test]
    fn test_load_error_is_reported() {
        let (_dir, mut machine) = machine();
        let err = machine.load_str("HP     000000000003\nM00000006+GHOST\nE\n").unwrap_err();

        assert!(matches!(err, MachineError::Load(LoadError::UnresolvedSymbol { .. })));
        assert!(!machine.is_runnable());
    }

    #[test]
    fn test_entry_point_start_policy() {
        let dir = tempfile::tempdir().unwrap();
        let mut machine = Machine::new(MachineConfig {
            load_base: 0x1000,
            device_dir: dir.path().to_path_buf(),
            start: StartPolicy::EntryPoint,
            max_steps: None,
        });

        machine.load_str("HP     000000000006\nT0000000601000501000A\nE000003\n").unwrap();

        assert_eq!(machine.registers().pc, 0x1003);
        machine.step().unwrap();
        assert_eq!(machine.registers().a, 0x0A);
    }

    #[test]
    fn test_run_limited_and_section_tracking() {
        let (_dir, mut machine) = machine();
        // MAIN: J to LOOP in section LOOPS (0x10), which jumps to itself.
        let source = "\
HMAIN  000000000010
T000000033F0010
E000000
HLOOPS 000000000003
T000000033F0010
E
";
        machine.load_str(source).unwrap();

        assert_eq!(machine.run_limited(5).unwrap(), 5);
        assert!(machine.is_runnable());
        assert_eq!(machine.current_section().unwrap().name, "LOOPS");
    }

    #[test]
    fn test_reload_clears_trace() {
        let (_dir, mut machine) = machine();
        let source = "HP     000000000003\nT000000034F0000\nE\n";
        machine.load_str(source).unwrap();
        machine.run().unwrap();
        assert_eq!(machine.trace().len(), 1);

        machine.load_str(source).unwrap();
        assert!(machine.trace().is_empty());
        assert!(machine.last_step().is_none());
    }

    #[test]
    fn test_device_program() {
        let (dir, mut machine) = machine();
        std::fs::write(dir.path().join("F1"), b"HI").unwrap();
        // TD 0x20 ; RD 0x20 ; WD 0x21 ; RSUB, device bytes F1 and 05 at 0x20
        let source = "\
HIO    000000000022
T0000000CE30020DB0020DF00214F0000
T00002002F105
E
";
        machine.load_str(source).unwrap();
        // WD needs 05 to be open first; open it ahead of the run.
        machine.res.test_device("05");

        machine.run().unwrap();

        assert_eq!(machine.last_step().unwrap().mnemonic(), "RSUB");
        assert_eq!(std::fs::read(dir.path().join("05")).unwrap(), b"H");
        let snapshot = machine.snapshot();
        assert_eq!(snapshot.trace, ["TD", "RD", "WD", "RSUB"]);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"Halted\""));
    }
}

//! SIC/XE Simulator - CLI Entry Point
//!
//! Commands:
//! - `sicxe-sim run <object>` - Link, load and run an object program
//! - `sicxe-sim link <object>` - Link an object program and show the memory map
//! - `sicxe-sim disasm <object>` - Link an object program and disassemble each section

use clap::{Parser, Subcommand};
use sicxe::cpu::disasm::{disassemble, disassemble_instruction};
use sicxe::{Machine, MachineConfig, MachineState, StartPolicy};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sicxe-sim")]
#[command(author = "Yigit")]
#[command(version = "0.1.0")]
#[command(about = "An emulator of the SIC/XE instructional machine")]
struct Cli {
    /// Machine configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding device files (overrides the config)
    #[arg(short, long, global = true)]
    devices: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the object program
        program: PathBuf,
        /// Maximum number of instructions to execute
        #[arg(short, long)]
        max_steps: Option<u64>,
        /// Start at the End record's entry point instead of the load base
        #[arg(short, long)]
        entry: bool,
        /// Print every executed instruction
        #[arg(short, long)]
        trace: bool,
        /// Print the final machine state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Link a program and print its memory map
    Link {
        /// Path to the object program
        program: PathBuf,
        /// Also dump the memory each section occupies
        #[arg(long)]
        dump: bool,
    },
    /// Link a program and disassemble every control section
    Disasm {
        /// Path to the object program
        program: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = load_config(cli.config.as_deref());
    if let Some(dir) = cli.devices {
        config.device_dir = dir;
    }

    match cli.command {
        Commands::Run { program, max_steps, entry, trace, json } => {
            if entry {
                config.start = StartPolicy::EntryPoint;
            }
            let limit = max_steps.or(config.max_steps);
            run_program(config, &program, limit, trace, json);
        }
        Commands::Link { program, dump } => {
            link_program(config, &program, dump);
        }
        Commands::Disasm { program } => {
            disassemble_program(config, &program);
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> MachineConfig {
    let Some(path) = path else {
        return MachineConfig::default();
    };

    match MachineConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    }
}

/// Build a machine and load `path` into it, exiting on failure.
fn load_machine(config: MachineConfig, path: &Path) -> Machine {
    let mut machine = Machine::new(config);

    match machine.load_file(path) {
        Ok(report) => {
            println!(
                "📂 Loaded {} section(s), {} bytes, entry {:06X}",
                report.sections.len(),
                report.total_length(),
                report.entry_point
            );
        }
        Err(e) => {
            eprintln!("❌ Failed to load {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }

    machine
}

fn run_program(config: MachineConfig, path: &Path, max_steps: Option<u64>, trace: bool, json: bool) {
    println!("🔧 Running: {}", path.display());
    let mut machine = load_machine(config, path);

    println!();
    println!("━━━ Execution ━━━");

    while machine.is_runnable() && max_steps.map_or(true, |max| machine.steps() < max) {
        match machine.step() {
            Ok(Some(report)) => {
                if trace {
                    let report = report.clone();
                    let (text, _) = disassemble_instruction(&machine.resources().mem, report.pc);
                    let regs = machine.registers();
                    let device = report.device.as_deref().unwrap_or("");
                    println!(
                        "{:06X}: {:<20} -> {:06X} {:<2}  A={:06X} X={:06X} L={:06X} SW={}",
                        report.pc,
                        text,
                        report.target & 0xFF_FFFF,
                        device,
                        regs.a & 0xFF_FFFF,
                        regs.x & 0xFF_FFFF,
                        regs.l & 0xFF_FFFF,
                        regs.sw
                    );
                }
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("❌ CPU error at PC={:06X}: {}", machine.registers().pc, e);
                machine.shutdown();
                std::process::exit(1);
            }
        }
    }

    machine.shutdown();

    println!();
    println!("━━━ Result ━━━");
    println!("Steps: {}", machine.steps());
    println!("State: {:?}", machine.state());
    let regs = machine.registers();
    println!("A:  {:06X}", regs.a & 0xFF_FFFF);
    println!("X:  {:06X}", regs.x & 0xFF_FFFF);
    println!("L:  {:06X}", regs.l & 0xFF_FFFF);
    println!("B:  {:06X}", regs.b & 0xFF_FFFF);
    println!("S:  {:06X}", regs.s & 0xFF_FFFF);
    println!("T:  {:06X}", regs.t & 0xFF_FFFF);
    println!("F:  {}", regs.f);
    println!("PC: {:06X}", regs.pc & 0xFF_FFFF);
    println!("SW: {}", regs.sw);
    if let Some(section) = machine.current_section() {
        println!("Section: {} @ {:06X}", section.name, section.address);
    }

    if machine.state() == MachineState::Running {
        if let Some(max) = max_steps {
            println!();
            println!("⚠️  Reached step limit ({}). Use --max-steps to increase.", max);
        }
    }

    if json {
        match serde_json::to_string_pretty(&machine.snapshot()) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("❌ Failed to serialize state: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn link_program(config: MachineConfig, path: &Path, dump: bool) {
    println!("🔗 Linking: {}", path.display());
    let machine = load_machine(config, path);
    let Some(report) = machine.link_report() else {
        return;
    };

    println!();
    println!("{:<8} {:>6} {:>6}", "SECTION", "ADDR", "LENGTH");
    for section in &report.sections {
        println!("{:<8} {:06X} {:06X}", section.name, section.address, section.length);
    }
    println!();
    println!("Entry point: {:06X}", report.entry_point);
    println!("Relocations: {}", report.relocations);

    if dump {
        for section in &report.sections {
            println!();
            println!("━━━ {} ━━━", section.name);
            for (addr, row) in machine.resources().mem.dump(section.address, section.length as usize) {
                let hex: Vec<String> = row.iter().map(|b| format!("{:02X}", b)).collect();
                println!("{:06X}: {}", addr, hex.join(" "));
            }
        }
    }
}

fn disassemble_program(config: MachineConfig, path: &Path) {
    println!("📖 Disassembling: {}", path.display());
    let machine = load_machine(config, path);
    let Some(report) = machine.link_report() else {
        return;
    };

    for section in &report.sections {
        println!();
        println!("━━━ {} ━━━", section.name);
        print!("{}", disassemble(&machine.resources().mem, section.address, section.length));
    }
}

//! Orchestrator CLI surface, reused verbatim from the original tool (spec §6).

use std::str::FromStr;
use structopt::StructOpt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Stack,
    Text,
    Rodata,
    Data,
    Bss,
    Heap,
    Init,
    Registers,
    Memory,
    Cache,
    Icache,
    Dcache,
    L2cache,
}

impl FromStr for Section {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Section::*;
        Ok(match s {
            "stack" => Stack,
            "text" => Text,
            "rodata" => Rodata,
            "data" => Data,
            "bss" => Bss,
            "heap" => Heap,
            "init" => Init,
            "registers" => Registers,
            "memory" => Memory,
            "cache" => Cache,
            "icache" => Icache,
            "dcache" => Dcache,
            "l2cache" => L2cache,
            other => return Err(format!("unsupported section: {}", other)),
        })
    }
}

impl Section {
    pub fn label(&self) -> &'static str {
        use Section::*;
        match self {
            Stack => "stack",
            Text => "text",
            Rodata => "rodata",
            Data => "data",
            Bss => "bss",
            Heap => "heap",
            Init => "init",
            Registers => "registers",
            Memory => "memory",
            Cache => "cache",
            Icache => "icache",
            Dcache => "dcache",
            L2cache => "l2cache",
        }
    }

    pub fn is_cache(&self) -> bool {
        matches!(self, Section::Cache | Section::Icache | Section::Dcache | Section::L2cache)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Board {
    Pynq,
    Hifive1,
}

impl FromStr for Board {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pynq" => Ok(Board::Pynq),
            "hifive1" => Ok(Board::Hifive1),
            other => Err(format!("unsupported board: {}", other)),
        }
    }
}

impl Board {
    pub fn label(&self) -> &'static str {
        match self {
            Board::Pynq => "pynq",
            Board::Hifive1 => "hifive1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    None,
    Critical,
    Error,
    Success,
    Info,
    All,
}

impl FromStr for Verbosity {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Verbosity::*;
        Ok(match s {
            "n" => None,
            "c" => Critical,
            "e" => Error,
            "s" => Success,
            "i" => Info,
            "a" => All,
            other => return Err(format!("unsupported verbosity: {}", other)),
        })
    }
}

impl Verbosity {
    /// Maps spec §6/§8's letters onto `tracing` levels.
    pub fn tracing_level(&self) -> tracing::Level {
        use tracing::Level;
        match self {
            Verbosity::None => Level::ERROR, // tracing has no "off" level; gated by filter in main
            Verbosity::Critical => Level::ERROR,
            Verbosity::Error => Level::WARN,
            Verbosity::Success => Level::INFO,
            Verbosity::Info => Level::DEBUG,
            Verbosity::All => Level::TRACE,
        }
    }
}

#[derive(Debug, StructOpt)]
#[structopt(name = "seu-orchestrator")]
pub struct Args {
    #[structopt(short = "f", long = "filename")]
    /// Path to the kernel ELF to load into the emulator.
    pub filename: String,

    #[structopt(short = "p", long = "port-range")]
    /// Inclusive start of a five-port reservation.
    pub port_range: u16,

    #[structopt(short = "t", default_value = "1")]
    /// Number of injections to perform.
    pub injections: u64,

    #[structopt(short = "e", long = "errorCount")]
    /// Stop after N errors (rounds up to next multiple of 1000 injections).
    pub error_count: Option<u64>,

    #[structopt(short = "s", long = "section", default_value = "memory")]
    pub section: Section,

    #[structopt(short = "d", long = "board", default_value = "pynq")]
    pub board: Board,

    #[structopt(short = "l", long = "log-dir", default_value = ".")]
    pub log_dir: String,

    #[structopt(short = "q", long = "no-logging")]
    pub no_logging: bool,

    #[structopt(short = "v", long = "verbosity", default_value = "i")]
    pub verbosity: Verbosity,

    #[structopt(short = "b", long = "forceBreak")]
    /// One or more `"set <addr-or-reg> = <val>"` forced injections.
    pub force_break: Vec<String>,

    #[structopt(short = "c", long = "breakCount", default_value = "1")]
    pub break_count: u32,

    #[structopt(short = "z", long = "breakSleep")]
    pub break_sleep: Option<f64>,

    #[structopt(short = "x", long = "debug-commands")]
    /// File of raw debugger commands run before each forced injection.
    pub debug_commands: Option<String>,
}

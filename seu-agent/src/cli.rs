//! Debugger agent command line (spec §6: "Debugger agent command-line").

use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "seu-agent")]
pub struct Args {
    /// Board name, selects the register set and reset/benchmark symbols.
    pub board: String,

    /// Directory holding the benchmark source (symbol name resolution).
    pub source_dir: String,

    /// TCP port the emulator exposes its GDB stub on.
    pub gdb_port: u16,

    /// TCP port this agent listens on for the orchestrator.
    pub python_port: u16,

    #[structopt(short = "n")]
    /// Total number of injections the campaign expects (informational).
    pub num_injections: Option<u64>,

    #[structopt(short = "b")]
    /// Starting serial number (for resumed campaigns).
    pub start_num: Option<u64>,

    #[structopt(short = "c")]
    /// Run with colored/verbose console output.
    pub color: bool,
}

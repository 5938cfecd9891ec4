//! Ties the CLI, board configuration, sleep bounds, and campaign counters
//! into one context the state machine is built from (spec §6, §8, §9).

use crate::cli::{Args, Board as BoardChoice};
use crate::forced::{parse_forced, ForcedInjection};
use seu_core::board::Board;
use seu_core::bounds::Bounds;
use seu_core::counters::CampaignCounters;
use seu_core::error::Error;

const PYNQ_TOML: &str = include_str!("../boards/pynq.toml");
const HIFIVE1_TOML: &str = include_str!("../boards/hifive1.toml");

pub struct PortAssignment {
    pub gdb_port: u16,
    pub monitor_port: u16,
    pub agent_port: u16,
    pub plugin_port: u16,
}

impl PortAssignment {
    /// Spec §6's "-p, inclusive start of a five-port reservation": the
    /// fifth port is left spare for a future collaborator.
    pub fn from_range_start(start: u16) -> Self {
        Self {
            gdb_port: start,
            monitor_port: start + 1,
            agent_port: start + 2,
            plugin_port: start + 3,
        }
    }
}

pub struct CampaignConfig {
    pub board: Board,
    pub board_name: &'static str,
    pub bounds: Bounds,
    pub counters: CampaignCounters,
    pub forced: Vec<ForcedInjection>,
    pub debug_commands: Vec<String>,
    pub ports: PortAssignment,
}

impl CampaignConfig {
    pub fn from_args(args: &Args) -> Result<Self, Error> {
        let (board_toml, board_name) = match args.board {
            BoardChoice::Pynq => (PYNQ_TOML, "pynq"),
            BoardChoice::Hifive1 => (HIFIVE1_TOML, "hifive1"),
        };
        let board = Board::from_toml_str(board_toml)?;

        let forced = args
            .force_break
            .iter()
            .map(|raw| {
                parse_forced(raw).map(|mut f| {
                    f.break_count = args.break_count.max(1);
                    f.break_sleep = args.break_sleep;
                    f
                })
                .map_err(|reason| Error::Config { reason })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let debug_commands = match &args.debug_commands {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|source| Error::Io { source })?
                .lines()
                .map(|l| l.to_string())
                .collect(),
            None => Vec::new(),
        };

        // Placeholder bounds until baseline measurement replaces them
        // (spec §4.F step 2-4 runs before the state machine starts).
        let bounds = Bounds::new(2.0, 0.001);
        let counters = CampaignCounters::new(args.injections, args.error_count);
        let ports = PortAssignment::from_range_start(args.port_range);

        Ok(Self {
            board,
            board_name,
            bounds,
            counters,
            forced,
            debug_commands,
            ports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_boards_parse() {
        assert!(Board::from_toml_str(PYNQ_TOML).is_ok());
        assert!(Board::from_toml_str(HIFIVE1_TOML).is_ok());
    }

    #[test]
    fn port_assignment_is_contiguous() {
        let ports = PortAssignment::from_range_start(9000);
        assert_eq!(ports.gdb_port, 9000);
        assert_eq!(ports.monitor_port, 9001);
        assert_eq!(ports.agent_port, 9002);
        assert_eq!(ports.plugin_port, 9003);
    }

    fn base_args() -> Args {
        Args {
            filename: "kernel.elf".to_string(),
            port_range: 9000,
            injections: 1,
            error_count: None,
            section: crate::cli::Section::Memory,
            board: BoardChoice::Pynq,
            log_dir: ".".to_string(),
            no_logging: true,
            verbosity: crate::cli::Verbosity::None,
            force_break: vec!["set r5 = 0xAA".to_string()],
            break_count: 1,
            break_sleep: None,
            debug_commands: None,
        }
    }

    #[test]
    fn break_count_and_sleep_flow_into_forced_injections() {
        let mut args = base_args();
        args.break_count = 3;
        args.break_sleep = Some(0.25);
        let config = CampaignConfig::from_args(&args).unwrap();
        assert_eq!(config.forced.len(), 1);
        assert_eq!(config.forced[0].break_count, 3);
        assert_eq!(config.forced[0].break_sleep, Some(0.25));
    }
}

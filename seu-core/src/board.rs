//! Per-board configuration: registers, memory map, cache topology, and the
//! forbidden-range blocklist (spec §3, §6, §8, §9).

use crate::cache::{CacheDescriptor, CacheTopology, ReplacementPolicy};
use crate::error::Error;
use crate::memory::{MemoryMap, Section, SymbolTable};
use crate::registers::RegisterSet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isa {
    ArmCortexA9,
    RiscV,
}

#[derive(Debug, Clone, Deserialize)]
struct SectionConfig {
    name: String,
    base_address: u32,
    size_bytes: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct CacheConfig {
    name: String,
    size: u32,
    associativity: u32,
    block_size: u32,
    #[serde(default = "default_policy")]
    policy: ReplacementPolicy,
    word_size: u32,
}

fn default_policy() -> ReplacementPolicy {
    ReplacementPolicy::RoundRobin
}

#[derive(Debug, Clone, Deserialize)]
struct ForbiddenRangeConfig {
    start: u32,
    end: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct SymbolConfig {
    name: String,
    address: u32,
}

/// The TOML shape of a board configuration file (spec §8 config-file loading).
#[derive(Debug, Clone, Deserialize)]
pub struct BoardConfig {
    pub name: String,
    pub isa: Isa,
    pub machine: String,
    pub cpu: String,
    #[serde(default)]
    sections: Vec<SectionConfig>,
    #[serde(default)]
    caches: Vec<CacheConfig>,
    #[serde(default)]
    forbidden_ranges: Vec<ForbiddenRangeConfig>,
    #[serde(default)]
    symbols: Vec<SymbolConfig>,
}

/// Resolved, immutable board description used by the orchestrator and
/// injector. Built from a `BoardConfig` (TOML) rather than stored directly,
/// so the wire/registers types stay in their own modules.
#[derive(Debug, Clone)]
pub struct Board {
    pub name: String,
    pub isa: Isa,
    pub machine: String,
    pub cpu: String,
    pub registers: RegisterSet,
    pub memory_map: MemoryMap,
    pub cache_topology: CacheTopology,
    pub forbidden_ranges: Vec<(u32, u32)>,
    pub symbol_table: SymbolTable,
}

impl Board {
    pub fn from_config(config: BoardConfig) -> Self {
        let registers = match config.isa {
            Isa::ArmCortexA9 => RegisterSet::arm_cortex_a9(),
            Isa::RiscV => RegisterSet::riscv_hifive1(),
        };
        let mut memory_map = MemoryMap::new();
        for section in &config.sections {
            memory_map.insert(
                section.name.clone(),
                Section {
                    base_address: section.base_address,
                    size_bytes: section.size_bytes,
                },
            );
        }
        let cache_topology = CacheTopology::new(
            config
                .caches
                .iter()
                .map(|c| CacheDescriptor {
                    name: c.name.clone(),
                    size: c.size,
                    associativity: c.associativity,
                    block_size: c.block_size,
                    policy: c.policy,
                    word_size: c.word_size,
                })
                .collect(),
        );
        let forbidden_ranges = config
            .forbidden_ranges
            .iter()
            .map(|r| (r.start, r.end))
            .collect();
        let symbol_table = SymbolTable::new(
            config
                .symbols
                .iter()
                .map(|s| (s.address, s.name.clone()))
                .collect(),
        );

        Board {
            name: config.name,
            isa: config.isa,
            machine: config.machine,
            cpu: config.cpu,
            registers,
            memory_map,
            cache_topology,
            forbidden_ranges,
            symbol_table,
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        let config: BoardConfig = toml::from_str(text).map_err(|e| Error::Config {
            reason: e.to_string(),
        })?;
        Ok(Board::from_config(config))
    }

    pub fn from_toml_file(path: &std::path::Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io { source })?;
        Board::from_toml_str(&text)
    }

    pub fn is_forbidden(&self, addr: u32) -> bool {
        self.forbidden_ranges
            .iter()
            .any(|(start, end)| addr >= *start && addr <= *end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TOML: &str = r#"
        name = "pynq"
        isa = "arm_cortex_a9"
        machine = "xilinx-zynq-a9"
        cpu = "cortex-a9"

        [[sections]]
        name = "text"
        base_address = 0x10000
        size_bytes = 0x1000

        [[caches]]
        name = "dcache"
        size = 8192
        associativity = 4
        block_size = 32
        word_size = 4

        [[forbidden_ranges]]
        start = 0xF8F00200
        end = 0xF8F0021F

        [[symbols]]
        name = "_start"
        address = 0x10000
    "#;

    #[test]
    fn loads_board_from_toml() {
        let board = Board::from_toml_str(SAMPLE_TOML).unwrap();
        assert_eq!(board.name, "pynq");
        assert!(board.registers.contains("r5"));
        assert!(board.memory_map.get("text").is_some());
        assert!(board.cache_topology.get("dcache").is_some());
        assert!(board.is_forbidden(0xF8F00210));
        assert!(!board.is_forbidden(0x10100));
        assert_eq!(board.symbol_table.nearest(0x10010), Some("_start"));
    }
}

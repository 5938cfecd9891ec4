//! `MemoryMap`: immutable section table for a loaded kernel binary (spec §3).

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SECTION_NAMES: [&str; 7] =
    ["init", "text", "rodata", "data", "bss", "stack", "heap"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub base_address: u32,
    pub size_bytes: u32,
}

impl Section {
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base_address
            && addr < self.base_address.saturating_add(self.size_bytes)
    }

    fn random_address<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        if self.size_bytes == 0 {
            return self.base_address;
        }
        self.base_address + rng.gen_range(0..self.size_bytes)
    }
}

/// Ordered mapping of section name to `(base_address, size_bytes)`.
///
/// Built from board configuration at startup, not from parsing the ELF
/// itself (that is the out-of-scope collaborator's job).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMap {
    sections: BTreeMap<String, Section>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self {
            sections: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, section: Section) {
        self.sections.insert(name.into(), section);
    }

    pub fn get(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Uniform random address within a named section.
    pub fn random_address<R: Rng + ?Sized>(
        &self,
        section: &str,
        rng: &mut R,
    ) -> Option<u32> {
        self.sections.get(section).map(|s| s.random_address(rng))
    }

    /// Uniform random section, then a uniform address within it.
    pub fn random_address_any<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u32> {
        if self.sections.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.sections.len());
        self.sections.values().nth(idx).map(|s| s.random_address(rng))
    }

    pub fn section_containing(&self, addr: u32) -> Option<&str> {
        self.sections
            .iter()
            .find(|(_, s)| s.contains(addr))
            .map(|(name, _)| name.as_str())
    }
}

/// Read-only symbol table: address -> nearest preceding name.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    // sorted by address ascending
    entries: Vec<(u32, String)>,
    max_distance: u32,
}

impl SymbolTable {
    pub fn new(mut entries: Vec<(u32, String)>) -> Self {
        entries.sort_by_key(|(addr, _)| *addr);
        Self {
            entries,
            max_distance: 0x1000,
        }
    }

    pub fn with_max_distance(mut self, max_distance: u32) -> Self {
        self.max_distance = max_distance;
        self
    }

    /// Name of the nearest symbol at or before `addr`, within `max_distance`.
    pub fn nearest(&self, addr: u32) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = match self.entries.binary_search_by_key(&addr, |(a, _)| *a) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let (sym_addr, name) = &self.entries[idx];
        if addr - sym_addr <= self.max_distance {
            Some(name.as_str())
        } else {
            None
        }
    }
}

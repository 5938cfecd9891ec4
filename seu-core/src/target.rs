//! `InjectionTarget` sum type (spec §3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InjectionTarget {
    Register(String),
    MemoryWord(u32),
    CacheWord {
        cache_name: String,
        row: u32,
        block: u32,
        word: u32,
    },
}

impl InjectionTarget {
    /// Textual label used as `InjectionLog::address_or_register_name`.
    pub fn wire_name(&self) -> String {
        match self {
            InjectionTarget::Register(name) => name.clone(),
            InjectionTarget::MemoryWord(addr) => format!("{:#010x}", addr),
            InjectionTarget::CacheWord {
                cache_name,
                row,
                block,
                word,
            } => format!("{}[{}][{}][{}]", cache_name, row, block, word),
        }
    }
}

//! `InjectionLog` / `CacheInfo` records (spec §3, §4.E, §4.G).

use crate::outcome::RunOutcome;
use crate::timing::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub cache_name: String,
    pub row: u32,
    pub block: u32,
    pub word: u32,
    pub in_tag: bool,
    pub dirty: bool,
}

/// One perturbation applied during one workload iteration.
///
/// Created by the injector at perturbation time with `result` absent;
/// the orchestrator fills in `cycles_elapsed`/`pc_at_injection` (already
/// known) and attaches `result` before publishing to the log/queue fabric.
/// Invariant: a log published to JSON always carries `Some(result)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionLog {
    pub timestamp: Timestamp,
    pub serial_number: u64,
    pub section_label: String,
    pub address_or_register_name: String,
    pub old_value: u32,
    pub new_value: u32,
    pub symbol_name: Option<String>,
    pub sleep_time: f64,
    pub cycles_elapsed: u64,
    pub pc_at_injection: u32,
    pub cache_info: Option<CacheInfo>,
    pub result: Option<RunOutcome>,
}

impl InjectionLog {
    pub fn is_ready_for_publication(&self) -> bool {
        self.result.is_some()
    }
}

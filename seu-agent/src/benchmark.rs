//! Benchmark breakpoint table (spec §4.C "set breakpoints from benchmark
//! table"). ELF/symbol extraction is out of scope (spec §1); this is the
//! thin read-only descriptor the injector and agent consume.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkTable {
    /// Breakpoint hit once per workload pass, before the injectable window.
    pub pre_workload_symbol: String,
    /// Breakpoint hit once per workload pass, after the injectable window.
    pub post_workload_symbol: String,
    /// Guest-side variable read to detect an overshoot past the workload
    /// (spec §4.F: "check the nErrors guest variable").
    #[serde(default = "default_nerrors_var")]
    pub nerrors_var: String,
}

fn default_nerrors_var() -> String {
    "nErrors".to_string()
}

impl BenchmarkTable {
    pub fn breakpoints(&self) -> Vec<String> {
        vec![self.pre_workload_symbol.clone(), self.post_workload_symbol.clone()]
    }

    pub fn load(source_dir: &std::path::Path) -> Result<Self, seu_core::error::Error> {
        let path = source_dir.join("benchmark.toml");
        let text = std::fs::read_to_string(&path).map_err(|source| seu_core::error::Error::Io { source })?;
        toml::from_str(&text).map_err(|e| seu_core::error::Error::Config {
            reason: e.to_string(),
        })
    }
}

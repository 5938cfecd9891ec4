//! Plugin (cache/injection co-process) channel (spec §4.B, §4.E, §4.F).
//!
//! JSON-over-framed-socket, the same transport as the agent channel but with
//! a structured schema since this is a machine/machine protocol rather than
//! the agent's human-legible textual commands.

use seu_core::cache::CacheDescriptor;
use seu_core::error::Error;
use seu_core::log::CacheInfo;
use seu_transport::FramedStream;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PluginRequest {
    /// Programs the cycle count at which the plugin should halt the target
    /// (spec §4.F plugin-mode `InjectFault`).
    SetInjectCycle { cycles: u64 },
    /// Reads the free-running cycle counter at a measurement boundary
    /// (spec §4.F baseline measurement in plugin mode).
    ReadCycleCounter,
    /// Requests a cache-mapped address for the current injection (spec
    /// §4.E step 1, cache section).
    SelectCacheWord { cache_name: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PluginResponse {
    CycleCounter { value: u64 },
    InjectionReady {
        actual_cycles: u64,
        cache_info: CacheInfo,
        mapped_address: u32,
        valid_bit: bool,
    },
}

pub struct PluginClient {
    stream: FramedStream,
}

impl PluginClient {
    pub fn new(stream: FramedStream) -> Self {
        Self { stream }
    }

    pub fn request(&mut self, request: &PluginRequest) -> Result<PluginResponse, Error> {
        let payload = serde_json::to_string(request)?;
        self.stream.send_str(&payload)?;
        let reply = self.stream.recv_str()?;
        serde_json::from_str(&reply).map_err(Error::from)
    }

    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<(), Error> {
        self.stream.set_read_timeout(timeout)
    }
}

/// Derives `CacheInfo.dirty` from the plugin's reported valid bit (spec
/// §4.E: "record `dirty = not plugin_valid_bit`").
pub fn cache_info_from_plugin(
    cache: &CacheDescriptor,
    row: u32,
    block: u32,
    word: u32,
    in_tag: bool,
    valid_bit: bool,
) -> CacheInfo {
    CacheInfo {
        cache_name: cache.name.clone(),
        row,
        block,
        word,
        in_tag,
        dirty: !valid_bit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let req = PluginRequest::SetInjectCycle { cycles: 12345 };
        let json = serde_json::to_string(&req).unwrap();
        let back: PluginRequest = serde_json::from_str(&json).unwrap();
        match back {
            PluginRequest::SetInjectCycle { cycles } => assert_eq!(cycles, 12345),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn dirty_is_negation_of_valid_bit() {
        let cache = CacheDescriptor {
            name: "dcache".into(),
            size: 4096,
            associativity: 2,
            block_size: 32,
            policy: seu_core::cache::ReplacementPolicy::Random,
            word_size: 4,
        };
        let info = cache_info_from_plugin(&cache, 1, 0, 2, true, true);
        assert!(!info.dirty);
        let info2 = cache_info_from_plugin(&cache, 1, 0, 2, true, false);
        assert!(info2.dirty);
    }
}

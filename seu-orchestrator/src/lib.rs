//! Library surface for `seu-orchestrator`, split out from the `main.rs`
//! binary purely so the `tests/` fixtures can drive `CampaignMachine`
//! against a scripted stub agent without a live GDB/QEMU pair (mirroring
//! how `mayastor`'s crate pairs a `lib.rs` with its `src/bin/` binaries for
//! the same reason).

pub mod agent_client;
pub mod cli;
pub mod config;
pub mod emulator;
pub mod forced;
pub mod injector;
pub mod plugin;
pub mod queue;
pub mod state_machine;

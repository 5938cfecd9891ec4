//! `DebugBackend`: the agent's view of the underlying debugger.
//!
//! Spec §9 design note: "re-architect [event handler callbacks] as a small
//! state machine inside C that receives event descriptors from the
//! underlying debugger API". `DebugEvent` is that descriptor; `DebugBackend`
//! is the trait the dispatcher (`server.rs`) drives, so the GDB/MI
//! implementation and the watchdog-driven state machine never know about
//! each other directly.

use seu_core::error::Error;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum DebugEvent {
    BreakpointHit(String),
    StopHandler,
    TimeoutDetected,
    GdbDied,
    Finished,
}

/// Operations the agent performs against the live debugger session, one per
/// row of spec §4.C's command table (minus the framing, which is the
/// server's job).
pub trait DebugBackend: Send {
    fn configure(&mut self, gdb_port: u16, breakpoints: &[String]) -> Result<u32, Error>;
    fn setup_handlers(&mut self) -> Result<(), Error>;
    fn continue_target(&mut self, repeat: Option<u32>) -> Result<(), Error>;
    fn interrupt(&mut self) -> Result<String, Error>;
    fn reload(&mut self, reset_pc: u32) -> Result<(), Error>;
    fn read_reg(&mut self, name: &str) -> Result<u32, Error>;
    fn write_reg(&mut self, name: &str, value: u32) -> Result<(), Error>;
    fn read_mem(&mut self, addr: u32) -> Result<u32, Error>;
    fn write_mem(&mut self, addr: u32, value: u32) -> Result<(), Error>;
    fn reg_name(&mut self, name: &str) -> Result<Option<String>, Error>;
    fn mem_name(&mut self, addr: u32) -> Result<Option<String>, Error>;
    fn sym_addr(&mut self, name: &str) -> Result<Option<u32>, Error>;
    fn read_global_timer(&mut self) -> Result<u64, Error>;
    fn get_var(&mut self, name: &str) -> Result<String, Error>;
    fn exec(&mut self, command: &str) -> Result<String, Error>;
    fn disconnect(&mut self) -> Result<(), Error>;
    fn reconnect(&mut self, gdb_port: u16) -> Result<(), Error>;
    fn quit(&mut self) -> Result<(), Error>;

    /// Blocks up to `timeout` for the next asynchronous event (breakpoint,
    /// stop handler, watchdog firing, the underlying process dying).
    fn poll_event(&mut self, timeout: Duration) -> Result<Option<DebugEvent>, Error>;
}

#[cfg(test)]
pub mod mock {
    //! In-memory stand-in used by the server dispatch tests and by the
    //! end-to-end orchestrator fixtures (spec §8 "the emulator and agent are
    //! replaced by scripted stubs").
    use super::*;
    use std::collections::{HashMap, VecDeque};

    #[derive(Default)]
    pub struct MockBackend {
        pub registers: HashMap<String, u32>,
        pub memory: HashMap<u32, u32>,
        pub symbols: HashMap<u32, String>,
        pub vars: HashMap<String, String>,
        pub reset_pc: u32,
        pub events: VecDeque<DebugEvent>,
        pub global_timer: u64,
    }

    impl DebugBackend for MockBackend {
        fn configure(&mut self, _gdb_port: u16, _breakpoints: &[String]) -> Result<u32, Error> {
            Ok(self.reset_pc)
        }
        fn setup_handlers(&mut self) -> Result<(), Error> {
            Ok(())
        }
        fn continue_target(&mut self, _repeat: Option<u32>) -> Result<(), Error> {
            Ok(())
        }
        fn interrupt(&mut self) -> Result<String, Error> {
            Ok("hit the basic stop handler".to_string())
        }
        fn reload(&mut self, reset_pc: u32) -> Result<(), Error> {
            self.reset_pc = reset_pc;
            Ok(())
        }
        fn read_reg(&mut self, name: &str) -> Result<u32, Error> {
            self.registers.get(name).copied().ok_or_else(|| Error::ReadFailed {
                what: format!("register {}", name),
                raw: "unset".to_string(),
            })
        }
        fn write_reg(&mut self, name: &str, value: u32) -> Result<(), Error> {
            self.registers.insert(name.to_string(), value);
            Ok(())
        }
        fn read_mem(&mut self, addr: u32) -> Result<u32, Error> {
            self.memory.get(&addr).copied().ok_or_else(|| Error::ReadFailed {
                what: format!("memory at {:#x}", addr),
                raw: "unset".to_string(),
            })
        }
        fn write_mem(&mut self, addr: u32, value: u32) -> Result<(), Error> {
            self.memory.insert(addr, value);
            Ok(())
        }
        fn reg_name(&mut self, _name: &str) -> Result<Option<String>, Error> {
            Ok(None)
        }
        fn mem_name(&mut self, addr: u32) -> Result<Option<String>, Error> {
            Ok(self.symbols.get(&addr).cloned())
        }
        fn sym_addr(&mut self, name: &str) -> Result<Option<u32>, Error> {
            Ok(self
                .symbols
                .iter()
                .find(|(_, n)| n.as_str() == name)
                .map(|(a, _)| *a))
        }
        fn read_global_timer(&mut self) -> Result<u64, Error> {
            Ok(self.global_timer)
        }
        fn get_var(&mut self, name: &str) -> Result<String, Error> {
            self.vars
                .get(name)
                .cloned()
                .ok_or_else(|| Error::ReadFailed {
                    what: format!("variable {}", name),
                    raw: "unset".to_string(),
                })
        }
        fn exec(&mut self, command: &str) -> Result<String, Error> {
            Ok(format!("executed: {}", command))
        }
        fn disconnect(&mut self) -> Result<(), Error> {
            Ok(())
        }
        fn reconnect(&mut self, _gdb_port: u16) -> Result<(), Error> {
            Ok(())
        }
        fn quit(&mut self) -> Result<(), Error> {
            Ok(())
        }
        fn poll_event(&mut self, _timeout: Duration) -> Result<Option<DebugEvent>, Error> {
            Ok(self.events.pop_front())
        }
    }
}

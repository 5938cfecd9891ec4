//! Typed client for the debugger agent's textual protocol (spec §4.C),
//! owned exclusively by the send/receive threads (spec §5); the state
//! machine only ever talks to it through the command/event queues built on
//! top in `queues.rs`.

use seu_core::error::Error;
use seu_transport::FramedStream;

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    BreakpointHit(String),
    StopHandler,
    TimeoutDetected,
    GdbDied,
    Finished,
}

pub struct AgentClient {
    stream: FramedStream,
}

impl AgentClient {
    pub fn new(stream: FramedStream) -> Self {
        Self { stream }
    }

    pub fn rebind(&mut self, addr: impl std::net::ToSocketAddrs) -> Result<(), Error> {
        self.stream.rebind(addr)
    }

    pub fn configure_gdb(&mut self) -> Result<String, Error> {
        self.stream.send_str("configure_gdb")?;
        self.stream.recv_str()
    }

    pub fn silent_configure(&mut self) -> Result<(), Error> {
        self.stream.send_str("silent_configure")
    }

    pub fn set_timeout(&mut self, seconds: f64) -> Result<String, Error> {
        self.stream.send_str("set_timeout")?;
        self.stream.send_str(&seconds.to_string())?;
        self.stream.recv_str()
    }

    pub fn setup_handlers(&mut self) -> Result<String, Error> {
        self.stream.send_str("setup_handlers")?;
        self.stream.recv_str()
    }

    /// Sends `continue`; the caller must follow up with `recv_event` to get
    /// the asynchronous stop/breakpoint/timeout message (spec §4.C: "no
    /// response; later an asynchronous event message").
    pub fn continue_target(&mut self, repeat: Option<u32>) -> Result<(), Error> {
        match repeat {
            Some(n) => self.stream.send_str(&format!("continue {}", n)),
            None => self.stream.send_str("continue"),
        }
    }

    pub fn interrupt(&mut self) -> Result<String, Error> {
        self.stream.send_str("interrupt")?;
        self.stream.recv_str()
    }

    pub fn reload(&mut self) -> Result<(), Error> {
        self.stream.send_str("reload")
    }

    pub fn read_reg(&mut self, name: &str) -> Result<String, Error> {
        self.stream.send_str("read_reg")?;
        self.stream.send_str(name)?;
        self.stream.recv_str()
    }

    pub fn write_reg(&mut self, name: &str, value: u32) -> Result<(), Error> {
        self.stream.send_str("write_reg")?;
        self.stream.send_str(name)?;
        self.stream.send_str(&format!("{:x}", value))
    }

    pub fn read_mem(&mut self, addr: u32) -> Result<String, Error> {
        self.stream.send_str("read_mem")?;
        self.stream.send_str(&format!("{:x}", addr))?;
        self.stream.recv_str()
    }

    pub fn write_mem(&mut self, addr: u32, value: u32) -> Result<(), Error> {
        self.stream.send_str("write_mem")?;
        self.stream.send_str(&format!("{:x}", addr))?;
        self.stream.send_str(&format!("{:x}", value))
    }

    pub fn reg_name(&mut self, name: &str) -> Result<Option<String>, Error> {
        self.stream.send_str("reg_name")?;
        self.stream.send_str(name)?;
        none_if_literal_none(self.stream.recv_str()?)
    }

    pub fn mem_name(&mut self, addr: u32) -> Result<Option<String>, Error> {
        self.stream.send_str("mem_name")?;
        self.stream.send_str(&format!("{:x}", addr))?;
        none_if_literal_none(self.stream.recv_str()?)
    }

    pub fn sym_addr(&mut self, name: &str) -> Result<Option<u64>, Error> {
        self.stream.send_str("sym_addr")?;
        self.stream.send_str(name)?;
        let raw = self.stream.recv_str()?;
        if raw == "None" {
            Ok(None)
        } else {
            raw.parse().map(Some).map_err(|_| Error::ReadFailed {
                what: "sym_addr".to_string(),
                raw,
            })
        }
    }

    pub fn read_global_timer(&mut self) -> Result<u64, Error> {
        self.stream.send_str("read_global_timer")?;
        let raw = self.stream.recv_str()?;
        raw.parse().map_err(|_| Error::ReadFailed {
            what: "global timer".to_string(),
            raw,
        })
    }

    pub fn get_var(&mut self, name: &str) -> Result<String, Error> {
        self.stream.send_str("get_var")?;
        self.stream.send_str(name)?;
        self.stream.recv_str()
    }

    pub fn exec(&mut self, command: &str) -> Result<String, Error> {
        self.stream.send_str("exec")?;
        self.stream.send_str(command)?;
        self.stream.recv_str()
    }

    pub fn quit(&mut self) -> Result<String, Error> {
        self.stream.send_str("quit")?;
        self.stream.recv_str()
    }

    pub fn kill(&mut self) -> Result<String, Error> {
        self.stream.send_str("kill")?;
        self.stream.recv_str()
    }

    pub fn silent_kill(&mut self) -> Result<(), Error> {
        self.stream.send_str("silent_kill")
    }

    pub fn disconnect(&mut self) -> Result<(), Error> {
        self.stream.send_str("disconnect")
    }

    pub fn reconnect(&mut self) -> Result<(), Error> {
        self.stream.send_str("reconnect")
    }

    /// Blocks for the next event frame (or frames, for breakpoint hits).
    pub fn recv_event(&mut self) -> Result<AgentEvent, Error> {
        let first = self.stream.recv_str()?;
        match first.as_str() {
            "hit breakpoint" => {
                let location = self.stream.recv_str()?;
                Ok(AgentEvent::BreakpointHit(location))
            }
            "hit stop handler" | "hit the basic stop handler" => Ok(AgentEvent::StopHandler),
            "Timeout detected" => Ok(AgentEvent::TimeoutDetected),
            "GDB died!" => Ok(AgentEvent::GdbDied),
            "Finished" => Ok(AgentEvent::Finished),
            other => Err(Error::ConnectionLost {
                reason: format!("unexpected agent event: {:?}", other),
            }),
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<(), Error> {
        self.stream.set_read_timeout(timeout)
    }
}

fn none_if_literal_none(raw: String) -> Result<Option<String>, Error> {
    if raw == "None" {
        Ok(None)
    } else {
        Ok(Some(raw))
    }
}

/// Parses a hex string reply (`read_reg`/`read_mem`) into a `u32`, failing
/// with `ReadFailed` on non-hex input (spec §4.E step 2, §7).
pub fn parse_hex_reply(what: &str, raw: &str) -> Result<u32, Error> {
    u32::from_str_radix(raw.trim(), 16).map_err(|_| Error::ReadFailed {
        what: what.to_string(),
        raw: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_reply_rejects_non_hex() {
        let err = parse_hex_reply("register r5", "not-hex").unwrap_err();
        assert!(matches!(err, Error::ReadFailed { .. }));
    }

    #[test]
    fn parse_hex_reply_accepts_hex() {
        assert_eq!(parse_hex_reply("register r5", "a0").unwrap(), 0xA0);
    }
}

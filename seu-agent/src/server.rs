//! Agent-side command dispatcher (spec §4.C).
//!
//! One command per framed message; arguments are additional framed messages
//! when the table in spec §4.C says so. `continue` gets no immediate reply —
//! the next frame written to the socket is whatever asynchronous event
//! follows (a breakpoint hit, the watchdog firing, or the underlying
//! process dying).

use crate::backend::{DebugBackend, DebugEvent};
use crate::watchdog::Watchdog;
use crossbeam_channel::{Receiver, Sender};
use seu_core::error::Error;
use seu_transport::FramedStream;
use std::time::Duration;

pub struct Dispatcher<B: DebugBackend> {
    backend: B,
    watchdog: Watchdog,
    watchdog_tx: Sender<DebugEvent>,
    watchdog_rx: Receiver<DebugEvent>,
    benchmark_breakpoints: Vec<String>,
    reset_pc: u32,
}

impl<B: DebugBackend> Dispatcher<B> {
    pub fn new(backend: B, benchmark_breakpoints: Vec<String>) -> Self {
        let (watchdog_tx, watchdog_rx) = crossbeam_channel::unbounded();
        Self {
            backend,
            watchdog: Watchdog::new(1.0),
            watchdog_tx,
            watchdog_rx,
            benchmark_breakpoints,
            reset_pc: 0,
        }
    }

    /// Services one client connection until `quit`/`kill` or a connection
    /// loss. Returns `Ok(true)` if the agent should exit the process.
    pub fn run(&mut self, stream: &mut FramedStream, gdb_port: u16) -> Result<bool, Error> {
        loop {
            let command = stream.recv_str()?;
            match self.dispatch(&command, stream, gdb_port) {
                Ok(should_exit) => {
                    if should_exit {
                        return Ok(true);
                    }
                }
                Err(Error::UnrecognizedCommand { cmd }) => {
                    stream.send_str(&format!("invalid command: {}", cmd))?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn dispatch(
        &mut self,
        command: &str,
        stream: &mut FramedStream,
        gdb_port: u16,
    ) -> Result<bool, Error> {
        let (cmd, _arg0) = split_first_token(command);
        match cmd {
            "configure_gdb" => {
                self.reset_pc = self.backend.configure(gdb_port, &self.benchmark_breakpoints)?;
                stream.send_str("configuring GDB")?;
            }
            "silent_configure" => {
                self.reset_pc = self.backend.configure(gdb_port, &self.benchmark_breakpoints)?;
            }
            "set_timeout" => {
                let secs: f64 = stream.recv_str()?.parse().unwrap_or(0.0);
                self.watchdog.set_period_secs(secs);
                stream.send_str("correctly set timeout")?;
            }
            "setup_handlers" => {
                self.backend.setup_handlers()?;
                stream.send_str("setting up GDB event handlers")?;
            }
            "continue" => {
                let repeat = stream.recv_str().ok().and_then(|s| s.parse::<u32>().ok());
                self.backend.continue_target(repeat)?;
                self.watchdog.clear_induced_flag();
                self.watchdog.arm(self.watchdog_tx.clone());
                let event = self.wait_for_event()?;
                send_event(stream, event)?;
            }
            "interrupt" => {
                let reply = self.backend.interrupt()?;
                stream.send_str(&reply)?;
            }
            "reload" => {
                self.backend.reload(self.reset_pc)?;
            }
            "read_reg" => {
                let name = stream.recv_str()?;
                let value = self.backend.read_reg(&name)?;
                stream.send_str(&format!("{:x}", value))?;
            }
            "write_reg" => {
                let name = stream.recv_str()?;
                let value = parse_hex_arg(&stream.recv_str()?)?;
                self.backend.write_reg(&name, value)?;
            }
            "read_mem" => {
                let addr = parse_hex_arg(&stream.recv_str()?)?;
                let value = self.backend.read_mem(addr)?;
                stream.send_str(&format!("{:x}", value))?;
            }
            "write_mem" => {
                let addr = parse_hex_arg(&stream.recv_str()?)?;
                let value = parse_hex_arg(&stream.recv_str()?)?;
                self.backend.write_mem(addr, value)?;
            }
            "reg_name" => {
                let name = stream.recv_str()?;
                let reply = self.backend.reg_name(&name)?.unwrap_or_else(|| "None".into());
                stream.send_str(&reply)?;
            }
            "mem_name" => {
                let addr = parse_hex_arg(&stream.recv_str()?)?;
                let reply = self.backend.mem_name(addr)?.unwrap_or_else(|| "None".into());
                stream.send_str(&reply)?;
            }
            "sym_addr" => {
                let name = stream.recv_str()?;
                let reply = self
                    .backend
                    .sym_addr(&name)?
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "None".into());
                stream.send_str(&reply)?;
            }
            "read_global_timer" => {
                let value = self.backend.read_global_timer()?;
                stream.send_str(&value.to_string())?;
            }
            "get_var" => {
                let name = stream.recv_str()?;
                let value = self.backend.get_var(&name)?;
                stream.send_str(&value)?;
            }
            "exec" => {
                let raw_command = stream.recv_str()?;
                let reply = match self.backend.exec(&raw_command) {
                    Ok(s) => s,
                    Err(e) => e.to_string(),
                };
                stream.send_str(&reply)?;
            }
            "quit" | "kill" => {
                self.backend.quit()?;
                stream.send_str("goodbye")?;
                return Ok(true);
            }
            "silent_kill" => {
                self.backend.quit()?;
                return Ok(true);
            }
            "disconnect" => {
                self.backend.disconnect()?;
            }
            "reconnect" => {
                self.backend.reconnect(gdb_port)?;
            }
            other => {
                return Err(Error::UnrecognizedCommand {
                    cmd: other.to_string(),
                })
            }
        }
        Ok(false)
    }

    /// Polls the backend for a real debug event and drains the watchdog's
    /// channel on every pass, so a `TimeoutDetected` it fires (spec §4.C
    /// "the backstop ... regardless of F's state") surfaces even while the
    /// backend itself is still blocked.
    fn wait_for_event(&mut self) -> Result<DebugEvent, Error> {
        loop {
            if let Ok(event) = self.watchdog_rx.try_recv() {
                return Ok(event);
            }
            if let Some(event) = self.backend.poll_event(Duration::from_millis(200))? {
                self.watchdog.cancel();
                return Ok(event);
            }
        }
    }
}

fn send_event(stream: &mut FramedStream, event: DebugEvent) -> Result<(), Error> {
    match event {
        DebugEvent::BreakpointHit(location) => {
            stream.send_str("hit breakpoint")?;
            stream.send_str(&location)?;
        }
        DebugEvent::StopHandler => stream.send_str("hit stop handler")?,
        DebugEvent::TimeoutDetected => stream.send_str("Timeout detected")?,
        DebugEvent::GdbDied => stream.send_str("GDB died!")?,
        DebugEvent::Finished => stream.send_str("Finished")?,
    }
    Ok(())
}

fn split_first_token(command: &str) -> (&str, Option<&str>) {
    match command.find(' ') {
        Some(idx) => (&command[..idx], Some(command[idx + 1..].trim())),
        None => (command, None),
    }
}

fn parse_hex_arg(raw: &str) -> Result<u32, Error> {
    let trimmed = raw.trim().trim_start_matches("0x");
    u32::from_str_radix(trimmed, 16).map_err(|_| Error::ReadFailed {
        what: "argument".to_string(),
        raw: raw.to_string(),
    })
}

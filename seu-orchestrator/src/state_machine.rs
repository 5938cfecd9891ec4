//! Campaign state machine (spec §4.F): `InjectFault` → `GetOutput` →
//! (`Timeout` |) `Reset` → `Dead` → `InjectFault`, terminating at `Finished`.

use crate::agent_client::{AgentClient, AgentEvent};
use crate::cli::Section;
use crate::emulator::{EmulatorProcess, PluginArgs};
use crate::forced::ForcedInjection;
use crate::injector::Injector;
use crate::plugin::{PluginClient, PluginRequest, PluginResponse};
use crate::queue::{ControlMarker, QueueEvent};
use crossbeam_channel::{Receiver, Sender};
use rand::Rng;
use seu_core::board::Board;
use seu_core::bounds::{Bounds, Direction};
use seu_core::counters::CampaignCounters;
use seu_core::error::Error;
use seu_core::outcome::RunOutcome;
use seu_core::timing::{precise_sleep, Timestamp};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    InjectFault,
    GetOutput,
    Timeout,
    Reset,
    Dead,
    Finished,
}

pub struct CampaignMachine<'a, R: Rng> {
    pub agent: AgentClient,
    pub plugin: Option<PluginClient>,
    pub board: &'a Board,
    pub section: Section,
    pub forced: Vec<ForcedInjection>,
    pub bounds: Bounds,
    pub counters: CampaignCounters,
    pub rng: R,
    pub benchmark_breakpoints: Vec<String>,
    pub nerrors_var: String,
    pub queue_tx: Sender<QueueEvent>,
    pub result_recorded_rx: Receiver<()>,
    pub max_uart_wait: Duration,
    pub max_output_time: Duration,
    pub plugin_mode: bool,
    pub baseline_cycle_period: u64,
    pub debug_commands: Vec<String>,
    /// Collaborator handle for `Dead`'s restart step (spec §4.F). Held as a
    /// reference rather than owned so `main` keeps the final `stop()` call.
    pub emulator: &'a mut EmulatorProcess,
    /// Address the agent socket reconnects to after the emulator (and the
    /// agent process it talks to) is torn down and respawned.
    pub agent_addr: (String, u16),
    /// Re-supplied to `EmulatorProcess::restart` on every `Dead` pass so the
    /// respawned QEMU gets the same plugin handshake as the first start.
    pub plugin_args: Option<PluginArgs>,
    serial: u64,
    normal_reset: bool,
    pending_log: Option<seu_core::log::InjectionLog>,
}

impl<'a, R: Rng> CampaignMachine<'a, R> {
    pub fn new(
        agent: AgentClient,
        plugin: Option<PluginClient>,
        board: &'a Board,
        section: Section,
        forced: Vec<ForcedInjection>,
        bounds: Bounds,
        counters: CampaignCounters,
        rng: R,
        benchmark_breakpoints: Vec<String>,
        nerrors_var: String,
        queue_tx: Sender<QueueEvent>,
        result_recorded_rx: Receiver<()>,
        max_uart_wait: Duration,
        max_output_time: Duration,
        plugin_mode: bool,
        baseline_cycle_period: u64,
        debug_commands: Vec<String>,
        emulator: &'a mut EmulatorProcess,
        agent_addr: (String, u16),
        plugin_args: Option<PluginArgs>,
    ) -> Self {
        Self {
            agent,
            plugin,
            board,
            section,
            forced,
            bounds,
            counters,
            rng,
            benchmark_breakpoints,
            nerrors_var,
            queue_tx,
            result_recorded_rx,
            max_uart_wait,
            max_output_time,
            plugin_mode,
            baseline_cycle_period,
            debug_commands,
            emulator,
            agent_addr,
            plugin_args,
            serial: 0,
            normal_reset: true,
            pending_log: None,
        }
    }

    /// Drives the campaign to completion, returning the number of
    /// injections actually performed.
    pub fn run(&mut self) -> Result<u64, Error> {
        let mut state = if self.plugin_mode { State::Reset } else { State::InjectFault };
        loop {
            state = match state {
                State::InjectFault => self.step_inject_fault()?,
                State::GetOutput => self.step_get_output()?,
                State::Timeout => self.step_timeout()?,
                State::Reset => self.step_reset()?,
                State::Dead => self.step_dead()?,
                State::Finished => return Ok(self.counters.injections_done),
            };
        }
    }

    fn forced_for_serial(&self, serial: u64) -> Option<ForcedInjection> {
        self.forced
            .iter()
            .find(|f| match f.iteration {
                None => true,
                Some(start) => serial >= start && serial < start + f.break_count.max(1) as u64,
            })
            .cloned()
    }

    fn choose_sleep_time(&mut self, forced: Option<&ForcedInjection>) -> f64 {
        if let Some(forced) = forced {
            return forced.break_sleep.unwrap_or(0.0);
        }
        if self.plugin_mode {
            let hi = (0.95 * self.baseline_cycle_period as f64) as u64;
            self.rng.gen_range(0..=hi.max(1)) as f64
        } else {
            self.rng.gen_range(self.bounds.lower()..=self.bounds.upper())
        }
    }

    fn step_inject_fault(&mut self) -> Result<State, Error> {
        let serial = self.serial;
        let forced = self.forced_for_serial(serial);
        let sleep_time = self.choose_sleep_time(forced.as_ref());

        if self.plugin_mode {
            return self.inject_fault_plugin_mode(serial, forced, sleep_time);
        }

        self.agent.interrupt()?;
        self.agent.reload()?;
        self.agent.continue_target(None)?;
        match self.agent.recv_event()? {
            AgentEvent::BreakpointHit(loc) if loc == self.benchmark_breakpoints[0] => {}
            AgentEvent::TimeoutDetected => return Ok(State::Reset),
            _ => return Ok(State::Reset),
        }

        let begin = self.agent.read_global_timer()?;
        self.agent.continue_target(None)?;
        precise_sleep(Duration::from_secs_f64(sleep_time.max(0.0)));
        self.agent.interrupt()?;
        let event = self.agent.recv_event()?;
        if let AgentEvent::BreakpointHit(loc) = &event {
            if loc == &self.benchmark_breakpoints[1] {
                let n_errors = self.agent.get_var(&self.nerrors_var).unwrap_or_default();
                if n_errors.trim() == "0" {
                    self.bounds.change_bounds(Direction::ShrinkUpper);
                    return Ok(State::InjectFault);
                }
            }
        }
        let end = self.agent.read_global_timer()?;
        let cycles = seu_core::timing::cycles_elapsed(begin, end);
        if cycles == 0 {
            self.bounds.change_bounds(Direction::GrowLower);
            return Ok(State::InjectFault);
        }
        let pc = parse_pc(&self.agent.read_reg("pc")?)?;

        if forced.is_some() {
            self.run_debug_commands()?;
        }

        let injector = Injector::new(self.board);
        let selection = injector.select_target(self.section, forced.as_ref(), self.plugin.as_mut(), &mut self.rng)?;
        let symbol_name = nearest_symbol(self.board, &selection.target);
        let (old, new) = injector.perturb(&mut self.agent, &selection, forced.as_ref().map(|f| f.value), &mut self.rng)?;

        let log = injector.build_log(&selection, serial, self.section, old, new, symbol_name, sleep_time, cycles, pc);
        self.pending_log = Some(log);

        self.agent.continue_target(None)?;
        Ok(State::GetOutput)
    }

    fn inject_fault_plugin_mode(&mut self, serial: u64, forced: Option<ForcedInjection>, sleep_time: f64) -> Result<State, Error> {
        let plugin = match self.plugin.as_mut() {
            Some(p) => p,
            None => return Ok(State::Dead),
        };
        plugin.request(&PluginRequest::SetInjectCycle { cycles: sleep_time as u64 })?;
        self.agent.continue_target(None)?;
        let pc = parse_pc(&self.agent.read_reg("pc")?)?;

        let response = self
            .plugin
            .as_mut()
            .unwrap()
            .request(&PluginRequest::ReadCycleCounter)?;
        let actual_cycles = match response {
            PluginResponse::CycleCounter { value } => value,
            _ => return Ok(State::Dead),
        };

        let injector = Injector::new(self.board);
        let selection = injector.select_target(self.section, forced.as_ref(), self.plugin.as_mut(), &mut self.rng)?;
        let mapped_address = match &selection.target {
            seu_core::target::InjectionTarget::MemoryWord(addr) => *addr,
            seu_core::target::InjectionTarget::CacheWord { .. } => 0,
            seu_core::target::InjectionTarget::Register(_) => 0,
        };
        let (old, new) = injector.perturb_cache_word(&mut self.agent, mapped_address, forced.as_ref().map(|f| f.value), &mut self.rng)?;

        let log = injector.build_log(&selection, serial, self.section, old, new, None, sleep_time, actual_cycles, pc);
        self.pending_log = Some(log);
        Ok(State::GetOutput)
    }

    fn step_get_output(&mut self) -> Result<State, Error> {
        self.agent.set_read_timeout(Some(self.max_uart_wait))?;
        let event = match self.agent.recv_event() {
            Ok(e) => e,
            Err(_) => return Ok(State::Timeout),
        };
        match event {
            AgentEvent::TimeoutDetected => return Ok(State::Timeout),
            AgentEvent::GdbDied => return Ok(State::Dead),
            _ => {}
        }

        self.agent.set_read_timeout(Some(self.max_output_time))?;
        let outcome = self.decode_outcome()?;
        self.counters.errors_seen += outcome.error_count() as u64;
        self.queue_tx.send(QueueEvent::Outcome(outcome)).ok();
        if let Some(log) = self.pending_log.take() {
            self.queue_tx.send(QueueEvent::Log(log)).ok();
        }

        match self.agent.recv_event() {
            Ok(AgentEvent::BreakpointHit(loc)) if self.benchmark_breakpoints.contains(&loc) => {}
            _ => return Ok(State::Dead),
        }

        let _ = self.result_recorded_rx.recv_timeout(Duration::from_secs(5));
        self.serial += 1;
        self.counters.injections_done += 1;

        if self.counters.is_finished() {
            Ok(State::Finished)
        } else {
            Ok(State::Reset)
        }
    }

    /// Decodes the outcome for the just-completed workload by reading the
    /// guest's error counter variable directly over the agent socket.
    fn decode_outcome(&mut self) -> Result<RunOutcome, Error> {
        let value = self.agent.get_var(&self.nerrors_var).unwrap_or_default();
        let errors: u32 = value.trim().parse().unwrap_or(0);
        Ok(RunOutcome::Run {
            core: 0,
            errors,
            faults: 0,
            runtime_sec: 0.0,
            timestamp: Timestamp::now(),
        })
    }

    fn step_timeout(&mut self) -> Result<State, Error> {
        let _ = self.agent.interrupt();
        std::thread::sleep(Duration::from_millis(20));
        let pc = self.agent.read_reg("pc").ok().and_then(|raw| parse_pc(&raw).ok());
        let outcome = RunOutcome::Timeout {
            message: "Timeout detected".to_string(),
            pc,
            was_trap: false,
            timestamp: Timestamp::now(),
        };
        self.counters.errors_seen += outcome.error_count() as u64;
        self.queue_tx.send(QueueEvent::Outcome(outcome)).ok();
        if let Some(log) = self.pending_log.take() {
            self.queue_tx.send(QueueEvent::Log(log)).ok();
        }
        let _ = self.result_recorded_rx.recv_timeout(Duration::from_secs(5));
        self.serial += 1;
        self.counters.injections_done += 1;
        self.normal_reset = false;
        if self.counters.is_finished() {
            Ok(State::Finished)
        } else {
            Ok(State::Reset)
        }
    }

    fn step_reset(&mut self) -> Result<State, Error> {
        self.normal_reset = true;
        self.step_dead()
    }

    /// Restarts the emulator and rewires the agent/plugin sockets onto the
    /// respawned process (spec §4.F `Dead`: "call B.restart... rewire all
    /// socket handles"). Per §7, a failure here never propagates past this
    /// state transition; it just retries `Dead` after a short backoff.
    fn step_dead(&mut self) -> Result<State, Error> {
        let _ = self.agent.silent_kill();
        self.queue_tx.send(QueueEvent::Control(ControlMarker::DiscardUartResult)).ok();

        let plugin_stream = match self.emulator.restart(true, self.plugin_args.as_ref()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("emulator restart failed, retrying: {}", e);
                std::thread::sleep(Duration::from_millis(200));
                return Ok(State::Dead);
            }
        };

        if let Err(e) = self.agent.rebind(self.agent_addr.clone()) {
            tracing::warn!("agent rebind failed after restart, retrying: {}", e);
            std::thread::sleep(Duration::from_millis(200));
            return Ok(State::Dead);
        }
        if let Some(stream) = plugin_stream {
            self.plugin = Some(PluginClient::new(stream));
        }

        if let Err(e) = self.agent.setup_handlers() {
            tracing::warn!("setup_handlers failed after restart, retrying: {}", e);
            std::thread::sleep(Duration::from_millis(200));
            return Ok(State::Dead);
        }
        if let Err(e) = self.agent.set_timeout(self.baseline_cycle_period as f64) {
            tracing::warn!("set_timeout failed after restart, retrying: {}", e);
            std::thread::sleep(Duration::from_millis(200));
            return Ok(State::Dead);
        }

        Ok(State::InjectFault)
    }

    /// Issues each configured debug command as a raw `exec` before a forced
    /// injection is applied (spec §9 `-x/--debug-commands`).
    fn run_debug_commands(&mut self) -> Result<(), Error> {
        for command in &self.debug_commands {
            self.agent.exec(command)?;
        }
        Ok(())
    }
}

/// Looks up the nearest known symbol for a memory or cache target; register
/// targets have no address to resolve against the symbol table.
fn nearest_symbol(board: &Board, target: &seu_core::target::InjectionTarget) -> Option<String> {
    match target {
        seu_core::target::InjectionTarget::MemoryWord(addr) => board.symbol_table.nearest(*addr).map(str::to_string),
        seu_core::target::InjectionTarget::CacheWord { .. } => None,
        seu_core::target::InjectionTarget::Register(_) => None,
    }
}

fn parse_pc(raw: &str) -> Result<u32, Error> {
    crate::agent_client::parse_hex_reply("pc", raw)
}

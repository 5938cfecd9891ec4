//! Logging/queue fabric (spec §4.G): a single consumer thread drains a
//! producer-agnostic queue of typed events and correlates outcomes with
//! injection logs before flushing both to the text and JSON sinks.

use crossbeam_channel::{Receiver, Sender};
use seu_core::log::InjectionLog;
use seu_core::outcome::RunOutcome;
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMarker {
    DiscardUartResult,
    UnderTime,
    NormalTime,
    QueueStop,
}

#[derive(Debug, Clone)]
pub enum QueueEvent {
    Outcome(RunOutcome),
    Log(InjectionLog),
    Message { source: String, text: String },
    Control(ControlMarker),
}

const UNDER_TIME_SUPPRESS_THRESHOLD: u32 = 5;
/// Fraction of the baseline below which a `Run` outcome is coerced into an
/// error (spec §4.G "under-time coercion").
const UNDER_TIME_FRACTION: f64 = 0.10;

/// Appends `InjectionLog` entries as a JSON array, opening with the kernel
/// path on its own line (spec §4.G "JSON emission").
pub struct JsonSink {
    file: File,
    wrote_first: bool,
}

impl JsonSink {
    pub fn open(path: &Path, elf_path: &str) -> std::io::Result<Self> {
        let mut file = File::create(path)?;
        writeln!(file, "{}", elf_path)?;
        write!(file, "[")?;
        Ok(Self {
            file,
            wrote_first: false,
        })
    }

    pub fn write_entry(&mut self, log: &InjectionLog) -> std::io::Result<()> {
        if self.wrote_first {
            write!(self.file, ",")?;
        }
        self.wrote_first = true;
        let json = serde_json::to_string(log).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        write!(self.file, "{}", json)
    }

    pub fn close(mut self) -> std::io::Result<()> {
        write!(self.file, "]")
    }
}

/// Consumes `QueueEvent`s, correlating outcomes to injection logs and
/// applying the rate-limit / under-time coercion rules.
pub struct LogConsumer {
    receiver: Receiver<QueueEvent>,
    result_recorded: Sender<()>,
    json: Option<JsonSink>,
    text_log: Option<File>,
    pending_outcome: Option<RunOutcome>,
    baseline_runtimes: Vec<f64>,
    under_time_streak: u32,
    suppressing: bool,
    pub published: Vec<InjectionLog>,
}

impl LogConsumer {
    pub fn new(
        receiver: Receiver<QueueEvent>,
        result_recorded: Sender<()>,
        json: Option<JsonSink>,
        text_log: Option<File>,
    ) -> Self {
        Self {
            receiver,
            result_recorded,
            json,
            text_log,
            pending_outcome: None,
            baseline_runtimes: Vec::new(),
            under_time_streak: 0,
            suppressing: false,
            published: Vec::new(),
        }
    }

    /// Drains events until `QueueStop`, or until the channel disconnects.
    pub fn run(mut self) {
        while let Ok(event) = self.receiver.recv() {
            if self.handle_event(event) {
                break;
            }
        }
        if let Some(json) = self.json.take() {
            let _ = json.close();
        }
    }

    /// Processes one event; returns `true` when the consumer should stop.
    pub fn handle_event(&mut self, event: QueueEvent) -> bool {
        match event {
            QueueEvent::Control(ControlMarker::QueueStop) => return true,
            QueueEvent::Control(ControlMarker::DiscardUartResult) => {
                self.pending_outcome = None;
            }
            QueueEvent::Control(ControlMarker::UnderTime) => {
                self.under_time_streak += 1;
                if self.under_time_streak >= UNDER_TIME_SUPPRESS_THRESHOLD && !self.suppressing {
                    self.suppressing = true;
                    self.write_text_line("--- truncating output ---");
                }
            }
            QueueEvent::Control(ControlMarker::NormalTime) => {
                self.under_time_streak = 0;
                self.suppressing = false;
            }
            QueueEvent::Message { source, text } => {
                if !self.suppressing {
                    self.write_text_line(&format!("[{}] {}", source, text));
                }
            }
            QueueEvent::Outcome(outcome) => {
                let outcome = self.apply_under_time_coercion(outcome);
                match &self.pending_outcome {
                    Some(existing) if !RunOutcome::should_overwrite(existing, &outcome) => {}
                    _ => self.pending_outcome = Some(outcome),
                }
            }
            QueueEvent::Log(mut log) => {
                log.result = self.pending_outcome.take();
                if log.is_ready_for_publication() {
                    self.write_text_line(&format!(
                        "#{} {} {:#x} -> {:#x}",
                        log.serial_number, log.address_or_register_name, log.old_value, log.new_value
                    ));
                    if let Some(json) = &mut self.json {
                        let _ = json.write_entry(&log);
                    }
                    self.published.push(log);
                }
                let _ = self.result_recorded.try_send(());
            }
        }
        false
    }

    /// Coerces a `Run` whose runtime is below `UNDER_TIME_FRACTION` of the
    /// mean of the first two baseline runs into a forced `errors = 1`
    /// (spec §4.G). Non-`Run` outcomes pass through unchanged.
    fn apply_under_time_coercion(&mut self, outcome: RunOutcome) -> RunOutcome {
        if let RunOutcome::Run {
            core,
            errors,
            faults,
            runtime_sec,
            timestamp,
        } = outcome
        {
            if self.baseline_runtimes.len() < 2 {
                self.baseline_runtimes.push(runtime_sec);
            }
            let baseline = if self.baseline_runtimes.is_empty() {
                0.0
            } else {
                self.baseline_runtimes.iter().sum::<f64>() / self.baseline_runtimes.len() as f64
            };
            let coerced_errors = if baseline > 0.0 && runtime_sec < UNDER_TIME_FRACTION * baseline {
                errors.max(1)
            } else {
                errors
            };
            RunOutcome::Run {
                core,
                errors: coerced_errors,
                faults,
                runtime_sec,
                timestamp,
            }
        } else {
            outcome
        }
    }

    fn write_text_line(&mut self, line: &str) {
        if let Some(file) = &mut self.text_log {
            let _ = writeln!(file, "{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seu_core::timing::Timestamp;

    fn run_outcome(runtime_sec: f64, errors: u32) -> RunOutcome {
        RunOutcome::Run {
            core: 0,
            errors,
            faults: 0,
            runtime_sec,
            timestamp: Timestamp::now(),
        }
    }

    fn sample_log(serial: u64) -> InjectionLog {
        InjectionLog {
            timestamp: Timestamp::now(),
            serial_number: serial,
            section_label: "registers".into(),
            address_or_register_name: "r5".into(),
            old_value: 1,
            new_value: 2,
            symbol_name: None,
            sleep_time: 0.1,
            cycles_elapsed: 10,
            pc_at_injection: 0,
            cache_info: None,
            result: None,
        }
    }

    fn consumer() -> (LogConsumer, Sender<QueueEvent>, Receiver<()>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (rec_tx, rec_rx) = crossbeam_channel::unbounded();
        (LogConsumer::new(rx, rec_tx, None, None), tx, rec_rx)
    }

    #[test]
    fn correlates_outcome_with_following_log() {
        let (mut consumer, _tx, rec_rx) = consumer();
        consumer.handle_event(QueueEvent::Outcome(run_outcome(1.0, 0)));
        consumer.handle_event(QueueEvent::Log(sample_log(1)));
        assert_eq!(consumer.published.len(), 1);
        assert!(consumer.published[0].result.is_some());
        assert!(rec_rx.try_recv().is_ok());
    }

    #[test]
    fn discard_uart_result_clears_pending_outcome() {
        let (mut consumer, _tx, _rec_rx) = consumer();
        consumer.handle_event(QueueEvent::Outcome(run_outcome(1.0, 0)));
        consumer.handle_event(QueueEvent::Control(ControlMarker::DiscardUartResult));
        consumer.handle_event(QueueEvent::Log(sample_log(1)));
        // The discarded outcome leaves the log with no result, so it never
        // becomes ready for publication (spec §3: published logs always
        // carry a non-null result).
        assert!(consumer.published.is_empty());
    }

    #[test]
    fn abort_outcome_is_not_overwritten_by_timeout() {
        let (mut consumer, _tx, _rec_rx) = consumer();
        consumer.handle_event(QueueEvent::Outcome(RunOutcome::Abort {
            kind: "Data".into(),
            message: "bus fault".into(),
            timestamp: Timestamp::now(),
        }));
        consumer.handle_event(QueueEvent::Outcome(RunOutcome::Timeout {
            message: "Timeout detected".into(),
            pc: None,
            was_trap: false,
            timestamp: Timestamp::now(),
        }));
        consumer.handle_event(QueueEvent::Log(sample_log(1)));
        assert!(matches!(
            consumer.published[0].result,
            Some(RunOutcome::Abort { .. })
        ));
    }

    #[test]
    fn under_time_runtime_is_coerced_to_an_error() {
        let (mut consumer, _tx, _rec_rx) = consumer();
        consumer.handle_event(QueueEvent::Outcome(run_outcome(1.0, 0)));
        consumer.handle_event(QueueEvent::Log(sample_log(1)));
        consumer.handle_event(QueueEvent::Outcome(run_outcome(1.0, 0)));
        consumer.handle_event(QueueEvent::Log(sample_log(2)));
        // baseline mean is now 1.0; a run at 5% of baseline should be coerced
        consumer.handle_event(QueueEvent::Outcome(run_outcome(0.05, 0)));
        consumer.handle_event(QueueEvent::Log(sample_log(3)));
        match &consumer.published[2].result {
            Some(RunOutcome::Run { errors, .. }) => assert_eq!(*errors, 1),
            other => panic!("expected coerced Run outcome, got {:?}", other),
        }
    }

    #[test]
    fn rate_limit_suppresses_after_five_under_time_markers() {
        let (mut consumer, _tx, _rec_rx) = consumer();
        for _ in 0..5 {
            consumer.handle_event(QueueEvent::Control(ControlMarker::UnderTime));
        }
        assert!(consumer.suppressing);
        consumer.handle_event(QueueEvent::Control(ControlMarker::NormalTime));
        assert!(!consumer.suppressing);
        assert_eq!(consumer.under_time_streak, 0);
    }
}

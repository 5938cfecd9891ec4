//! Line-oriented decoders for guest stdout and debugger log lines (spec §4.D).

use crate::outcome::RunOutcome;
use crate::timing::Timestamp;
use once_cell::sync::Lazy;
use regex::Regex;

static EXEC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*C:\s*(\d+)\s*E:\s*(\d+)\s*F:\s*(\d+)\s*T:\s*(\d+(?:\.\d+)?)\s*(s|ms|us)\s*$")
        .unwrap()
});
static ASSERT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Assert failed in file (.*), line ([0-9]+)$").unwrap());
static ABORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(Data|Prefetch) abort with (.*)$").unwrap());
static STACK_OVERFLOW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^HALT: Task (.*) overflowed its stack\.$").unwrap());

/// A guest line that is neither a structured outcome nor passthrough noise.
#[derive(Debug, Clone, PartialEq)]
pub enum GuestLine {
    Outcome(RunOutcome),
    Error(String),
    Info(String),
    /// Dropped (empty line): no queue message produced.
    Drop,
}

/// Converts `runtime` expressed in `unit` (`s`, `ms`, `us`) into seconds.
fn to_seconds(value: f64, unit: &str) -> f64 {
    match unit {
        "s" => value,
        "ms" => value / 1_000.0,
        "us" => value / 1_000_000.0,
        _ => value,
    }
}

/// Decodes one line of guest-program stdout (spec §4.D, first match wins).
pub fn decode_guest_line(line: &str) -> GuestLine {
    if line.is_empty() {
        return GuestLine::Drop;
    }
    let timestamp = Timestamp::now();

    if let Some(caps) = EXEC_RE.captures(line) {
        let core: u32 = caps[1].parse().unwrap_or(0);
        let errors: u32 = caps[2].parse().unwrap_or(0);
        let faults: u32 = caps[3].parse().unwrap_or(0);
        let raw_time: f64 = caps[4].parse().unwrap_or(0.0);
        let runtime_sec = to_seconds(raw_time, &caps[5]);
        return GuestLine::Outcome(RunOutcome::Run {
            core,
            errors,
            faults,
            runtime_sec,
            timestamp,
        });
    }
    if let Some(caps) = ASSERT_RE.captures(line) {
        return GuestLine::Outcome(RunOutcome::AssertionFail {
            file: caps[1].to_string(),
            line: caps[2].parse().unwrap_or(0),
            timestamp,
        });
    }
    if let Some(caps) = ABORT_RE.captures(line) {
        return GuestLine::Outcome(RunOutcome::Abort {
            kind: caps[1].to_string(),
            message: caps[2].to_string(),
            timestamp,
        });
    }
    if let Some(caps) = STACK_OVERFLOW_RE.captures(line) {
        return GuestLine::Outcome(RunOutcome::StackOverflow {
            task: caps[1].to_string(),
            timestamp,
        });
    }
    if let Some(rest) = line.strip_prefix("ERROR: ") {
        return GuestLine::Error(rest.to_string());
    }
    if let Some(rest) = line.strip_prefix("INFO: ") {
        return GuestLine::Info(rest.to_string());
    }
    GuestLine::Outcome(RunOutcome::Invalid {
        raw: line.to_string(),
        timestamp,
    })
}

/// Noise lines the debugger-log decoder always drops (spec §4.D / `gdbClient.py`).
const SKIP_LIST: [&str; 5] = [
    "The program no longer exists.",
    "Cannot execute this command while the target is running.",
    "Use the \"interrupt\" command to stop the target",
    "and then try again.",
    "Program received signal SIGINT, Interrupt.",
];

static GDB_SKIP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\(gdb\) )|(^\d+\t)").unwrap());
static BP_CREATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Breakpoint [1-9]+ at").unwrap());
static BREAK_AT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^((.*) in )?(\w+|\?\?) \((.*)\)( at (.*))?$").unwrap());

/// Filters debugger-log noise, passing through anything informative.
///
/// Resolves spec §9's open question: the original compares lines with `is`;
/// here equality is always structural (`==`), which only matters for the
/// empty-line and skip-list checks.
pub fn decode_debugger_line(line: &str) -> Option<String> {
    if line == "" {
        return None;
    }
    if GDB_SKIP_RE.is_match(line) {
        return None;
    }
    if line.starts_with("Reading symbols from") {
        return None;
    }
    if line.starts_with("Program terminated with") {
        return None;
    }
    if SKIP_LIST.iter().any(|noise| *noise == line) {
        return None;
    }
    if BP_CREATE_RE.is_match(line) {
        return None;
    }
    if BREAK_AT_RE.is_match(line) {
        return None;
    }
    Some(line.to_string())
}

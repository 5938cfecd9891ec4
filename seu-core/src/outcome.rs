//! `RunOutcome` sum type decoded from guest output / debugger events (spec §3, §4.D).

use crate::timing::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunOutcome {
    Run {
        core: u32,
        errors: u32,
        faults: u32,
        runtime_sec: f64,
        timestamp: Timestamp,
    },
    Timeout {
        message: String,
        pc: Option<u32>,
        was_trap: bool,
        timestamp: Timestamp,
    },
    Invalid {
        raw: String,
        timestamp: Timestamp,
    },
    AssertionFail {
        file: String,
        line: u32,
        timestamp: Timestamp,
    },
    Abort {
        kind: String,
        message: String,
        timestamp: Timestamp,
    },
    StackOverflow {
        task: String,
        timestamp: Timestamp,
    },
}

impl RunOutcome {
    pub fn timestamp(&self) -> &Timestamp {
        match self {
            RunOutcome::Run { timestamp, .. }
            | RunOutcome::Timeout { timestamp, .. }
            | RunOutcome::Invalid { timestamp, .. }
            | RunOutcome::AssertionFail { timestamp, .. }
            | RunOutcome::Abort { timestamp, .. }
            | RunOutcome::StackOverflow { timestamp, .. } => timestamp,
        }
    }

    /// True for outcomes that represent a tolerated-but-observed error
    /// (used by the under-time coercion and error counter, spec §4.G).
    pub fn error_count(&self) -> u32 {
        match self {
            RunOutcome::Run { errors, .. } => *errors,
            RunOutcome::AssertionFail { .. }
            | RunOutcome::Abort { .. }
            | RunOutcome::StackOverflow { .. } => 1,
            RunOutcome::Timeout { .. } | RunOutcome::Invalid { .. } => 0,
        }
    }

    /// Precedence used when an outcome queue overwrites a pending outcome
    /// (spec §4.G): `Abort`/`StackOverflow` are never overwritten by a later
    /// `Timeout`.
    pub fn should_overwrite(existing: &RunOutcome, incoming: &RunOutcome) -> bool {
        match (existing, incoming) {
            (RunOutcome::Abort { .. }, RunOutcome::Timeout { .. }) => false,
            (RunOutcome::StackOverflow { .. }, RunOutcome::Timeout { .. }) => false,
            _ => true,
        }
    }
}

//! Error taxonomy for the campaign driver (spec §7).
//!
//! Every remote or protocol failure is converted into one of these kinds at
//! the boundary where it is observed; the state machine in `seu-orchestrator`
//! never lets an `Err` propagate past a state transition, it matches on the
//! kind and decides where to go next.

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("connection lost: {}", reason))]
    ConnectionLost { reason: String },

    #[snafu(display("timed out waiting for {}", what))]
    QueueTimeout { what: String },

    #[snafu(display("debugger returned non-hex value for {}: {:?}", what, raw))]
    ReadFailed { what: String, raw: String },

    #[snafu(display("injection target {} is in a forbidden range", addr))]
    InvalidRange { addr: u32 },

    #[snafu(display("unrecognized command: {}", cmd))]
    UnrecognizedCommand { cmd: String },

    #[snafu(display("failed to restart collaborator: {}", reason))]
    RestartFailed { reason: String },

    #[snafu(display("I/O error: {}", source))]
    Io { source: std::io::Error },

    #[snafu(display("JSON error: {}", source))]
    Json { source: serde_json::Error },

    #[snafu(display("config error: {}", reason))]
    Config { reason: String },
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io { source }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Error::Json { source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Crate-level error type for orchestration failures

use std::fmt;

use crate::client::ClientError;
use crate::session::SessionError;

/// Errors surfaced by the orchestrator.
///
/// Collaborator traits return this directly so implementations can pick
/// the variant that fits; the runner adds node and process context where
/// it has it.
#[derive(Debug)]
pub enum HarnessError {
    /// Remote session failure
    Session(SessionError),
    /// OS setup or teardown failed on a node
    Os { node: String, message: String },
    /// DB setup, teardown or log listing failed on a node
    Db { node: String, message: String },
    /// Client open or close failed fatally
    Client(ClientError),
    /// A worker failed in its generator or post-op logic
    Worker { process: u64, message: String },
    /// The nemesis failed outside its best-effort loop
    Nemesis(String),
    /// Log collection aborted on a non-benign error
    Snarf(String),
    /// Persistence failure
    Store(String),
    /// A collaborator broke its contract (e.g. a completion changed
    /// `process` or `f`)
    Contract(String),
    /// Any other I/O error
    Io(String),
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessError::Session(e) => write!(f, "session error: {}", e),
            HarnessError::Os { node, message } => write!(f, "os stage on {}: {}", node, message),
            HarnessError::Db { node, message } => write!(f, "db stage on {}: {}", node, message),
            HarnessError::Client(e) => write!(f, "client error: {}", e),
            HarnessError::Worker { process, message } => {
                write!(f, "worker {}: {}", process, message)
            }
            HarnessError::Nemesis(msg) => write!(f, "nemesis error: {}", msg),
            HarnessError::Snarf(msg) => write!(f, "log collection error: {}", msg),
            HarnessError::Store(msg) => write!(f, "store error: {}", msg),
            HarnessError::Contract(msg) => write!(f, "contract violation: {}", msg),
            HarnessError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for HarnessError {}

impl From<SessionError> for HarnessError {
    fn from(e: SessionError) -> Self {
        HarnessError::Session(e)
    }
}

impl From<ClientError> for HarnessError {
    fn from(e: ClientError) -> Self {
        HarnessError::Client(e)
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(e: std::io::Error) -> Self {
        HarnessError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(e: serde_json::Error) -> Self {
        HarnessError::Store(e.to_string())
    }
}

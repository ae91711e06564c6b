//! Remote shell sessions and the per-node session pool
//!
//! The pool opens one session per node, all in parallel, before a run
//! and releases every session on exit. If any connection fails during
//! acquisition, the sessions that did open are closed again and the
//! first failure propagates.
//!
//! The real SSH transport lives outside this crate; `LocalShell` runs
//! commands on the local machine (useful for single-host testing) and
//! `NullTransport` backs dry runs.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::process::Command;
use tracing::warn;

use crate::config::RemoteCredentials;

/// Errors from session operations
#[derive(Debug, Clone)]
pub enum SessionError {
    /// Connecting to the node failed
    ConnectionFailed(String),
    /// The remote side closed the stream mid-transfer
    PipeClosed,
    /// A requested remote file does not exist
    FileNotFound(String),
    /// A command ran but exited non-zero
    CommandFailed { command: String, stderr: String },
    /// Any other I/O error
    Io(String),
}

impl SessionError {
    /// Benign errors are tolerated during log collection: a pipe closed
    /// mid-copy, or a file lost to a rotation race.
    pub fn is_benign(&self) -> bool {
        matches!(self, SessionError::PipeClosed | SessionError::FileNotFound(_))
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            SessionError::PipeClosed => write!(f, "pipe closed"),
            SessionError::FileNotFound(path) => write!(f, "file does not exist: {}", path),
            SessionError::CommandFailed { command, stderr } => {
                write!(f, "command `{}` failed: {}", command, stderr)
            }
            SessionError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

/// Output of a remote command
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// One established shell session on a node
#[async_trait]
pub trait Session: Send + Sync {
    /// Run a shell command and capture its output
    async fn exec(&self, command: &str) -> Result<ExecOutput, SessionError>;

    /// Copy a remote file to a local path
    async fn download(&self, remote: &Path, local: &Path) -> Result<(), SessionError>;

    /// Release the session
    async fn close(&self) -> Result<(), SessionError>;
}

/// Establishes sessions; the pluggable remote-shell transport seam
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(
        &self,
        node: &str,
        creds: &RemoteCredentials,
    ) -> Result<Arc<dyn Session>, SessionError>;
}

/// Map of node name to its established session
pub type SessionMap = HashMap<String, Arc<dyn Session>>;

/// Open a session to every node in parallel.
///
/// If any connection fails, every session that did open is closed again
/// (in parallel, best-effort) and the first failure is returned.
pub async fn connect_all(
    factory: &dyn SessionFactory,
    nodes: &[String],
    creds: &RemoteCredentials,
) -> Result<SessionMap, SessionError> {
    let attempts = join_all(nodes.iter().map(|node| async move {
        (node.clone(), factory.connect(node, creds).await)
    }))
    .await;

    let mut sessions = SessionMap::new();
    let mut first_error = None;
    for (node, attempt) in attempts {
        match attempt {
            Ok(session) => {
                sessions.insert(node, session);
            }
            Err(e) => {
                warn!(node = %node, error = %e, "session connect failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        None => Ok(sessions),
        Some(e) => {
            close_all(&sessions).await;
            Err(e)
        }
    }
}

/// Close every session in parallel. Failures are logged and swallowed.
pub async fn close_all(sessions: &SessionMap) {
    join_all(sessions.iter().map(|(node, session)| async move {
        if let Err(e) = session.close().await {
            warn!(node = %node, error = %e, "session close failed");
        }
    }))
    .await;
}

/// Session that accepts everything and does nothing, for dry runs
pub struct NullSession;

#[async_trait]
impl Session for NullSession {
    async fn exec(&self, _command: &str) -> Result<ExecOutput, SessionError> {
        Ok(ExecOutput { status: 0, stdout: String::new(), stderr: String::new() })
    }

    async fn download(&self, _remote: &Path, _local: &Path) -> Result<(), SessionError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Transport that hands out [`NullSession`]s
pub struct NullTransport;

#[async_trait]
impl SessionFactory for NullTransport {
    async fn connect(
        &self,
        _node: &str,
        _creds: &RemoteCredentials,
    ) -> Result<Arc<dyn Session>, SessionError> {
        Ok(Arc::new(NullSession))
    }
}

/// Session that runs commands on the local machine via `sh -c`.
///
/// Lets a whole test run against processes on one host without any
/// remote transport. Downloads are plain file copies.
pub struct LocalShell;

#[async_trait]
impl Session for LocalShell {
    async fn exec(&self, command: &str) -> Result<ExecOutput, SessionError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| SessionError::Io(e.to_string()))?;

        let result = ExecOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        if !output.status.success() {
            return Err(SessionError::CommandFailed {
                command: command.to_string(),
                stderr: result.stderr,
            });
        }
        Ok(result)
    }

    async fn download(&self, remote: &Path, local: &Path) -> Result<(), SessionError> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SessionError::Io(e.to_string()))?;
        }
        tokio::fs::copy(remote, local).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                SessionError::FileNotFound(remote.display().to_string())
            }
            std::io::ErrorKind::BrokenPipe => SessionError::PipeClosed,
            _ => SessionError::Io(e.to_string()),
        })?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Transport that opens a [`LocalShell`] for every node
pub struct LocalTransport;

#[async_trait]
impl SessionFactory for LocalTransport {
    async fn connect(
        &self,
        _node: &str,
        _creds: &RemoteCredentials,
    ) -> Result<Arc<dyn Session>, SessionError> {
        Ok(Arc::new(LocalShell))
    }
}

//! Test doubles for harness integration tests
//!
//! Recording collaborators share a call log (a vec behind a mutex, one
//! `(node, call)` entry per side effect) so tests can assert on what
//! ran and in what shape. Scripted clients replay a fixed sequence of
//! outcomes.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{Client, ClientError, ClientFactory};
use crate::config::{RemoteCredentials, TestRun};
use crate::db::{Db, LogFiles, Primary};
use crate::error::HarnessError;
use crate::generator::Generator;
use crate::history::{Op, OpKind, Process};
use crate::nemesis::Nemesis;
use crate::os::Os;
use crate::session::{ExecOutput, Session, SessionError, SessionFactory};

/// Shared record of collaborator side effects, as `(node, call)` pairs
pub type CallLog = Arc<Mutex<Vec<(String, String)>>>;

/// Create an empty call log
pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Entries of a call log matching a call name
pub fn calls_named(log: &CallLog, name: &str) -> Vec<String> {
    log.lock()
        .iter()
        .filter(|(_, call)| call == name)
        .map(|(node, _)| node.clone())
        .collect()
}

/// OS that records every setup and teardown
pub struct RecordingOs {
    calls: CallLog,
}

impl RecordingOs {
    pub fn new(calls: CallLog) -> Self {
        RecordingOs { calls }
    }
}

#[async_trait]
impl Os for RecordingOs {
    async fn setup(&self, _test: &TestRun, node: &str) -> Result<(), HarnessError> {
        self.calls.lock().push((node.to_string(), "os-setup".to_string()));
        Ok(())
    }

    async fn teardown(&self, _test: &TestRun, node: &str) -> Result<(), HarnessError> {
        self.calls.lock().push((node.to_string(), "os-teardown".to_string()));
        Ok(())
    }
}

/// DB that records calls and can be told to fail setup, advertise log
/// files, or advertise a primary setup step.
pub struct RecordingDb {
    calls: CallLog,
    fail_setup: bool,
    logs: Option<Vec<String>>,
    has_primary: bool,
}

impl RecordingDb {
    pub fn new(calls: CallLog) -> Self {
        RecordingDb { calls, fail_setup: false, logs: None, has_primary: false }
    }

    pub fn failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    pub fn with_log_files(mut self, logs: Vec<String>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn with_primary(mut self) -> Self {
        self.has_primary = true;
        self
    }
}

#[async_trait]
impl Db for RecordingDb {
    async fn setup(&self, _test: &TestRun, node: &str) -> Result<(), HarnessError> {
        self.calls.lock().push((node.to_string(), "db-setup".to_string()));
        if self.fail_setup {
            return Err(HarnessError::Db {
                node: node.to_string(),
                message: "induced setup failure".to_string(),
            });
        }
        Ok(())
    }

    async fn teardown(&self, _test: &TestRun, node: &str) -> Result<(), HarnessError> {
        self.calls.lock().push((node.to_string(), "db-teardown".to_string()));
        Ok(())
    }

    fn primary(&self) -> Option<&dyn Primary> {
        self.has_primary.then_some(self as &dyn Primary)
    }

    fn log_files(&self) -> Option<&dyn LogFiles> {
        self.logs.as_ref().map(|_| self as &dyn LogFiles)
    }
}

#[async_trait]
impl Primary for RecordingDb {
    async fn setup_primary(&self, _test: &TestRun, node: &str) -> Result<(), HarnessError> {
        self.calls.lock().push((node.to_string(), "db-setup-primary".to_string()));
        Ok(())
    }
}

#[async_trait]
impl LogFiles for RecordingDb {
    async fn log_files(&self, _test: &TestRun, node: &str) -> Result<Vec<String>, HarnessError> {
        self.calls.lock().push((node.to_string(), "db-log-files".to_string()));
        Ok(self.logs.clone().unwrap_or_default())
    }
}

/// Transport whose sessions record execs, downloads and closes
pub struct RecordingTransport {
    calls: CallLog,
}

impl RecordingTransport {
    pub fn new(calls: CallLog) -> Self {
        RecordingTransport { calls }
    }
}

#[async_trait]
impl SessionFactory for RecordingTransport {
    async fn connect(
        &self,
        node: &str,
        _creds: &RemoteCredentials,
    ) -> Result<Arc<dyn Session>, SessionError> {
        self.calls.lock().push((node.to_string(), "connect".to_string()));
        Ok(Arc::new(RecordingSession { node: node.to_string(), calls: self.calls.clone() }))
    }
}

struct RecordingSession {
    node: String,
    calls: CallLog,
}

#[async_trait]
impl Session for RecordingSession {
    async fn exec(&self, command: &str) -> Result<ExecOutput, SessionError> {
        self.calls.lock().push((self.node.clone(), format!("exec {}", command)));
        Ok(ExecOutput { status: 0, stdout: String::new(), stderr: String::new() })
    }

    async fn download(&self, remote: &Path, _local: &Path) -> Result<(), SessionError> {
        self.calls
            .lock()
            .push((self.node.clone(), format!("download {}", remote.display())));
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.calls.lock().push((self.node.clone(), "close".to_string()));
        Ok(())
    }
}

/// One step in a scripted client's life
#[derive(Clone, Debug)]
pub enum Step {
    /// Complete the op as ok
    Ok,
    /// Complete the op as a definite failure
    Fail(String),
    /// Complete the op as indeterminate
    Info(String),
    /// Throw a connection error instead of completing
    Throw(String),
    /// Complete ok but with a different `f`, breaking the contract
    WrongF,
}

/// Factory for clients replaying a shared step script.
///
/// The script is shared across reopens, so a worker that replaces its
/// client after an indeterminate result keeps consuming the same
/// sequence.
pub struct ScriptedFactory {
    steps: Arc<Mutex<VecDeque<Step>>>,
    closable: bool,
    opens: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn new(steps: Vec<Step>) -> Self {
        ScriptedFactory {
            steps: Arc::new(Mutex::new(steps.into())),
            closable: true,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn non_closable(steps: Vec<Step>) -> Self {
        let mut factory = Self::new(steps);
        factory.closable = false;
        factory
    }

    /// Counter of how many clients have been opened
    pub fn opens(&self) -> Arc<AtomicUsize> {
        self.opens.clone()
    }
}

#[async_trait]
impl ClientFactory for ScriptedFactory {
    async fn open(
        &self,
        _test: &TestRun,
        _node: Option<&str>,
    ) -> Result<Box<dyn Client>, ClientError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedClient { steps: self.steps.clone(), closable: self.closable }))
    }
}

struct ScriptedClient {
    steps: Arc<Mutex<VecDeque<Step>>>,
    closable: bool,
}

#[async_trait]
impl Client for ScriptedClient {
    async fn invoke(&mut self, _test: &TestRun, mut op: Op) -> Result<Op, ClientError> {
        let step = self.steps.lock().pop_front().unwrap_or(Step::Ok);
        match step {
            Step::Ok => {
                op.kind = OpKind::Ok;
                Ok(op)
            }
            Step::Fail(reason) => {
                op.kind = OpKind::Fail;
                op.error = Some(reason);
                Ok(op)
            }
            Step::Info(reason) => {
                op.kind = OpKind::Info;
                op.error = Some(reason);
                Ok(op)
            }
            Step::Throw(reason) => Err(ClientError::Connection(reason)),
            Step::WrongF => {
                op.kind = OpKind::Ok;
                op.f = "bogus".to_string();
                Ok(op)
            }
        }
    }

    async fn close(&mut self, _test: &TestRun) {}

    fn closable(&self) -> bool {
        self.closable
    }
}

/// Generator serving a fixed queue to workers (never the nemesis) and
/// recording every process id that asked.
pub struct RecordingGenerator {
    ops: Mutex<VecDeque<Op>>,
    requests: Mutex<Vec<Process>>,
}

impl RecordingGenerator {
    pub fn ops(ops: Vec<Op>) -> Self {
        RecordingGenerator { ops: Mutex::new(ops.into()), requests: Mutex::new(Vec::new()) }
    }

    /// Process ids seen so far, in call order
    pub fn requests(&self) -> Vec<Process> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn next(&self, _test: &TestRun, process: Process) -> Option<Op> {
        if process.is_nemesis() {
            return None;
        }
        self.requests.lock().push(process);
        self.ops.lock().pop_front()
    }
}

/// Nemesis whose every invocation fails
pub struct CrashingNemesis;

#[async_trait]
impl Nemesis for CrashingNemesis {
    async fn setup(&self, _test: &TestRun) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn invoke(&self, _test: &TestRun, _op: Op) -> Result<Op, HarnessError> {
        Err(HarnessError::Nemesis("induced nemesis crash".to_string()))
    }

    async fn teardown(&self, _test: &TestRun) -> Result<(), HarnessError> {
        Ok(())
    }
}

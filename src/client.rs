//! Client contract for the system under test
//!
//! A client factory opens one client per worker, bound to a node. The
//! client turns an invocation into a completion; a thrown error means
//! the connection state is unknown and the worker treats the outcome as
//! indeterminate.

use std::fmt;

use async_trait::async_trait;

use crate::config::TestRun;
use crate::history::{Op, OpKind};

/// Errors from client operations
#[derive(Debug, Clone)]
pub enum ClientError {
    /// Opening or maintaining the connection failed
    Connection(String),
    /// The request timed out
    Timeout,
    /// The system answered with something the client could not handle
    Response(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Connection(msg) => write!(f, "connection error: {}", msg),
            ClientError::Timeout => write!(f, "request timed out"),
            ClientError::Response(msg) => write!(f, "unexpected response: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

/// A single logical client bound to one node.
///
/// Each worker owns its client exclusively; methods take `&mut self`.
#[async_trait]
pub trait Client: Send {
    /// Apply an invocation and return the completion.
    ///
    /// The completion must have `kind` in {ok, fail, info} and preserve
    /// the invocation's `process` and `f`. Returning an error signals a
    /// connection failure: the worker records an indeterminate outcome.
    async fn invoke(&mut self, test: &TestRun, op: Op) -> Result<Op, ClientError>;

    /// Release the client's resources
    async fn close(&mut self, test: &TestRun);

    /// Whether this client can be closed and replaced after an
    /// indeterminate outcome. Clients that answer `false` keep serving
    /// the retired process's successor, a deprecated fallback.
    fn closable(&self) -> bool {
        true
    }
}

/// Opens clients; the `client` collaborator in a test configuration
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Open a client bound to `node` (`None` in zero-node dry runs)
    async fn open(&self, test: &TestRun, node: Option<&str>) -> Result<Box<dyn Client>, ClientError>;
}

/// Client that acknowledges every operation as `ok`
pub struct NoopClient;

#[async_trait]
impl Client for NoopClient {
    async fn invoke(&mut self, _test: &TestRun, mut op: Op) -> Result<Op, ClientError> {
        op.kind = OpKind::Ok;
        Ok(op)
    }

    async fn close(&mut self, _test: &TestRun) {}
}

/// Factory for [`NoopClient`]s; the default client collaborator
pub struct Noop;

#[async_trait]
impl ClientFactory for Noop {
    async fn open(
        &self,
        _test: &TestRun,
        _node: Option<&str>,
    ) -> Result<Box<dyn Client>, ClientError> {
        Ok(Box::new(NoopClient))
    }
}

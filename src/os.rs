//! OS stage: per-node operating-system prerequisites
//!
//! Setup runs on every node in parallel before the body, teardown runs
//! on every node in parallel after it, whatever the body did. Teardown
//! failures are logged and never mask the body's result.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::config::TestRun;
use crate::error::HarnessError;

/// Installs and removes OS-level prerequisites on one node
#[async_trait]
pub trait Os: Send + Sync {
    async fn setup(&self, test: &TestRun, node: &str) -> Result<(), HarnessError>;
    async fn teardown(&self, test: &TestRun, node: &str) -> Result<(), HarnessError>;
}

/// OS that requires nothing
pub struct NoopOs;

#[async_trait]
impl Os for NoopOs {
    async fn setup(&self, _test: &TestRun, _node: &str) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn teardown(&self, _test: &TestRun, _node: &str) -> Result<(), HarnessError> {
        Ok(())
    }
}

/// Run `body` inside the OS stage.
///
/// The body future is lazy; it only runs once setup has succeeded on
/// every node. Teardown runs either way, so nodes that finished setup
/// before a sibling failed are still cleaned up.
pub async fn with_os<T>(
    test: &Arc<TestRun>,
    body: impl Future<Output = Result<T, HarnessError>>,
) -> Result<T, HarnessError> {
    let os = test.config.os.clone();

    debug!("os setup starting");
    let result = match fan_out(test, &*os, Phase::Setup).await {
        Ok(()) => body.await,
        Err(e) => Err(e),
    };

    debug!("os teardown starting");
    if let Err(e) = fan_out(test, &*os, Phase::Teardown).await {
        warn!(error = %e, "os teardown failed");
    }

    result
}

#[derive(Clone, Copy)]
enum Phase {
    Setup,
    Teardown,
}

/// Run one OS phase on every node in parallel; all nodes complete
/// before the first failure propagates.
async fn fan_out(test: &TestRun, os: &dyn Os, phase: Phase) -> Result<(), HarnessError> {
    let results = join_all(test.config.nodes.iter().map(|node| async move {
        match phase {
            Phase::Setup => os.setup(test, node).await,
            Phase::Teardown => os.teardown(test, node).await,
        }
    }))
    .await;

    results.into_iter().find(Result::is_err).unwrap_or(Ok(()))
}

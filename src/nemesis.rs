//! Nemesis: the fault-injection actor and its supervisor
//!
//! The nemesis runs as one extra logical actor alongside the workers,
//! with the reserved `nemesis` process identity. Its events fan out to
//! every history registered as active when the event begins. The actor
//! is best-effort: a failed injection becomes a crash record in the
//! history, never a halt of the case.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::TestRun;
use crate::error::HarnessError;
use crate::history::{Op, OpKind, Process};

/// The fault-injection contract.
///
/// `setup` runs before any worker starts so injected faults are
/// reproducible; `teardown` runs after the workers are done.
#[async_trait]
pub trait Nemesis: Send + Sync {
    async fn setup(&self, test: &TestRun) -> Result<(), HarnessError>;

    /// Apply one fault operation and return its completion. The
    /// completion must keep the nemesis process, the `f` symbol and
    /// the `info` kind.
    async fn invoke(&self, test: &TestRun, op: Op) -> Result<Op, HarnessError>;

    async fn teardown(&self, test: &TestRun) -> Result<(), HarnessError>;
}

/// Nemesis that injects nothing
pub struct NoopNemesis;

#[async_trait]
impl Nemesis for NoopNemesis {
    async fn setup(&self, _test: &TestRun) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn invoke(&self, _test: &TestRun, op: Op) -> Result<Op, HarnessError> {
        Ok(op)
    }

    async fn teardown(&self, _test: &TestRun) -> Result<(), HarnessError> {
        Ok(())
    }
}

/// Run `body` with the nemesis active.
///
/// Setup happens before the body starts; when the body exits (either
/// way) the supervisor loop is awaited and the nemesis torn down.
pub(crate) async fn with_nemesis<T>(
    test: &Arc<TestRun>,
    body: impl Future<Output = Result<T, HarnessError>>,
) -> Result<T, HarnessError> {
    let nemesis = test.config.nemesis.clone();

    if let Err(e) = nemesis.setup(test).await {
        if let Err(td) = nemesis.teardown(test).await {
            warn!(error = %td, "nemesis teardown failed");
        }
        return Err(e);
    }

    let supervisor = tokio::spawn(nemesis_loop(test.clone(), nemesis.clone()));

    let result = body.await;

    if let Err(e) = supervisor.await {
        warn!(error = %e, "nemesis supervisor panicked");
    }
    if let Err(e) = nemesis.teardown(test).await {
        warn!(error = %e, "nemesis teardown failed");
    }

    result
}

/// Pull nemesis ops from the generator until the stream ends, fanning
/// each event into the histories active at its invocation.
async fn nemesis_loop(test: Arc<TestRun>, nemesis: Arc<dyn Nemesis>) {
    loop {
        let Some(template) = test.config.generator.next(&test, Process::Nemesis).await else {
            break;
        };

        let mut op = template;
        op.process = Process::Nemesis;
        op.kind = OpKind::Info;
        op.time = test.relative_nanos();

        // One snapshot per event: invocation and completion go to the
        // same set of histories even if the case boundary moves.
        let active = test.active.snapshot();
        for history in &active {
            history.append(op.clone());
        }

        info!(f = %op.f, "nemesis invoking");
        match nemesis.invoke(&test, op.clone()).await {
            Ok(completion)
                if completion.process == Process::Nemesis
                    && completion.kind == OpKind::Info
                    && completion.f == op.f =>
            {
                let mut completion = completion;
                completion.time = test.relative_nanos();
                for history in &active {
                    history.append(completion.clone());
                }
            }
            Ok(completion) => {
                warn!(f = %op.f, got = ?completion, "nemesis completion broke its contract");
                append_crashed(&active, &op, "completion changed process, f or type", &test);
            }
            Err(e) => {
                warn!(f = %op.f, error = %e, "nemesis invocation crashed");
                append_crashed(&active, &op, &e.to_string(), &test);
            }
        }
    }
}

fn append_crashed(active: &[crate::history::History], op: &Op, cause: &str, test: &TestRun) {
    let mut crashed = op.clone();
    crashed.time = test.relative_nanos();
    crashed.error = Some(format!("crashed: {}", cause));
    for history in active {
        history.append(crashed.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TestConfig;
    use crate::generator::{Limit, Seq};
    use crate::history::History;
    use crate::testing::CrashingNemesis;

    fn nemesis_test(nemesis: Arc<dyn Nemesis>, events: usize) -> Arc<TestRun> {
        let config = TestConfig::default()
            .with_nemesis(nemesis)
            .with_generator(Arc::new(Limit::new(
                events,
                Arc::new(Seq::new(vec![Op::new("partition"); events])),
            )));
        Arc::new(TestRun::new(config))
    }

    #[tokio::test]
    async fn test_noop_nemesis_records_invoke_and_completion() {
        let test = nemesis_test(Arc::new(NoopNemesis), 1);
        let history = History::new("case");
        test.active.add(history.clone());

        with_nemesis(&test, async { Ok(()) }).await.unwrap();

        let ops = history.snapshot();
        assert_eq!(ops.len(), 2);
        for op in &ops {
            assert_eq!(op.process, Process::Nemesis);
            assert_eq!(op.kind, OpKind::Info);
            assert_eq!(op.f, "partition");
        }
    }

    #[tokio::test]
    async fn test_crashing_nemesis_appends_crash_record_and_continues() {
        let test = nemesis_test(Arc::new(CrashingNemesis), 2);
        let history = History::new("case");
        test.active.add(history.clone());

        with_nemesis(&test, async { Ok(()) }).await.unwrap();

        let ops = history.snapshot();
        // Two events, each an invocation plus a crash record
        assert_eq!(ops.len(), 4);
        let crashes: Vec<_> = ops.iter().filter(|op| op.error.is_some()).collect();
        assert_eq!(crashes.len(), 2);
        for crash in crashes {
            assert_eq!(crash.process, Process::Nemesis);
            assert_eq!(crash.kind, OpKind::Info);
            assert!(crash.error.as_ref().unwrap().starts_with("crashed: "));
        }
    }

    #[tokio::test]
    async fn test_nemesis_fans_into_every_active_history() {
        let test = nemesis_test(Arc::new(NoopNemesis), 1);
        let a = History::new("a");
        let b = History::new("b");
        test.active.add(a.clone());
        test.active.add(b.clone());

        with_nemesis(&test, async { Ok(()) }).await.unwrap();

        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
    }

    #[tokio::test]
    async fn test_body_error_propagates_past_supervision() {
        let test = nemesis_test(Arc::new(NoopNemesis), 0);
        let result: Result<(), HarnessError> =
            with_nemesis(&test, async { Err(HarnessError::Nemesis("body failed".to_string())) })
                .await;
        assert!(result.is_err());
    }
}

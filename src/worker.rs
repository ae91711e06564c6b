//! Worker: one logical process driven through the generator
//!
//! A worker owns exactly one process identity at a time. It opens a
//! client against its assigned node, waits for every other worker at
//! the setup barrier, then loops: pull an op, record the invocation,
//! invoke the client, record the completion. Indeterminate outcomes
//! retire the process identity; determinate ones keep it. Errors are
//! captured so the worker still reaches the teardown barrier and
//! closes its client before the failure surfaces.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::barrier::PhaseBarrier;
use crate::client::Client;
use crate::config::TestRun;
use crate::error::HarnessError;
use crate::history::{History, Op, OpKind, Process};

/// Drive one worker for the duration of a case.
pub(crate) async fn run_worker(
    test: Arc<TestRun>,
    history: History,
    barrier: PhaseBarrier,
    worker: u64,
    node: Option<String>,
) -> Result<(), HarnessError> {
    let opened = test.config.client.open(&test, node.as_deref()).await;

    // Every worker reaches the setup barrier, so a failed open cannot
    // strand the others.
    barrier.arrive().await;

    let (mut client, mut failure) = match opened {
        Ok(c) => (Some(c), None),
        Err(e) => (None, Some(HarnessError::Client(e))),
    };

    if failure.is_none() {
        if let Err(e) = op_loop(&test, &history, &mut client, worker, node.as_deref()).await {
            failure = Some(e);
        }
    }

    barrier.arrive().await;

    if let Some(mut c) = client.take() {
        c.close(&test).await;
    }

    match failure {
        None => Ok(()),
        Some(e) => Err(e),
    }
}

async fn op_loop(
    test: &Arc<TestRun>,
    history: &History,
    client: &mut Option<Box<dyn Client>>,
    worker: u64,
    node: Option<&str>,
) -> Result<(), HarnessError> {
    let mut process = worker;

    loop {
        let Some(template) = test.config.generator.next(test, Process::Worker(process)).await
        else {
            return Ok(());
        };

        let mut op = template;
        op.process = Process::Worker(process);
        op.kind = OpKind::Invoke;
        op.time = test.relative_nanos();
        let op = history.append(op);
        debug!(process, f = %op.f, "invoke");

        let outcome = match client.as_mut() {
            Some(c) => c.invoke(test, op.clone()).await,
            None => return Ok(()),
        };

        match outcome {
            Ok(mut completion) => {
                validate_completion(process, &op, &completion)?;
                completion.time = test.relative_nanos();
                let indeterminate = completion.is_indeterminate();
                history.append(completion);
                if indeterminate {
                    process = retire(test, client, process, node).await?;
                }
            }
            Err(e) => {
                // Connection state unknown: record an indeterminate
                // completion and move to a fresh process identity.
                let mut info = op.clone();
                info.kind = OpKind::Info;
                info.time = test.relative_nanos();
                info.error = Some(format!("indeterminate: {}", e));
                history.append(info);
                process = retire(test, client, process, node).await?;
            }
        }
    }
}

/// Retire a process identity after an indeterminate outcome.
///
/// The successor id is `old + concurrency`, which keeps ids globally
/// unique while the live set stays exactly `concurrency` wide. A
/// closable client is replaced; a non-closable one keeps serving the
/// successor, the deprecated fallback.
async fn retire(
    test: &Arc<TestRun>,
    client: &mut Option<Box<dyn Client>>,
    process: u64,
    node: Option<&str>,
) -> Result<u64, HarnessError> {
    let successor = process + test.concurrency as u64;
    debug!(retired = process, successor, "process retired");

    if client.as_ref().is_some_and(|c| c.closable()) {
        if let Some(mut old) = client.take() {
            old.close(test).await;
        }
        let fresh = test
            .config
            .client
            .open(test, node)
            .await
            .map_err(HarnessError::Client)?;
        *client = Some(fresh);
    } else {
        warn!(
            retired = process,
            successor, "client is not closable; it will keep serving the new process id"
        );
    }

    Ok(successor)
}

fn validate_completion(process: u64, invocation: &Op, completion: &Op) -> Result<(), HarnessError> {
    if completion.kind == OpKind::Invoke {
        return Err(HarnessError::Contract(format!(
            "completion of {} came back as an invocation",
            invocation.f
        )));
    }
    if completion.process != invocation.process || completion.f != invocation.f {
        return Err(HarnessError::Contract(format!(
            "completion for process {} changed process or f: {:?} -> {:?}/{}",
            process, invocation.process, completion.process, completion.f
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TestConfig;
    use crate::testing::{RecordingGenerator, ScriptedFactory, Step};

    async fn run_one_worker(config: TestConfig) -> (Result<(), HarnessError>, History) {
        let test = Arc::new(TestRun::new(config));
        let history = History::new("case");
        let barrier = PhaseBarrier::new(1);
        let result = run_worker(test, history.clone(), barrier, 0, None).await;
        (result, history)
    }

    #[tokio::test]
    async fn test_determinate_ops_keep_process_and_client() {
        let generator = Arc::new(RecordingGenerator::ops(vec![Op::new("read"), Op::new("read")]));
        let factory = ScriptedFactory::new(vec![Step::Ok, Step::Ok]);
        let config = TestConfig::default()
            .with_concurrency(1)
            .with_generator(generator.clone())
            .with_client(Arc::new(factory));

        let (result, history) = run_one_worker(config).await;
        result.unwrap();

        let ops = history.snapshot();
        assert_eq!(ops.len(), 4);
        assert!(ops.iter().all(|op| op.process == Process::Worker(0)));
        assert_eq!(
            generator.requests(),
            vec![Process::Worker(0), Process::Worker(0), Process::Worker(0)]
        );
    }

    #[tokio::test]
    async fn test_info_completion_retires_process() {
        let generator = Arc::new(RecordingGenerator::ops(vec![Op::new("write")]));
        let factory = ScriptedFactory::new(vec![Step::Info("timeout".to_string())]);
        let config = TestConfig::default()
            .with_concurrency(1)
            .with_generator(generator.clone())
            .with_client(Arc::new(factory));

        let (result, history) = run_one_worker(config).await;
        result.unwrap();

        let ops = history.snapshot();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].kind, OpKind::Invoke);
        assert_eq!(ops[1].kind, OpKind::Info);
        // Next generator request used the successor id 0 + 1
        assert_eq!(generator.requests(), vec![Process::Worker(0), Process::Worker(1)]);
    }

    #[tokio::test]
    async fn test_client_error_synthesizes_indeterminate_completion() {
        let generator = Arc::new(RecordingGenerator::ops(vec![Op::new("write")]));
        let factory = ScriptedFactory::new(vec![Step::Throw("connection lost".to_string())]);
        let config = TestConfig::default()
            .with_concurrency(3)
            .with_generator(generator.clone())
            .with_client(Arc::new(factory));

        let (result, history) = run_one_worker(config).await;
        result.unwrap();

        let ops = history.snapshot();
        assert_eq!(ops.len(), 2);
        let completion = &ops[1];
        assert_eq!(completion.kind, OpKind::Info);
        assert!(completion
            .error
            .as_ref()
            .unwrap()
            .starts_with("indeterminate: "));
        // Rotation by + concurrency
        assert_eq!(generator.requests(), vec![Process::Worker(0), Process::Worker(3)]);
    }

    #[tokio::test]
    async fn test_completion_changing_f_is_a_contract_violation() {
        let generator = Arc::new(RecordingGenerator::ops(vec![Op::new("read")]));
        let factory = ScriptedFactory::new(vec![Step::WrongF]);
        let config = TestConfig::default()
            .with_concurrency(1)
            .with_generator(generator)
            .with_client(Arc::new(factory));

        let (result, history) = run_one_worker(config).await;
        assert!(matches!(result, Err(HarnessError::Contract(_))));
        // The invocation is still on record
        assert_eq!(history.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_non_closable_client_is_reused_after_retirement() {
        let generator =
            Arc::new(RecordingGenerator::ops(vec![Op::new("write"), Op::new("read")]));
        let factory = ScriptedFactory::non_closable(vec![
            Step::Info("maybe".to_string()),
            Step::Ok,
        ]);
        let opens = factory.opens();
        let config = TestConfig::default()
            .with_concurrency(1)
            .with_generator(generator.clone())
            .with_client(Arc::new(factory));

        let (result, history) = run_one_worker(config).await;
        result.unwrap();

        assert_eq!(history.len(), 4);
        // One open only: the deprecated path kept the original client
        assert_eq!(opens.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(
            generator.requests(),
            vec![Process::Worker(0), Process::Worker(1), Process::Worker(1)]
        );
        // The second op ran under the successor id
        let ops = history.snapshot();
        assert_eq!(ops[2].process, Process::Worker(1));
        assert_eq!(ops[3].process, Process::Worker(1));
    }
}

//! Test runner
//!
//! Orchestrates one end-to-end run: open the session pool, bring up the
//! OS and DB stages, run the case (nemesis alongside the workers),
//! collect logs, index the history, hand it to the checker and persist
//! the snapshots. Every resource acquired on the way in is released on
//! the way out, whatever the body did.

use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};

use crate::barrier::PhaseBarrier;
use crate::checker::check_safely;
use crate::config::{TestConfig, TestRun};
use crate::db::{snarf_logs, with_db};
use crate::error::HarnessError;
use crate::history::{assign_indices, History, Op};
use crate::nemesis::with_nemesis;
use crate::os::with_os;
use crate::session::{close_all, connect_all};
use crate::store::{Store, TestReport};
use crate::trace;
use crate::worker::run_worker;

/// Run one case: a fresh history, the nemesis, and `concurrency`
/// workers racing through the generator. Returns the closed history.
pub async fn run_case(test: &Arc<TestRun>) -> Result<Vec<Op>, HarnessError> {
    let history = History::new(test.config.name.clone().unwrap_or_else(|| "history".to_string()));
    test.active.add(history.clone());

    let result = with_nemesis(test, async {
        let barrier = PhaseBarrier::new(test.concurrency);

        let mut handles = Vec::new();
        for worker in 0..test.concurrency as u64 {
            let node = test.node_for(worker as usize).map(str::to_string);
            handles.push(tokio::spawn(run_worker(
                test.clone(),
                history.clone(),
                barrier.clone(),
                worker,
                node,
            )));
        }

        // Every worker completes before the first failure propagates.
        let mut first_error = None;
        for (worker, handle) in handles.into_iter().enumerate() {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join) => Err(HarnessError::Worker {
                    process: worker as u64,
                    message: format!("worker task died: {}", join),
                }),
            };
            if let Err(e) = outcome {
                warn!(worker, error = %e, "worker failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    })
    .await;

    if result.is_ok() {
        if let Err(e) = snarf_logs(test).await {
            warn!(error = %e, "log snarf failed");
        }
    }

    test.active.remove(history.name());
    let ops = history.drain();
    result.map(|_| ops)
}

/// Run a complete test and return its final report.
///
/// Setup failures and worker failures surface as `Err` — the checker
/// is never consulted for a run that did not complete. A checker
/// failure, by contrast, is a test outcome: the report comes back with
/// `results.valid == false`.
pub async fn run(config: TestConfig) -> Result<TestReport, HarnessError> {
    trace::init();

    let started_at = Local::now();
    let store = match &config.name {
        Some(name) => Some(
            Store::create(&config.store_root, name, started_at)
                .map_err(|e| HarnessError::Store(e.to_string()))?,
        ),
        None => None,
    };
    // Guard: the run log detaches and flushes on every exit path.
    let _run_log = match &store {
        Some(store) => Some(
            trace::attach_run_log(&store.log_path())
                .map_err(|e| HarnessError::Store(e.to_string()))?,
        ),
        None => None,
    };

    info!(name = ?config.name, nodes = config.nodes.len(), "test starting");

    let transport = config.transport.clone();
    let nodes = config.nodes.clone();
    let remote = config.remote.clone();
    let sessions = connect_all(&*transport, &nodes, &remote).await?;

    let mut test = TestRun::new(config);
    test.started_at = started_at;
    test.sessions = sessions;
    test.store = store;
    let test = Arc::new(test);

    let case_result = with_os(
        &test,
        with_db(&test, async {
            test.config.generator.init(&test.threads());
            run_case(&test).await
        }),
    )
    .await;

    close_all(&test.sessions).await;

    let history = case_result?;

    let mut report = TestReport {
        name: test.config.name.clone(),
        started_at: test.started_at,
        nodes: test.config.nodes.clone(),
        concurrency: test.concurrency,
        history,
        results: None,
        duration_ms: None,
    };

    // Phase 1: the raw history, before analysis.
    if let Some(store) = &test.store {
        if let Err(e) = store.save(&report) {
            warn!(error = %e, "phase-1 snapshot failed");
        }
    }

    assign_indices(&mut report.history);
    let results = check_safely(
        &*test.config.checker,
        &report,
        &*test.config.model,
        &report.history,
    );

    if results.valid {
        info!(ops = report.history.len(), "analysis complete: history is valid");
    } else {
        warn!(error = ?results.error, "analysis complete: history is INVALID");
    }

    report.results = Some(results);
    report.duration_ms = Some(test.start.elapsed().as_millis() as u64);

    // Phase 2: the full record, results included.
    if let Some(store) = &test.store {
        if let Err(e) = store.save(&report) {
            warn!(error = %e, "phase-2 snapshot failed");
        }
    }

    Ok(report)
}

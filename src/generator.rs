//! Operation generators
//!
//! A generator is a concurrent-safe source of operation templates keyed
//! by `(test, process)`. Returning `None` ends the stream for that
//! process. The combinators here cover the common workload shapes;
//! anything fancier implements the trait directly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use crate::config::TestRun;
use crate::history::{Op, Process};

/// A coroutine-like source of operations.
///
/// `next` is called concurrently from every worker and the nemesis, so
/// implementations must be safe under shared access.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Called once before workers start with the full set of process
    /// identities this run will use: the nemesis plus workers
    /// `0..concurrency`.
    fn init(&self, _threads: &[Process]) {}

    /// Produce the next operation template for `process`, or `None` to
    /// end that process's stream.
    async fn next(&self, test: &TestRun, process: Process) -> Option<Op>;
}

/// The empty stream
pub struct Nothing;

#[async_trait]
impl Generator for Nothing {
    async fn next(&self, _test: &TestRun, _process: Process) -> Option<Op> {
        None
    }
}

/// Hands out a fixed list of operations in order, shared across all
/// processes, then ends every stream.
pub struct Seq {
    ops: Vec<Op>,
    cursor: AtomicUsize,
}

impl Seq {
    pub fn new(ops: Vec<Op>) -> Self {
        Seq { ops, cursor: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl Generator for Seq {
    async fn next(&self, _test: &TestRun, _process: Process) -> Option<Op> {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.ops.get(idx).cloned()
    }
}

/// Caps an inner generator at a total number of operations across all
/// processes.
pub struct Limit {
    remaining: AtomicUsize,
    inner: Arc<dyn Generator>,
}

impl Limit {
    pub fn new(n: usize, inner: Arc<dyn Generator>) -> Self {
        Limit { remaining: AtomicUsize::new(n), inner }
    }
}

#[async_trait]
impl Generator for Limit {
    fn init(&self, threads: &[Process]) {
        self.inner.init(threads);
    }

    async fn next(&self, test: &TestRun, process: Process) -> Option<Op> {
        let claimed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match claimed {
            Ok(_) => self.inner.next(test, process).await,
            Err(_) => None,
        }
    }
}

/// Picks uniformly at random among inner generators for each call
pub struct Mix {
    gens: Vec<Arc<dyn Generator>>,
}

impl Mix {
    pub fn new(gens: Vec<Arc<dyn Generator>>) -> Self {
        assert!(!gens.is_empty(), "Mix needs at least one generator");
        Mix { gens }
    }
}

#[async_trait]
impl Generator for Mix {
    fn init(&self, threads: &[Process]) {
        for g in &self.gens {
            g.init(threads);
        }
    }

    async fn next(&self, test: &TestRun, process: Process) -> Option<Op> {
        let idx = rand::rng().random_range(0..self.gens.len());
        self.gens[idx].next(test, process).await
    }
}

/// Routes worker processes to one generator and the nemesis to another
pub struct Split {
    clients: Arc<dyn Generator>,
    nemesis: Arc<dyn Generator>,
}

impl Split {
    pub fn new(clients: Arc<dyn Generator>, nemesis: Arc<dyn Generator>) -> Self {
        Split { clients, nemesis }
    }
}

#[async_trait]
impl Generator for Split {
    fn init(&self, threads: &[Process]) {
        self.clients.init(threads);
        self.nemesis.init(threads);
    }

    async fn next(&self, test: &TestRun, process: Process) -> Option<Op> {
        match process {
            Process::Nemesis => self.nemesis.next(test, process).await,
            Process::Worker(_) => self.clients.next(test, process).await,
        }
    }
}

//! Test configuration and runtime state
//!
//! `TestConfig` is the immutable input: nodes, credentials and the
//! pluggable collaborators. `TestRun` is the configuration plus the
//! state built while a run executes — sessions, barriers, the active
//! history set and the monotonic clock origin. Only plain data is ever
//! persisted; the runtime state stays in memory.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};

use crate::barrier::PhaseBarrier;
use crate::checker::{Checker, Model, NoModel, Valid};
use crate::client::{ClientFactory, Noop};
use crate::db::{Db, NoopDb};
use crate::generator::{Generator, Nothing};
use crate::history::{ActiveHistories, Process};
use crate::nemesis::{Nemesis, NoopNemesis};
use crate::os::{NoopOs, Os};
use crate::session::{NullTransport, Session, SessionFactory, SessionMap};
use crate::store::Store;

/// Credentials for the remote-shell transport
#[derive(Debug, Clone)]
pub struct RemoteCredentials {
    pub username: String,
    pub port: u16,
    pub password: Option<String>,
    pub private_key_path: Option<PathBuf>,
}

impl Default for RemoteCredentials {
    fn default() -> Self {
        RemoteCredentials {
            username: "root".to_string(),
            port: 22,
            password: None,
            private_key_path: None,
        }
    }
}

/// Immutable description of one test: the cluster, the credentials and
/// the pluggable collaborators.
///
/// `Default` wires the shipped no-op collaborators, so a configuration
/// with no nodes runs end to end as a dry run.
#[derive(Clone)]
pub struct TestConfig {
    /// Name used for the on-disk store; unnamed runs persist nothing
    pub name: Option<String>,
    /// Ordered node identifiers
    pub nodes: Vec<String>,
    /// Desired worker count; defaults to the node count
    pub concurrency: Option<usize>,
    /// Remote-shell credentials
    pub remote: RemoteCredentials,
    pub os: Arc<dyn Os>,
    pub db: Arc<dyn Db>,
    pub client: Arc<dyn ClientFactory>,
    pub nemesis: Arc<dyn Nemesis>,
    pub generator: Arc<dyn Generator>,
    pub model: Arc<dyn Model>,
    pub checker: Arc<dyn Checker>,
    pub transport: Arc<dyn SessionFactory>,
    /// Root directory for per-run stores
    pub store_root: PathBuf,
}

impl Default for TestConfig {
    fn default() -> Self {
        TestConfig {
            name: None,
            nodes: Vec::new(),
            concurrency: None,
            remote: RemoteCredentials::default(),
            os: Arc::new(NoopOs),
            db: Arc::new(NoopDb),
            client: Arc::new(Noop),
            nemesis: Arc::new(NoopNemesis),
            generator: Arc::new(Nothing),
            model: Arc::new(NoModel),
            checker: Arc::new(Valid),
            transport: Arc::new(NullTransport),
            store_root: PathBuf::from("store"),
        }
    }
}

impl TestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_remote(mut self, remote: RemoteCredentials) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_os(mut self, os: Arc<dyn Os>) -> Self {
        self.os = os;
        self
    }

    pub fn with_db(mut self, db: Arc<dyn Db>) -> Self {
        self.db = db;
        self
    }

    pub fn with_client(mut self, client: Arc<dyn ClientFactory>) -> Self {
        self.client = client;
        self
    }

    pub fn with_nemesis(mut self, nemesis: Arc<dyn Nemesis>) -> Self {
        self.nemesis = nemesis;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_model(mut self, model: Arc<dyn Model>) -> Self {
        self.model = model;
        self
    }

    pub fn with_checker(mut self, checker: Arc<dyn Checker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn SessionFactory>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_store_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.store_root = root.into();
        self
    }

    /// Worker count after applying the default
    pub fn resolved_concurrency(&self) -> usize {
        self.concurrency.unwrap_or(self.nodes.len())
    }
}

impl fmt::Debug for TestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestConfig")
            .field("name", &self.name)
            .field("nodes", &self.nodes)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

/// The configuration plus everything built during a run
pub struct TestRun {
    pub config: TestConfig,
    /// Resolved worker count
    pub concurrency: usize,
    /// Monotonic origin for operation timestamps
    pub start: Instant,
    /// Wall-clock start, used for the store directory name
    pub started_at: DateTime<Local>,
    /// One shell session per node, read-only after the pool opens
    pub sessions: SessionMap,
    /// Node-count rendezvous (the no-op sentinel with no nodes)
    pub node_barrier: PhaseBarrier,
    /// Histories currently receiving nemesis events
    pub active: ActiveHistories,
    /// On-disk store for named runs
    pub store: Option<Store>,
}

impl TestRun {
    /// Build runtime state for a config. Sessions and store are filled
    /// in by the runner; a bare `TestRun` is sufficient for dry runs
    /// and unit tests.
    pub fn new(config: TestConfig) -> Self {
        let concurrency = config.resolved_concurrency();
        let node_barrier = PhaseBarrier::new(config.nodes.len());
        TestRun {
            config,
            concurrency,
            start: Instant::now(),
            started_at: Local::now(),
            sessions: SessionMap::new(),
            node_barrier,
            active: ActiveHistories::new(),
            store: None,
        }
    }

    /// Monotonic nanoseconds since run start
    pub fn relative_nanos(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    /// Session for a node, if the pool opened one
    pub fn session(&self, node: &str) -> Option<&Arc<dyn Session>> {
        self.sessions.get(node)
    }

    /// Node assigned to a worker by round-robin; `None` with no nodes
    pub fn node_for(&self, worker: usize) -> Option<&str> {
        if self.config.nodes.is_empty() {
            None
        } else {
            Some(&self.config.nodes[worker % self.config.nodes.len()])
        }
    }

    /// Every process identity this run will use: the nemesis plus the
    /// initial worker ids.
    pub fn threads(&self) -> Vec<Process> {
        let mut threads = vec![Process::Nemesis];
        threads.extend((0..self.concurrency as u64).map(Process::Worker));
        threads
    }
}

impl fmt::Debug for TestRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestRun")
            .field("config", &self.config)
            .field("concurrency", &self.concurrency)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_defaults_to_node_count() {
        let config = TestConfig::default()
            .with_nodes(vec!["n1".to_string(), "n2".to_string(), "n3".to_string()]);
        assert_eq!(config.resolved_concurrency(), 3);
    }

    #[test]
    fn test_explicit_concurrency_wins() {
        let config = TestConfig::default()
            .with_nodes(vec!["n1".to_string()])
            .with_concurrency(5);
        assert_eq!(config.resolved_concurrency(), 5);
    }

    #[test]
    fn test_zero_concurrency_is_permitted() {
        let config = TestConfig::default().with_concurrency(0);
        assert_eq!(config.resolved_concurrency(), 0);
    }

    #[test]
    fn test_round_robin_node_assignment() {
        let test = TestRun::new(
            TestConfig::default()
                .with_nodes(vec!["n1".to_string(), "n2".to_string()])
                .with_concurrency(5),
        );
        assert_eq!(test.node_for(0), Some("n1"));
        assert_eq!(test.node_for(1), Some("n2"));
        assert_eq!(test.node_for(2), Some("n1"));
        assert_eq!(test.node_for(4), Some("n1"));
    }

    #[test]
    fn test_no_nodes_means_no_assignment() {
        let test = TestRun::new(TestConfig::default().with_concurrency(3));
        assert_eq!(test.node_for(0), None);
        assert!(test.node_barrier.is_noop());
    }

    #[test]
    fn test_threads_cover_nemesis_and_workers() {
        let test = TestRun::new(TestConfig::default().with_concurrency(2));
        assert_eq!(
            test.threads(),
            vec![Process::Nemesis, Process::Worker(0), Process::Worker(1)]
        );
    }
}

//! On-disk store for named runs
//!
//! A named run gets `<root>/<name>/<timestamp>/` holding two `test.json`
//! snapshots (one right after the run, one after analysis), the run
//! log, and a subdirectory of snarfed log files per node.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::checker::CheckResult;
use crate::error::HarnessError;
use crate::history::Op;

/// Serializable snapshot of a test: the configuration's plain data
/// plus the history and, after analysis, the results. Runtime state
/// (sessions, barriers, collaborators) never appears here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub name: Option<String>,
    pub started_at: DateTime<Local>,
    pub nodes: Vec<String>,
    pub concurrency: usize,
    pub history: Vec<Op>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<CheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TestReport {
    /// An empty report, mostly useful to tests and checkers
    pub fn empty() -> Self {
        TestReport {
            name: None,
            started_at: Local::now(),
            nodes: Vec::new(),
            concurrency: 0,
            history: Vec::new(),
            results: None,
            duration_ms: None,
        }
    }
}

/// Handle on one run's store directory
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// Create `<root>/<name>/<timestamp>/`
    pub fn create(root: &Path, name: &str, at: DateTime<Local>) -> io::Result<Store> {
        let dir = root.join(name).join(at.format("%Y%m%dT%H%M%S%.3f").to_string());
        fs::create_dir_all(&dir)?;
        Ok(Store { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the run log file
    pub fn log_path(&self) -> PathBuf {
        self.dir.join("run.log")
    }

    /// Directory for one node's snarfed logs, created on demand
    pub fn node_dir(&self, node: &str) -> io::Result<PathBuf> {
        let dir = self.dir.join(node);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Write (or rewrite) the `test.json` snapshot
    pub fn save(&self, report: &TestReport) -> Result<PathBuf, HarnessError> {
        let path = self.dir.join("test.json");
        let json = serde_json::to_vec_pretty(report)?;
        fs::write(&path, json).map_err(|e| HarnessError::Store(e.to_string()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_builds_timestamped_dir() {
        let root = tempfile::tempdir().unwrap();
        let store = Store::create(root.path(), "etcd-register", Local::now()).unwrap();
        assert!(store.dir().starts_with(root.path().join("etcd-register")));
        assert!(store.dir().is_dir());
    }

    #[test]
    fn test_save_roundtrips_report() {
        let root = tempfile::tempdir().unwrap();
        let store = Store::create(root.path(), "t", Local::now()).unwrap();

        let mut report = TestReport::empty();
        report.name = Some("t".to_string());
        report.history.push(Op::new("read"));

        let path = store.save(&report).unwrap();
        let raw = fs::read_to_string(path).unwrap();
        let back: TestReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.name.as_deref(), Some("t"));
        assert_eq!(back.history.len(), 1);
        assert!(back.results.is_none());
    }

    #[test]
    fn test_node_dir_is_created_once() {
        let root = tempfile::tempdir().unwrap();
        let store = Store::create(root.path(), "t", Local::now()).unwrap();
        let a = store.node_dir("n1").unwrap();
        let b = store.node_dir("n1").unwrap();
        assert_eq!(a, b);
        assert!(a.is_dir());
    }
}

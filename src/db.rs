//! DB stage: database lifecycle and log collection
//!
//! The stage cycles the database (teardown then setup) on every node in
//! parallel, runs an optional primary-only setup against the first
//! node, and guarantees teardown after the body. When the body fails,
//! log files are snarfed first so the forensic evidence survives the
//! teardown.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::TestRun;
use crate::error::HarnessError;

/// Sets up and tears down the database on one node
#[async_trait]
pub trait Db: Send + Sync {
    async fn setup(&self, test: &TestRun, node: &str) -> Result<(), HarnessError>;
    async fn teardown(&self, test: &TestRun, node: &str) -> Result<(), HarnessError>;

    /// Teardown then setup, for a clean slate before each run
    async fn cycle(&self, test: &TestRun, node: &str) -> Result<(), HarnessError> {
        self.teardown(test, node).await?;
        self.setup(test, node).await
    }

    /// Databases with a distinguished primary advertise it here
    fn primary(&self) -> Option<&dyn Primary> {
        None
    }

    /// Databases that keep log files advertise them here
    fn log_files(&self) -> Option<&dyn LogFiles> {
        None
    }
}

/// Optional capability: a primary-only setup step
#[async_trait]
pub trait Primary: Send + Sync {
    async fn setup_primary(&self, test: &TestRun, node: &str) -> Result<(), HarnessError>;
}

/// Optional capability: per-node log file paths worth preserving
#[async_trait]
pub trait LogFiles: Send + Sync {
    async fn log_files(&self, test: &TestRun, node: &str) -> Result<Vec<String>, HarnessError>;
}

/// Database that installs nothing
pub struct NoopDb;

#[async_trait]
impl Db for NoopDb {
    async fn setup(&self, _test: &TestRun, _node: &str) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn teardown(&self, _test: &TestRun, _node: &str) -> Result<(), HarnessError> {
        Ok(())
    }
}

/// Run `body` inside the DB stage.
///
/// Cycle and primary setup happen first; if they or the body fail, an
/// emergency log snarf runs before teardown and the original error
/// propagates unchanged. Teardown always runs; its failures are logged
/// and swallowed.
pub async fn with_db<T>(
    test: &Arc<TestRun>,
    body: impl Future<Output = Result<T, HarnessError>>,
) -> Result<T, HarnessError> {
    let db = test.config.db.clone();

    debug!("db cycle starting");
    let setup = async {
        let results = join_all(
            test.config.nodes.iter().map(|node| db.cycle(test, node)),
        )
        .await;
        results.into_iter().find(Result::is_err).unwrap_or(Ok(()))?;

        if let Some(primary) = db.primary() {
            if let Some(first) = test.config.nodes.first() {
                debug!(node = %first, "primary setup");
                primary.setup_primary(test, first).await?;
            }
        }
        Ok(())
    }
    .await;

    let result = match setup {
        Ok(()) => body.await,
        Err(e) => Err(e),
    };

    if result.is_err() {
        info!("emergency log snarf");
        if let Err(e) = snarf_logs(test).await {
            warn!(error = %e, "emergency log snarf failed");
        }
    }

    debug!("db teardown starting");
    let teardowns = join_all(
        test.config.nodes.iter().map(|node| db.teardown(test, node)),
    )
    .await;
    if let Some(Err(e)) = teardowns.into_iter().find(Result::is_err) {
        warn!(error = %e, "db teardown failed");
    }

    result
}

/// Download every advertised log file into the test's store.
///
/// Persisted paths are the shortest unique suffixes of the remote
/// paths, under a per-node subdirectory. Benign races (pipe closed
/// mid-copy, file rotated away) are logged and skipped; any other
/// error aborts the snarf.
pub async fn snarf_logs(test: &TestRun) -> Result<(), HarnessError> {
    let Some(log_files) = test.config.db.log_files() else {
        return Ok(());
    };
    let Some(store) = &test.store else {
        debug!("no store for this run, skipping log snarf");
        return Ok(());
    };

    // Collect the advertised paths from every node first; the suffix
    // mapping is computed over the union so persisted names agree
    // across nodes.
    let mut per_node: Vec<(String, Vec<String>)> = Vec::new();
    for node in &test.config.nodes {
        let paths = log_files.log_files(test, node).await?;
        per_node.push((node.clone(), paths));
    }

    let all_paths: Vec<&str> = per_node
        .iter()
        .flat_map(|(_, paths)| paths.iter().map(String::as_str))
        .collect();
    let suffixes = shortest_unique_suffixes(&all_paths);

    for (node, paths) in &per_node {
        let Some(session) = test.session(node) else {
            continue;
        };
        let node_dir = store.node_dir(node).map_err(|e| HarnessError::Snarf(e.to_string()))?;
        for path in paths {
            let suffix = &suffixes[path.as_str()];
            let local = node_dir.join(suffix);
            debug!(node = %node, path = %path, "downloading log");
            match session.download(Path::new(path), &local).await {
                Ok(()) => {}
                Err(e) if e.is_benign() => {
                    warn!(node = %node, path = %path, error = %e, "skipping log file");
                }
                Err(e) => return Err(HarnessError::Snarf(e.to_string())),
            }
        }
    }
    Ok(())
}

/// Map each path to its suffix after stripping the longest directory
/// prefix common to all of them. Stripping a shared prefix keeps the
/// remainders distinct, so the flattened layout cannot collide.
fn shortest_unique_suffixes<'a>(paths: &[&'a str]) -> HashMap<&'a str, String> {
    let split: Vec<Vec<&str>> = paths
        .iter()
        .map(|p| p.split('/').filter(|c| !c.is_empty()).collect())
        .collect();

    // Longest common prefix of the directory components (the file name
    // itself never counts toward the prefix).
    let mut prefix_len = split.iter().map(|c| c.len().saturating_sub(1)).min().unwrap_or(0);
    if let Some(first) = split.first() {
        for components in &split[1..] {
            let mut common = 0;
            while common < prefix_len && components[common] == first[common] {
                common += 1;
            }
            prefix_len = prefix_len.min(common);
        }
    }

    paths
        .iter()
        .zip(&split)
        .map(|(path, components)| (*path, components[prefix_len..].join("/")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_path_keeps_file_name() {
        let suffixes = shortest_unique_suffixes(&["/var/log/db/server.log"]);
        assert_eq!(suffixes["/var/log/db/server.log"], "server.log");
    }

    #[test]
    fn test_common_prefix_is_stripped() {
        let suffixes =
            shortest_unique_suffixes(&["/var/log/db/a.log", "/var/log/db/sub/b.log"]);
        assert_eq!(suffixes["/var/log/db/a.log"], "a.log");
        assert_eq!(suffixes["/var/log/db/sub/b.log"], "sub/b.log");
    }

    #[test]
    fn test_disjoint_paths_keep_full_suffix() {
        let suffixes = shortest_unique_suffixes(&["/opt/db/x.log", "/var/db/x.log"]);
        assert_eq!(suffixes["/opt/db/x.log"], "opt/db/x.log");
        assert_eq!(suffixes["/var/db/x.log"], "var/db/x.log");
    }

    #[test]
    fn test_empty_input() {
        assert!(shortest_unique_suffixes(&[]).is_empty());
    }
}

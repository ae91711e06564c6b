//! Logging setup
//!
//! One process-global subscriber: a compact stdout layer plus a file
//! layer whose writer tees into the run log of whichever run is
//! currently attached. Attaching returns a guard; dropping it detaches
//! and flushes the file, so the log is complete on every exit path.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, Once};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

static INIT: Once = Once::new();
static RUN_LOG: Mutex<Option<File>> = Mutex::new(None);

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Safe to call repeatedly; later calls
/// (and an already-installed subscriber, e.g. in tests) are no-ops.
pub fn init() {
    INIT.call_once(|| {
        let stdout_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_filter(build_env_filter());
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(RunLogWriter)
            .with_ansi(false)
            .with_filter(build_env_filter());

        let _ = tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .try_init();
    });
}

/// Writer that forwards to the currently-attached run log, if any
#[derive(Clone)]
struct RunLogWriter;

impl io::Write for RunLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut slot = RUN_LOG.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut slot = RUN_LOG.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for RunLogWriter {
    type Writer = RunLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RunLogWriter
    }
}

/// Detaches and flushes the run log when dropped
pub struct RunLogGuard {
    _private: (),
}

impl Drop for RunLogGuard {
    fn drop(&mut self) {
        let mut slot = RUN_LOG.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut file) = slot.take() {
            let _ = file.flush();
        }
    }
}

/// Start mirroring log output into `path` until the guard drops
pub fn attach_run_log(path: &Path) -> io::Result<RunLogGuard> {
    let file = File::create(path)?;
    let mut slot = RUN_LOG.lock().unwrap_or_else(|e| e.into_inner());
    *slot = Some(file);
    Ok(RunLogGuard { _private: () })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_routes_to_attached_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");

        let guard = attach_run_log(&path).unwrap();
        RunLogWriter.make_writer().write_all(b"worker 0 invoke\n").unwrap();
        drop(guard);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("worker 0 invoke"));
    }

    #[test]
    fn test_detached_writer_discards() {
        // No attach: writes succeed and go nowhere
        RunLogWriter.make_writer().write_all(b"dropped\n").unwrap();
    }
}

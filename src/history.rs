//! History types for recording concurrent operations
//!
//! An operation is one invocation or completion by a logical process; a
//! history is the totally-ordered append-only log of them produced by a
//! test case. Histories have many concurrent writers (every worker plus
//! the nemesis), so appends go through a shared handle.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// A logical process identity, distinct from any OS thread.
///
/// Worker ids start at `0..concurrency` and rotate by `+ concurrency`
/// when an operation ends indeterminate. The nemesis has its own
/// reserved identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Process {
    /// A single-threaded logical client
    Worker(u64),
    /// The fault-injection actor
    Nemesis,
}

impl Process {
    /// Whether this is the nemesis identity
    pub fn is_nemesis(&self) -> bool {
        matches!(self, Process::Nemesis)
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Process::Worker(id) => write!(f, "{}", id),
            Process::Nemesis => write!(f, "nemesis"),
        }
    }
}

// Serialized as a bare integer for workers and the string "nemesis" for
// the fault actor, so persisted histories stay compatible with external
// analyzers.
impl Serialize for Process {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Process::Worker(id) => serializer.serialize_u64(*id),
            Process::Nemesis => serializer.serialize_str("nemesis"),
        }
    }
}

impl<'de> Deserialize<'de> for Process {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ProcessVisitor;

        impl Visitor<'_> for ProcessVisitor {
            type Value = Process;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a worker id or \"nemesis\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Process, E> {
                Ok(Process::Worker(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Process, E> {
                if v == "nemesis" {
                    Ok(Process::Nemesis)
                } else {
                    Err(E::custom(format!("unknown process: {}", v)))
                }
            }
        }

        deserializer.deserialize_any(ProcessVisitor)
    }
}

/// Kind of an operation record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// A process began an operation
    Invoke,
    /// The operation definitely succeeded
    Ok,
    /// The operation definitely did not take place
    Fail,
    /// Indeterminate: the effect was neither confirmed nor denied
    Info,
}

/// One entry in a history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Op {
    /// Logical process that performed the operation
    pub process: Process,
    /// Record kind (invocation or completion)
    #[serde(rename = "type")]
    pub kind: OpKind,
    /// Function symbol, e.g. "read" or "write"
    pub f: String,
    /// Optional argument or return value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Monotonic nanoseconds since run start
    pub time: u64,
    /// Error description for fail/info records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Position in the final history, assigned after the case ends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
}

impl Op {
    /// Create an operation template with just a function symbol.
    ///
    /// Generators yield templates; the worker or nemesis stamps
    /// `process`, `kind` and `time` before recording.
    pub fn new(f: impl Into<String>) -> Self {
        Op {
            process: Process::Worker(0),
            kind: OpKind::Invoke,
            f: f.into(),
            value: None,
            time: 0,
            error: None,
            index: None,
        }
    }

    /// Attach a value to the template
    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Whether this record is an invocation
    pub fn is_invoke(&self) -> bool {
        self.kind == OpKind::Invoke
    }

    /// Whether this record is a completion (ok, fail or info)
    pub fn is_completion(&self) -> bool {
        !self.is_invoke()
    }

    /// Whether this completion left the outcome indeterminate
    pub fn is_indeterminate(&self) -> bool {
        self.kind == OpKind::Info
    }
}

/// A shared, named, append-only history.
///
/// Cloning yields another handle to the same log. Appends are atomic;
/// the order of entries is the real-time order of appends.
#[derive(Clone)]
pub struct History {
    inner: Arc<HistoryInner>,
}

struct HistoryInner {
    name: String,
    ops: Mutex<Vec<Op>>,
}

impl History {
    /// Create a new empty history
    pub fn new(name: impl Into<String>) -> Self {
        History {
            inner: Arc::new(HistoryInner {
                name: name.into(),
                ops: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Name of this history
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Append an operation, returning it unchanged
    pub fn append(&self, op: Op) -> Op {
        self.inner.ops.lock().push(op.clone());
        op
    }

    /// Number of recorded operations
    pub fn len(&self) -> usize {
        self.inner.ops.lock().len()
    }

    /// Whether no operations have been recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Vec<Op> {
        self.inner.ops.lock().clone()
    }

    /// Drain the history, closing it for this case
    pub fn drain(&self) -> Vec<Op> {
        std::mem::take(&mut *self.inner.ops.lock())
    }
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .finish()
    }
}

/// Assign each entry a strictly increasing index in existing order
pub fn assign_indices(ops: &mut [Op]) {
    for (i, op) in ops.iter_mut().enumerate() {
        op.index = Some(i as u64);
    }
}

/// The set of histories currently accepting nemesis writes.
///
/// Membership changes only at case boundaries. The nemesis reads one
/// snapshot per event and fans the invocation and completion into that
/// same set, so a membership change never splits an event.
#[derive(Clone, Default)]
pub struct ActiveHistories {
    inner: Arc<Mutex<Vec<History>>>,
}

impl ActiveHistories {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a history for nemesis writes
    pub fn add(&self, history: History) {
        self.inner.lock().push(history);
    }

    /// Unregister the history with the given name
    pub fn remove(&self, name: &str) {
        self.inner.lock().retain(|h| h.name() != name);
    }

    /// Snapshot of the currently-active histories
    pub fn snapshot(&self) -> Vec<History> {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_process_display() {
        assert_eq!(Process::Worker(3).to_string(), "3");
        assert_eq!(Process::Nemesis.to_string(), "nemesis");
    }

    #[test]
    fn test_process_serde_roundtrip() {
        let worker = serde_json::to_string(&Process::Worker(7)).unwrap();
        assert_eq!(worker, "7");
        let nemesis = serde_json::to_string(&Process::Nemesis).unwrap();
        assert_eq!(nemesis, "\"nemesis\"");

        let back: Process = serde_json::from_str("7").unwrap();
        assert_eq!(back, Process::Worker(7));
        let back: Process = serde_json::from_str("\"nemesis\"").unwrap();
        assert_eq!(back, Process::Nemesis);
    }

    #[test]
    fn test_op_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&OpKind::Invoke).unwrap(), "\"invoke\"");
        assert_eq!(serde_json::to_string(&OpKind::Info).unwrap(), "\"info\"");
    }

    #[test]
    fn test_op_json_shape() {
        let op = Op {
            process: Process::Worker(0),
            kind: OpKind::Invoke,
            f: "read".to_string(),
            value: None,
            time: 42,
            error: None,
            index: None,
        };
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v, json!({"process": 0, "type": "invoke", "f": "read", "time": 42}));
    }

    #[test]
    fn test_history_append_returns_op() {
        let history = History::new("h");
        let op = Op::new("read");
        let returned = history.append(op.clone());
        assert_eq!(returned, op);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_history_shared_across_clones() {
        let history = History::new("h");
        let other = history.clone();
        history.append(Op::new("a"));
        other.append(Op::new("b"));
        let ops = history.snapshot();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].f, "a");
        assert_eq!(ops[1].f, "b");
    }

    #[test]
    fn test_drain_empties_history() {
        let history = History::new("h");
        history.append(Op::new("read"));
        let ops = history.drain();
        assert_eq!(ops.len(), 1);
        assert!(history.is_empty());
    }

    #[test]
    fn test_assign_indices_dense_and_ordered() {
        let mut ops = vec![Op::new("a"), Op::new("b"), Op::new("c")];
        assign_indices(&mut ops);
        let indices: Vec<u64> = ops.iter().map(|op| op.index.unwrap()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_active_histories_add_remove() {
        let active = ActiveHistories::new();
        let a = History::new("a");
        let b = History::new("b");
        active.add(a);
        active.add(b);
        assert_eq!(active.snapshot().len(), 2);

        active.remove("a");
        let snap = active.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].name(), "b");
    }

    #[test]
    fn test_concurrent_appends_all_recorded() {
        use std::thread;

        let history = History::new("h");
        let mut handles = Vec::new();
        for i in 0..8 {
            let h = history.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    h.append(Op::new(format!("f{}", i)));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(history.len(), 800);
    }
}

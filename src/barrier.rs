//! Reusable N-way rendezvous for worker phase coordination
//!
//! Workers arrive twice per case: once after opening their clients and
//! once before closing them. A zero-sized barrier is the no-op sentinel
//! used by degenerate tests with no nodes, where every arrival succeeds
//! immediately.

use std::sync::Arc;

use tokio::sync::Barrier;

/// A cloneable, reusable rendezvous point.
#[derive(Clone)]
pub struct PhaseBarrier {
    inner: Option<Arc<Barrier>>,
}

impl PhaseBarrier {
    /// Create a barrier for `n` parties; `n == 0` yields the no-op
    /// sentinel.
    pub fn new(n: usize) -> Self {
        PhaseBarrier {
            inner: if n == 0 { None } else { Some(Arc::new(Barrier::new(n))) },
        }
    }

    /// The no-op sentinel
    pub fn none() -> Self {
        PhaseBarrier { inner: None }
    }

    /// Whether this is the no-op sentinel
    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// Block until every party has arrived, then release all of them.
    /// The barrier resets and can be reused for the next phase.
    pub async fn arrive(&self) {
        if let Some(barrier) = &self.inner {
            barrier.wait().await;
        }
    }
}

impl std::fmt::Debug for PhaseBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(_) => f.write_str("PhaseBarrier"),
            None => f.write_str("PhaseBarrier(noop)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_barrier_returns_immediately() {
        let barrier = PhaseBarrier::new(0);
        assert!(barrier.is_noop());
        barrier.arrive().await;
        barrier.arrive().await;
    }

    #[tokio::test]
    async fn test_barrier_releases_all_parties() {
        let barrier = PhaseBarrier::new(3);
        let mut handles = Vec::new();
        for _ in 0..3 {
            let b = barrier.clone();
            handles.push(tokio::spawn(async move {
                b.arrive().await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_barrier_is_reusable() {
        let barrier = PhaseBarrier::new(2);
        for _ in 0..2 {
            let b = barrier.clone();
            let other = tokio::spawn(async move {
                b.arrive().await;
            });
            barrier.arrive().await;
            other.await.unwrap();
        }
    }
}

//! Single-flight request collapsing.
//!
//! Concurrent callers sharing a key await one shared computation instead of
//! each issuing a duplicate upstream call. The leader's work is spawned onto
//! the runtime, so it runs to completion and publishes its value even when
//! every waiter's HTTP request has been aborted.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Returned to a waiter whose leader vanished without publishing a value
/// (task panic or runtime shutdown). Callers map this to a typed failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderLost;

impl std::fmt::Display for LeaderLost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("single-flight leader finished without a value")
    }
}

impl std::error::Error for LeaderLost {}

/// Collapses concurrent identical in-flight computations onto one result.
#[derive(Clone)]
pub struct SingleFlight<K, V> {
    inflight: Arc<Mutex<HashMap<K, broadcast::Sender<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + 'static,
{
    /// Create an empty single-flight group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `factory` under `key`, or join an in-flight run for the same key.
    ///
    /// Exactly one caller (the leader) executes the factory; every caller
    /// issued while that run is outstanding receives a clone of its result.
    ///
    /// # Errors
    ///
    /// Returns [`LeaderLost`] if the leading task died without publishing.
    pub async fn run<F, Fut>(&self, key: K, factory: F) -> Result<V, LeaderLost>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = V> + Send + 'static,
    {
        let waiter = {
            let mut inflight = self.inflight.lock();
            if let Some(tx) = inflight.get(&key) {
                Some(tx.subscribe())
            } else {
                let (tx, _) = broadcast::channel(1);
                inflight.insert(key.clone(), tx);
                None
            }
        };

        if let Some(mut rx) = waiter {
            debug!(?key, "joining in-flight computation");
            return rx.recv().await.map_err(|_| LeaderLost);
        }

        // Leader path. Spawn so the computation survives this caller being
        // dropped mid-flight; late waiters still get the published value.
        let inflight = Arc::clone(&self.inflight);
        let leader_key = key.clone();
        let handle = tokio::spawn(async move {
            let value = factory().await;
            let tx = inflight.lock().remove(&leader_key);
            if let Some(tx) = tx {
                // No receivers is fine; the leader returns the value itself.
                let _ = tx.send(value.clone());
            }
            value
        });

        match handle.await {
            Ok(value) => Ok(value),
            Err(join_err) => {
                debug!(?key, error = %join_err, "single-flight leader lost");
                self.inflight.lock().remove(&key);
                Err(LeaderLost)
            }
        }
    }

    /// Number of keys with an outstanding computation.
    #[must_use]
    pub fn inflight_len(&self) -> usize {
        self.inflight.lock().len()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let group: SingleFlight<String, u64> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let group = group.clone();
            let calls = Arc::clone(&calls);
            tasks.push(tokio::spawn(async move {
                group
                    .run("offer-1".to_string(), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        42
                    })
                    .await
            }));
        }

        for task in tasks {
            let value = task.await.expect("join").expect("value");
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.inflight_len(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_collapse() {
        let group: SingleFlight<u32, u32> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for key in 0..4u32 {
            let group = group.clone();
            let calls = Arc::clone(&calls);
            tasks.push(tokio::spawn(async move {
                group
                    .run(key, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        key * 2
                    })
                    .await
            }));
        }
        for (key, task) in (0..4u32).zip(tasks) {
            assert_eq!(task.await.expect("join").expect("value"), key * 2);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn work_completes_after_waiter_abort() {
        let group: SingleFlight<String, u64> = SingleFlight::new();
        let done = Arc::new(AtomicUsize::new(0));

        let leader = {
            let group = group.clone();
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                group
                    .run("offer-2".to_string(), move || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        done.fetch_add(1, Ordering::SeqCst);
                        7
                    })
                    .await
            })
        };

        // Abort the waiting caller; the spawned computation keeps going.
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(group.inflight_len(), 0);
    }

    #[tokio::test]
    async fn sequential_runs_do_not_collapse() {
        let group: SingleFlight<u32, u32> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let value = group
                .run(1, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    9
                })
                .await
                .expect("value");
            assert_eq!(value, 9);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

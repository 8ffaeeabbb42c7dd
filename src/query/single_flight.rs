//! Per-key de-duplication of in-flight work
//!
//! The first caller for a key starts the work; callers arriving while it is
//! still running await the same shared future instead of starting their own.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

type Flight<T> = Shared<BoxFuture<'static, T>>;

/// Map of in-flight futures keyed by `K`
pub struct SingleFlight<K, T>
where
    T: Clone,
{
    calls: Mutex<HashMap<K, (u64, Flight<T>)>>,
    next_id: AtomicU64,
}

/// Whether the caller started the work or joined an existing flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Joined,
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of keys with work in flight
    pub fn in_flight(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run `start` for `key` unless a flight for `key` is already running
    ///
    /// `start` is only invoked by the leader. The key is released once the
    /// leader observes completion, so later callers start fresh work.
    pub async fn run<F>(&self, key: K, start: F) -> (T, Role)
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let (id, flight, role) = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            match calls.get(&key) {
                Some((id, flight)) => (*id, flight.clone(), Role::Joined),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let flight = start().shared();
                    calls.insert(key.clone(), (id, flight.clone()));
                    (id, flight, Role::Leader)
                }
            }
        };

        if role == Role::Leader {
            let _release = Release {
                calls: &self.calls,
                key,
                id,
            };
            (flight.await, role)
        } else {
            (flight.await, role)
        }
    }
}

/// Removes the leader's entry when the leader finishes or is dropped
struct Release<'a, K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    calls: &'a Mutex<HashMap<K, (u64, Flight<T>)>>,
    key: K,
    id: u64,
}

impl<K, T> Drop for Release<'_, K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    fn drop(&mut self) {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        // A newer flight may own the key if this leader was cancelled early
        if calls.get(&self.key).map(|(id, _)| *id) == Some(self.id) {
            calls.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_single_caller_runs_work() {
        let flights: SingleFlight<&str, u32> = SingleFlight::new();
        let (value, role) = flights.run("k", || async { 7 }.boxed()).await;
        assert_eq!(value, 7);
        assert_eq!(role, Role::Leader);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flights: Arc<SingleFlight<String, u32>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let runs = runs.clone();
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run("NDLS_GKP_8".to_string(), move || {
                        async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            gate.notified().await;
                            42
                        }
                        .boxed()
                    })
                    .await
            }));
        }

        // Let every task reach the flight before releasing it
        while flights.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.notify_one();

        let mut leaders = 0;
        for handle in handles {
            let (value, role) = handle.await.unwrap();
            assert_eq!(value, 42);
            if role == Role::Leader {
                leaders += 1;
            }
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let flights: SingleFlight<u8, u8> = SingleFlight::new();
        let (a, _) = flights.run(1, || async { 1 }.boxed()).await;
        let (b, _) = flights.run(2, || async { 2 }.boxed()).await;
        assert_eq!((a, b), (1, 2));
    }

    #[tokio::test]
    async fn test_key_released_after_completion() {
        let flights: SingleFlight<&str, usize> = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let runs = runs.clone();
            let (_, role) = flights
                .run("k", move || async move { runs.fetch_add(1, Ordering::SeqCst) }.boxed())
                .await;
            assert_eq!(role, Role::Leader);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}

//! Single-flight compute cache.
//!
//! For each key at most one computation is ever in flight. Callers arriving
//! while it runs attach to the same completion handle and observe the same
//! result. Successful results are memoized for the lifetime of the cache and
//! are never evicted.
//!
//! Failures are not memoized: every caller attached to the failed attempt
//! receives the error, the entry is dropped, and the next call starts a fresh
//! computation.
//!
//! Computations are spawned onto the tokio runtime, so a caller that goes
//! away does not cancel work other callers may be waiting on.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

/// `None` means the spawned computation panicked or was aborted before
/// reporting.
type Completion<V, E> = Shared<BoxFuture<'static, Option<Result<V, E>>>>;

enum Slot<V, E> {
    Pending(Completion<V, E>),
    Done(V),
}

/// Deduplicating memo keyed by string.
///
/// `V` and `E` are cloned to every caller; wrap large values in an `Arc` to
/// hand every caller the same instance.
pub struct SingleFlightCache<V, E> {
    entries: Arc<DashMap<String, Slot<V, E>>>,
}

impl<V, E> Default for SingleFlightCache<V, E> {
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }
}

impl<V, E> fmt::Debug for SingleFlightCache<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlightCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<V, E> SingleFlightCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized value for `key`, joining or starting its computation.
    ///
    /// `compute` is invoked only by the caller that finds no entry for `key`;
    /// the check and the insertion of the pending entry are one atomic step.
    /// The pending entry is published before `compute` runs, so `compute` may
    /// read this cache.
    ///
    /// # Panics
    ///
    /// Panics if the computation this caller attached to panicked.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let (completion, leader) = match self.entries.entry(key.to_owned()) {
            Entry::Occupied(occupied) => match occupied.get() {
                Slot::Done(value) => return Ok(value.clone()),
                Slot::Pending(completion) => (completion.clone(), None),
            },
            Entry::Vacant(vacant) => {
                let (done, outcome) = oneshot::channel();
                let completion: Completion<V, E> =
                    async move { outcome.await.ok() }.boxed().shared();
                vacant.insert(Slot::Pending(completion.clone()));
                (completion, Some(done))
            }
        };

        // Shard lock released; only the caller that inserted the slot launches.
        if let Some(done) = leader {
            tracing::debug!(key, "Starting computation");
            self.launch(key.to_owned(), compute(), done);
        }

        match completion.clone().await {
            Some(result) => result,
            None => {
                self.entries.remove_if(key, |_, slot| {
                    matches!(slot, Slot::Pending(pending) if pending.ptr_eq(&completion))
                });
                panic!("single-flight computation for key {key:?} panicked");
            }
        }
    }

    fn launch<Fut>(&self, key: String, work: Fut, done: oneshot::Sender<Result<V, E>>)
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            let result = work.await;
            // The pending slot for `key` is ours until this point: nobody else
            // inserts while it exists.
            match &result {
                Ok(value) => {
                    entries.insert(key, Slot::Done(value.clone()));
                }
                Err(_) => {
                    tracing::debug!(key = %key, "Computation failed, entry dropped");
                    entries.remove(&key);
                }
            }
            // Waiters may all be gone.
            let _ = done.send(result);
        });
    }

    /// Memoized value for `key`, if its computation already succeeded.
    pub fn get(&self, key: &str) -> Option<V> {
        match self.entries.get(key)?.value() {
            Slot::Done(value) => Some(value.clone()),
            Slot::Pending(_) => None,
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|slot| matches!(slot.value(), Slot::Pending(_)))
    }

    /// Number of keys that are pending or done.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_computation() {
        let cache: Arc<SingleFlightCache<Arc<String>, String>> = Arc::new(SingleFlightCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let unit = Duration::from_millis(300);

        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("user-1", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(unit).await;
                        Ok(Arc::new("result-for-user-1".to_string()))
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }
        let elapsed = start.elapsed();

        assert_eq!(calls.load(Ordering::SeqCst), 1, "compute must run exactly once");
        assert!(elapsed < unit * 3, "callers should overlap, took {:?}", elapsed);
        for result in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], result), "all callers see one instance");
        }
    }

    #[tokio::test]
    async fn test_done_entry_is_memoized() {
        let cache: SingleFlightCache<u32, String> = SingleFlightCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = cache
                .get_or_compute("k", move || async move {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) as u32 + 10)
                })
                .await;
            assert_eq!(value, Ok(10));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("k"), Some(10));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_compute_independently() {
        let cache: SingleFlightCache<String, String> = SingleFlightCache::new();

        let a = cache
            .get_or_compute("a", || async { Ok("A".to_string()) })
            .await;
        let b = cache
            .get_or_compute("b", || async { Ok("B".to_string()) })
            .await;

        assert_eq!(a.unwrap(), "A");
        assert_eq!(b.unwrap(), "B");
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_reaches_every_waiter_then_retries() {
        let cache: Arc<SingleFlightCache<u32, String>> = Arc::new(SingleFlightCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("flaky", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Err::<u32, _>("backend unavailable".to_string())
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err("backend unavailable".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.get("flaky").is_none());
        assert!(cache.is_empty(), "failed attempts are not memoized");

        let retried = cache.get_or_compute("flaky", || async { Ok(5) }).await;
        assert_eq!(retried, Ok(5));
        assert_eq!(cache.get("flaky"), Some(5));
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_computation() {
        let cache: Arc<SingleFlightCache<u32, String>> = Arc::new(SingleFlightCache::new());

        let first = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute("slow", || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(42)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.is_pending("slow"));
        first.abort();

        let value = cache.get_or_compute("slow", || async { Ok(0) }).await;
        assert_eq!(value, Ok(42), "late caller joins the first computation");
    }

    #[tokio::test]
    async fn test_compute_can_read_the_cache() {
        // The factory runs after its own pending slot is visible and after
        // the shard lock is released.
        let cache: Arc<SingleFlightCache<usize, String>> = Arc::new(SingleFlightCache::new());
        let inner = Arc::clone(&cache);

        let value = cache
            .get_or_compute("k", move || {
                let pending = inner.is_pending("k");
                let seen = inner.len();
                let done = inner.get("k");
                async move {
                    match (pending, done) {
                        (true, None) => Ok(seen),
                        _ => Err("slot not pending while computing".to_string()),
                    }
                }
            })
            .await;

        assert_eq!(value, Ok(1));
        assert_eq!(cache.get("k"), Some(1));
    }
}

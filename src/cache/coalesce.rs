//! Request coalescing for cache fills.
//!
//! A [`Coalescer`] is a process-wide registry of in-flight computations keyed
//! by cache key. The first caller for a key starts the work; callers arriving
//! while it is still registered attach to the same shared future and observe
//! its value or error. The registry entry is dropped as the work resolves, so
//! later callers start fresh work instead of reusing a finished result.

use std::any::Any;
use std::future::Future;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use tracing::debug;

use crate::application::repos::RepoError;

type Outcome = Result<Arc<dyn Any + Send + Sync>, RepoError>;
type Flight = Shared<BoxFuture<'static, Outcome>>;
type Registry = DashMap<String, Flight>;

/// Keyed registry of in-flight shared computations.
///
/// Created once at startup and cloned into every component that needs
/// coalescing; clones share the same registry.
#[derive(Clone, Default)]
pub struct Coalescer {
    flights: Arc<Registry>,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a computation currently registered.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Run `compute` for `key` unless a computation for `key` is already in
    /// flight, in which case wait for that one instead.
    ///
    /// Callers sharing a key must agree on `T`; a mismatch is reported as an
    /// integrity error rather than a panic.
    pub async fn run<T, F, Fut>(&self, key: &str, compute: F) -> Result<Arc<T>, RepoError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RepoError>> + Send + 'static,
    {
        let flight = match self.flights.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                counter!("quill_list_cache_coalesced_total").increment(1);
                debug!(key, "joining in-flight computation");
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                let flight = Self::launch(Arc::downgrade(&self.flights), key.to_string(), compute);
                vacant.insert(flight.clone());
                flight
            }
        };

        let value = flight.await?;
        value.downcast::<T>().map_err(|_| RepoError::Integrity {
            message: format!("coalesced value for `{key}` has an unexpected type"),
        })
    }

    fn launch<T, F, Fut>(registry: Weak<Registry>, key: String, compute: F) -> Flight
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RepoError>> + Send + 'static,
    {
        async move {
            let guard = FlightGuard { key, registry };
            let outcome = compute()
                .await
                .map(|value| Arc::new(value) as Arc<dyn Any + Send + Sync>);
            drop(guard);
            outcome
        }
        .boxed()
        .shared()
    }
}

/// Unregisters a flight when its work finishes or unwinds.
struct FlightGuard {
    key: String,
    registry: Weak<Registry>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if let Some(flights) = self.registry.upgrade() {
            flights.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let coalescer = Coalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coalescer = coalescer.clone();
            let calls = Arc::clone(&calls);
            let release = Arc::clone(&release);
            handles.push(tokio::spawn(async move {
                coalescer
                    .run("k", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok::<_, RepoError>(vec![1, 2, 3])
                    })
                    .await
            }));
        }

        while coalescer.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.notify_one();

        for handle in handles {
            let value = handle.await.expect("join").expect("value");
            assert_eq!(*value, vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn errors_are_shared_and_not_retained() {
        let coalescer = Coalescer::new();

        let first = coalescer
            .run("k", || async { Err::<u64, _>(RepoError::Timeout) })
            .await;
        assert!(matches!(first, Err(RepoError::Timeout)));
        assert_eq!(coalescer.in_flight(), 0);

        let second = coalescer.run("k", || async { Ok::<u64, RepoError>(7) }).await;
        assert_eq!(*second.expect("fresh computation"), 7);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_coalesce() {
        let coalescer = Coalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b"] {
            let calls = Arc::clone(&calls);
            coalescer
                .run(key, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, RepoError>(())
                })
                .await
                .expect("run");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn mismatched_types_surface_as_integrity_errors() {
        let coalescer = Coalescer::new();
        let release = Arc::new(Notify::new());

        let leader = {
            let coalescer = coalescer.clone();
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                coalescer
                    .run("k", move || async move {
                        release.notified().await;
                        Ok::<_, RepoError>(1_u64)
                    })
                    .await
            })
        };

        while coalescer.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        let follower = {
            let coalescer = coalescer.clone();
            tokio::spawn(async move {
                coalescer
                    .run("k", || async { Ok::<_, RepoError>("text".to_string()) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.notify_one();

        assert_eq!(*leader.await.expect("join").expect("leader value"), 1);
        assert!(matches!(
            follower.await.expect("join"),
            Err(RepoError::Integrity { .. })
        ));
    }
}

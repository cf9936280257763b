//! Bounded concurrent dispatch of resolver calls.
//!
//! A [`QueryBatch`] owns a `JoinSet` for the lifetime of one prefix. At most
//! `concurrency` queries are in flight; a new one is spawned each time one
//! completes, until dispatch is stopped. Completed queries are handed out in
//! completion order. Dropping the batch aborts whatever is still running, so
//! no work outlives it.

use std::collections::HashMap;
use std::sync::Arc;
use std::vec::IntoIter;
use tokio::task::{Id, JoinSet};
use tracing::{error, warn};

use crate::models::ResolvedLocation;
use crate::resolver::LocationResolver;

/// Outcome of one dispatched query
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedQuery {
    pub postal_code: String,
    pub location: Option<ResolvedLocation>,
}

pub struct QueryBatch {
    resolver: Arc<dyn LocationResolver>,
    pending: IntoIter<String>,
    join_set: JoinSet<CompletedQuery>,
    /// Code behind every running task, for tasks that never return one
    running: HashMap<Id, String>,
    total: usize,
    completed: usize,
}

impl QueryBatch {
    /// Start resolving `codes` with at most `concurrency` queries in flight.
    ///
    /// A concurrency of zero is treated as one.
    pub fn start(
        resolver: Arc<dyn LocationResolver>,
        codes: Vec<String>,
        concurrency: usize,
    ) -> Self {
        let total = codes.len();
        let mut batch = Self {
            resolver,
            pending: codes.into_iter(),
            join_set: JoinSet::new(),
            running: HashMap::new(),
            total,
            completed: 0,
        };
        for _ in 0..concurrency.max(1) {
            if !batch.spawn_next() {
                break;
            }
        }
        batch
    }

    fn spawn_next(&mut self) -> bool {
        let Some(postal_code) = self.pending.next() else {
            return false;
        };
        let resolver = self.resolver.clone();
        let code = postal_code.clone();

        let handle = self.join_set.spawn(async move {
            let location = resolver.resolve(&code).await;
            CompletedQuery {
                postal_code: code,
                location,
            }
        });
        self.running.insert(handle.id(), postal_code);
        true
    }

    /// Stop spawning new queries. Returns how many codes were never dispatched.
    ///
    /// Queries already in flight still complete through [`next_completed`](Self::next_completed).
    pub fn stop_dispatch(&mut self) -> usize {
        let skipped = self.pending.len();
        self.pending = Vec::new().into_iter();
        skipped
    }

    /// Next finished query, or `None` once nothing is running.
    ///
    /// A task that panicked or was cancelled yields a failed query for its code.
    pub async fn next_completed(&mut self) -> Option<CompletedQuery> {
        let done = match self.join_set.join_next_with_id().await? {
            Ok((id, done)) => {
                self.running.remove(&id);
                done
            }
            Err(e) => {
                let postal_code = self.running.remove(&e.id()).unwrap_or_default();
                if e.is_panic() {
                    error!("Resolver panicked for {}", postal_code);
                } else {
                    warn!("Query task for {} did not finish: {}", postal_code, e);
                }
                CompletedQuery {
                    postal_code,
                    location: None,
                }
            }
        };
        self.completed += 1;
        self.spawn_next();
        Some(done)
    }

    /// Drain the batch into a vector in completion order.
    pub async fn collect(mut self) -> Vec<CompletedQuery> {
        let mut out = Vec::with_capacity(self.total);
        while let Some(done) = self.next_completed().await {
            out.push(done);
        }
        out
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn in_flight(&self) -> usize {
        self.join_set.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GeoPoint;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Resolves even codes, fails odd ones, and tracks peak concurrency.
    struct CountingResolver {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl CountingResolver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LocationResolver for CountingResolver {
        async fn resolve(&self, postal_code: &str) -> Option<ResolvedLocation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let n: u64 = postal_code.parse().unwrap();
            tokio::time::sleep(Duration::from_millis(5 + n % 7)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if postal_code == "01310013" {
                panic!("provider exploded");
            }

            (n % 2 == 0).then(|| ResolvedLocation {
                point: GeoPoint::new(-23.56, -46.65).unwrap(),
                neighborhood: Some("Bela Vista".into()),
                source_code: postal_code.to_string(),
            })
        }
    }

    fn codes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("01310{:03}", i)).collect()
    }

    #[tokio::test]
    async fn test_every_code_completes_once() {
        let resolver = CountingResolver::new();
        let results = QueryBatch::start(resolver.clone(), codes(40), 8).collect().await;

        assert_eq!(results.len(), 40);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 40);

        let mut seen: Vec<_> = results.iter().map(|r| r.postal_code.clone()).collect();
        seen.sort();
        assert_eq!(seen, codes(40));
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_batch() {
        let results = QueryBatch::start(CountingResolver::new(), codes(20), 4).collect().await;
        assert_eq!(results.len(), 20);
        let ok = results.iter().filter(|r| r.location.is_some()).count();
        assert_eq!(ok, 10);

        // Panicking query is reported as a failure
        let exploded = results.iter().find(|r| r.postal_code == "01310013").unwrap();
        assert!(exploded.location.is_none());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let resolver = CountingResolver::new();
        let batch = QueryBatch::start(resolver.clone(), codes(50), 5);
        assert_eq!(batch.in_flight(), 5);
        batch.collect().await;
        assert!(resolver.peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let mut batch = QueryBatch::start(CountingResolver::new(), vec![], 10);
        assert!(batch.next_completed().await.is_none());
        assert_eq!(batch.total(), 0);
    }

    #[tokio::test]
    async fn test_completion_counter() {
        let mut batch = QueryBatch::start(CountingResolver::new(), codes(3), 10);
        while batch.next_completed().await.is_some() {}
        assert_eq!(batch.completed(), 3);
    }

    #[tokio::test]
    async fn test_zero_concurrency_runs_one_at_a_time() {
        let resolver = CountingResolver::new();
        let batch = QueryBatch::start(resolver.clone(), codes(4), 0);
        assert_eq!(batch.in_flight(), 1);
        assert_eq!(batch.collect().await.len(), 4);
        assert_eq!(resolver.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_dispatch_drains_only_in_flight() {
        let resolver = CountingResolver::new();
        let mut batch = QueryBatch::start(resolver.clone(), codes(50), 5);

        assert!(batch.next_completed().await.is_some());
        // Five started, one more after the first completion
        assert_eq!(batch.stop_dispatch(), 44);

        let mut drained = 0;
        while batch.next_completed().await.is_some() {
            drained += 1;
        }
        assert_eq!(drained, 5);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 6);
        assert_eq!(batch.completed(), 6);
    }
}

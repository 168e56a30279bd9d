//! Per-key mutual exclusion and operation deadlines.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

/// A set of async mutexes keyed by string.
///
/// Holders of different keys never contend. Entries nobody holds are pruned
/// on the next acquisition.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inflight.lock().await;
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(
                map.entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub async fn len(&self) -> usize {
        self.inflight.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Longest budget a [`Deadline`] falls back to (about thirty years).
pub const MAX_BUDGET: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Point in time by which an operation's remote calls must finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

/// The deadline passed before the call finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired;

impl Deadline {
    /// Deadline `budget` from now. Budgets past what `Instant` can represent
    /// are capped at [`MAX_BUDGET`].
    pub fn after(budget: Duration) -> Self {
        let now = Instant::now();
        let at = now
            .checked_add(budget)
            .or_else(|| now.checked_add(MAX_BUDGET))
            .unwrap_or(now);
        Self { at }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Run `fut`, abandoning it once the deadline passes.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Expired> {
        tokio::time::timeout_at(self.at, fut)
            .await
            .map_err(|_| Expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("echo").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_released_keys_are_pruned() {
        let locks = KeyedLocks::new();
        drop(locks.lock("a").await);
        drop(locks.lock("b").await);
        // Acquiring prunes released entries before inserting
        let _c = locks.lock("c").await;
        assert_eq!(locks.len().await, 1);
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let deadline = Deadline::after(Duration::from_millis(10));
        let result = deadline
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(result, Err(Expired));
        assert!(deadline.is_expired());
    }

    #[tokio::test]
    async fn test_oversized_budget_is_capped() {
        let deadline = Deadline::after(Duration::from_secs(u64::MAX));

        assert!(!deadline.is_expired());
        assert!(deadline.remaining() > Duration::from_secs(365 * 24 * 60 * 60));
        assert!(deadline.remaining() <= MAX_BUDGET);
        assert_eq!(deadline.run(async { "done" }).await, Ok("done"));
    }

    #[tokio::test]
    async fn test_remaining_shrinks_to_zero() {
        let deadline = Deadline::after(Duration::from_millis(20));
        assert!(deadline.remaining() <= Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_deadline_passes_through_output() {
        let deadline = Deadline::after(Duration::from_secs(5));
        assert_eq!(deadline.run(async { 7 }).await, Ok(7));
    }
}

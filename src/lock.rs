//! Keyed mutual exclusion for booking operations.
//!
//! [`LockManager::acquire`] runs an async operation exclusively for a key.
//! The caller's place in the queue is taken when `acquire` is called, not
//! when the returned future is first polled, so operations under one key
//! start in call order. Different keys never wait on each other.
//!
//! ```text
//! key "booking:p-1"   [held] <- waiter <- waiter
//! key "booking:p-2"   [held]
//! ```
//!
//! The hold is released when the future completes, fails, or is dropped.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

/// Queue state for one key.
#[derive(Debug, Default)]
struct LockEntry {
    held: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

type Table = Arc<Mutex<HashMap<String, LockEntry>>>;

/// Serializes operations per resource key.
///
/// Cloning is cheap and clones share the same table, so one manager can be
/// handed to every booking flow in the process.
#[derive(Debug, Clone, Default)]
pub struct LockManager {
    table: Table,
}

impl LockManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` exclusively for `key`.
    ///
    /// Whatever the operation returns, including an `Err`, is handed back to
    /// this caller unchanged. The next queued operation starts afterwards.
    pub fn acquire<F, Fut>(
        &self,
        key: &str,
        operation: F,
    ) -> impl Future<Output = Fut::Output> + use<F, Fut>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let pending = {
            let mut table = lock_table(&self.table);
            let entry = table.entry(key.to_string()).or_default();
            if entry.held {
                let (tx, rx) = oneshot::channel();
                entry.waiters.push_back(tx);
                debug!(key, queued = entry.waiters.len(), "lock busy, queued");
                Some(rx)
            } else {
                entry.held = true;
                None
            }
        };

        let mut hold = Hold {
            table: Arc::clone(&self.table),
            key: key.to_string(),
            pending,
        };

        async move {
            hold.granted().await;
            operation().await
        }
    }

    /// Whether an operation currently holds `key`.
    #[must_use]
    pub fn is_locked(&self, key: &str) -> bool {
        lock_table(&self.table).get(key).is_some_and(|e| e.held)
    }

    /// Number of operations waiting behind the holder of `key`.
    #[must_use]
    pub fn queued(&self, key: &str) -> usize {
        lock_table(&self.table)
            .get(key)
            .map_or(0, |e| e.waiters.len())
    }
}

/// A place in one key's queue. Releases the key on drop once granted.
struct Hold {
    table: Table,
    key: String,

    /// `None` once the key is held by this caller.
    pending: Option<oneshot::Receiver<()>>,
}

impl Hold {
    async fn granted(&mut self) {
        if let Some(rx) = self.pending.as_mut() {
            // Senders are only dropped after a successful send, so an error
            // here still means the key was handed to us.
            let _ = rx.await;
            self.pending = None;
        }
    }
}

impl Drop for Hold {
    fn drop(&mut self) {
        if let Some(mut rx) = self.pending.take() {
            rx.close();
            if rx.try_recv().is_err() {
                return;
            }
        }
        release(&self.table, &self.key);
    }
}

/// Hand `key` to the next live waiter, or forget it.
fn release(table: &Table, key: &str) {
    let mut table = lock_table(table);
    let Some(entry) = table.get_mut(key) else {
        return;
    };
    while let Some(next) = entry.waiters.pop_front() {
        if next.send(()).is_ok() {
            return;
        }
    }
    table.remove(key);
}

fn lock_table(table: &Table) -> MutexGuard<'_, HashMap<String, LockEntry>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::sleep;

    type Log = Arc<Mutex<Vec<String>>>;

    fn push(log: &Log, line: String) {
        log.lock().unwrap().push(line);
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_runs_one_at_a_time_in_call_order() {
        let locks = LockManager::new();
        let log: Log = Arc::default();

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let log = Arc::clone(&log);
                let fut = locks.acquire("booking", move || async move {
                    push(&log, format!("start-{i}"));
                    sleep(Duration::from_millis(10)).await;
                    push(&log, format!("end-{i}"));
                });
                tokio::spawn(fut)
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "start-0", "end-0", "start-1", "end-1", "start-2", "end-2", "start-3", "end-3"
            ]
        );
        assert!(!locks.is_locked("booking"));
    }

    #[tokio::test(start_paused = true)]
    async fn later_callers_queue_behind_holder() {
        let locks = LockManager::new();
        let first = locks.acquire("k", || sleep(Duration::from_millis(50)));
        let second = locks.acquire("k", || async {});

        assert!(locks.is_locked("k"));
        assert_eq!(locks.queued("k"), 1);

        tokio::join!(first, second);
        assert!(!locks.is_locked("k"));
        assert_eq!(locks.queued("k"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn different_keys_do_not_wait_for_each_other() {
        let locks = LockManager::new();
        let log: Log = Arc::default();

        let slow = {
            let log = Arc::clone(&log);
            locks.acquire("a", move || async move {
                sleep(Duration::from_millis(100)).await;
                push(&log, "a".into());
            })
        };
        let fast = {
            let log = Arc::clone(&log);
            locks.acquire("b", move || async move {
                sleep(Duration::from_millis(10)).await;
                push(&log, "b".into());
            })
        };
        tokio::join!(slow, fast);

        assert_eq!(*log.lock().unwrap(), vec!["b", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_propagates_and_releases_key() {
        let locks = LockManager::new();

        let failing = locks.acquire("k", || async { Err::<(), _>("boom".to_string()) });
        let next = locks.acquire("k", || async { Ok::<_, String>(7) });

        let (failed, succeeded) = tokio::join!(failing, next);
        assert_eq!(failed.unwrap_err(), "boom");
        assert_eq!(succeeded.unwrap(), 7);
        assert!(!locks.is_locked("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_waiter_does_not_stall_queue() {
        let locks = LockManager::new();

        let holder = locks.acquire("k", || sleep(Duration::from_millis(20)));
        let abandoned = locks.acquire("k", || async {});
        let last = locks.acquire("k", || async { "ran" });
        drop(abandoned);

        let ((), result) = tokio::join!(holder, last);
        assert_eq!(result, "ran");
        assert!(!locks.is_locked("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn unpolled_holder_releases_on_drop() {
        let locks = LockManager::new();

        let holder = locks.acquire("k", || async {});
        assert!(locks.is_locked("k"));
        drop(holder);

        assert!(!locks.is_locked("k"));
        assert_eq!(locks.acquire("k", || async { 1 }).await, 1);
    }
}

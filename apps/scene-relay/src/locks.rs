//! Per-target FIFO mutual exclusion.
//!
//! A slot in a target's queue is reserved synchronously by [`TargetLocks::enqueue`]
//! so callers fix their position before they start awaiting. Ownership passes
//! directly from the releasing guard to the oldest live waiter; nothing else
//! can barge in between.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::metrics;

#[derive(Clone, Default)]
pub struct TargetLocks {
    table: Arc<LockTable>,
}

#[derive(Default)]
struct LockTable {
    entries: Mutex<HashMap<String, LockEntry>>,
    next_serial: AtomicU64,
}

#[derive(Default)]
struct LockEntry {
    holder: Option<Holder>,
    waiters: VecDeque<Waiter>,
}

struct Holder {
    serial: u64,
    command_id: String,
}

struct Waiter {
    holder: Holder,
    wake: oneshot::Sender<()>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockSnapshot {
    pub holder: Option<String>,
    pub waiters: Vec<String>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next FIFO slot for `target`. The ticket must be acquired
    /// (or dropped) to release the slot.
    pub fn enqueue(&self, target: &str, command_id: &str) -> LockTicket {
        let serial = self.table.next_serial.fetch_add(1, Ordering::Relaxed);
        let holder = Holder {
            serial,
            command_id: command_id.to_string(),
        };

        let mut entries = self.table.entries.lock();
        let entry = entries.entry(target.to_string()).or_default();
        let wait = if entry.holder.is_none() && entry.waiters.is_empty() {
            entry.holder = Some(holder);
            None
        } else {
            let (wake, rx) = oneshot::channel();
            entry.waiters.push_back(Waiter { holder, wake });
            debug!(target_id = %target, command_id, queued = entry.waiters.len(), "waiting for target lock");
            Some(rx)
        };
        metrics::TARGET_LOCKS.set(entries.len() as i64);
        drop(entries);

        LockTicket {
            table: self.table.clone(),
            target: target.to_string(),
            serial,
            wait,
            armed: true,
        }
    }

    /// Number of targets that have ever been locked.
    pub fn target_count(&self) -> usize {
        self.table.entries.lock().len()
    }

    pub fn snapshot(&self, target: &str) -> Option<LockSnapshot> {
        let entries = self.table.entries.lock();
        entries.get(target).map(|entry| LockSnapshot {
            holder: entry.holder.as_ref().map(|h| h.command_id.clone()),
            waiters: entry
                .waiters
                .iter()
                .map(|w| w.holder.command_id.clone())
                .collect(),
        })
    }
}

impl LockTable {
    /// Release `serial`'s hold (if it is the holder) or withdraw it from the
    /// queue (if it is still waiting).
    fn release(&self, target: &str, serial: u64) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(target) else {
            return;
        };

        if entry.holder.as_ref().map(|h| h.serial) != Some(serial) {
            entry.waiters.retain(|w| w.holder.serial != serial);
            return;
        }

        entry.holder = None;
        while let Some(next) = entry.waiters.pop_front() {
            let command_id = next.holder.command_id.clone();
            entry.holder = Some(next.holder);
            if next.wake.send(()).is_ok() {
                debug!(target_id = %target, command_id, "target lock handed off");
                return;
            }
            // Receiver vanished without withdrawing; skip it.
            warn!(target_id = %target, command_id, "dropping dead lock waiter");
            entry.holder = None;
        }
    }
}

/// A reserved position in a target's queue.
pub struct LockTicket {
    table: Arc<LockTable>,
    target: String,
    serial: u64,
    wait: Option<oneshot::Receiver<()>>,
    armed: bool,
}

impl LockTicket {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_granted(&self) -> bool {
        self.wait.is_none()
    }

    /// Wait until every earlier ticket for the same target has released.
    pub async fn acquire(mut self) -> TargetGuard {
        if let Some(rx) = self.wait.as_mut() {
            if rx.await.is_err() {
                warn!(target_id = %self.target, "lock waiter woken without hand-off");
            }
        }
        self.wait = None;
        self.armed = false;
        TargetGuard {
            table: self.table.clone(),
            target: std::mem::take(&mut self.target),
            serial: self.serial,
        }
    }
}

impl Drop for LockTicket {
    fn drop(&mut self) {
        if self.armed {
            self.table.release(&self.target, self.serial);
        }
    }
}

/// Exclusive hold on a target; dropping it wakes the next waiter.
pub struct TargetGuard {
    table: Arc<LockTable>,
    target: String,
    serial: u64,
}

impl TargetGuard {
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        self.table.release(&self.target, self.serial);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_ticket_is_granted_immediately() {
        let locks = TargetLocks::new();
        let ticket = locks.enqueue("room", "a");
        assert!(ticket.is_granted());
        let _guard = ticket.acquire().await;
        assert_eq!(
            locks.snapshot("room"),
            Some(LockSnapshot {
                holder: Some("a".into()),
                waiters: vec![]
            })
        );
    }

    #[tokio::test]
    async fn waiters_are_released_in_arrival_order() {
        let locks = TargetLocks::new();
        let first = locks.enqueue("room", "a").acquire().await;
        let second = locks.enqueue("room", "b");
        let third = locks.enqueue("room", "c");
        assert!(!second.is_granted());
        assert_eq!(locks.snapshot("room").unwrap().waiters, vec!["b", "c"]);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for (name, ticket) in [("c", third), ("b", second)] {
            let tx = tx.clone();
            tokio::spawn(async move {
                let _guard = ticket.acquire().await;
                tx.send(name).unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            });
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rx.try_recv().is_err());

        drop(first);
        assert_eq!(rx.recv().await, Some("b"));
        assert_eq!(rx.recv().await, Some("c"));
    }

    #[tokio::test]
    async fn dropping_a_waiting_ticket_withdraws_it() {
        let locks = TargetLocks::new();
        let first = locks.enqueue("room", "a").acquire().await;
        let abandoned = locks.enqueue("room", "b");
        let third = locks.enqueue("room", "c");
        drop(abandoned);
        assert_eq!(locks.snapshot("room").unwrap().waiters, vec!["c"]);
        drop(first);
        let guard = tokio::time::timeout(Duration::from_secs(1), third.acquire())
            .await
            .expect("c should be next");
        assert_eq!(guard.target(), "room");
    }

    #[tokio::test]
    async fn dropping_a_granted_ticket_passes_the_lock_on() {
        let locks = TargetLocks::new();
        let granted = locks.enqueue("room", "a");
        let next = locks.enqueue("room", "b");
        drop(granted);
        assert!(tokio::time::timeout(Duration::from_secs(1), next.acquire())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn targets_are_independent_and_kept() {
        let locks = TargetLocks::new();
        let _a = locks.enqueue("left", "1").acquire().await;
        let b = locks.enqueue("right", "2");
        assert!(b.is_granted());
        drop(b);
        assert_eq!(locks.target_count(), 2);
        assert_eq!(
            locks.snapshot("right"),
            Some(LockSnapshot {
                holder: None,
                waiters: vec![]
            })
        );
    }
}

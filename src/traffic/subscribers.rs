/// Snapshot fan-out
///
/// The registry is copy-on-write: publishing clones an `Arc` of the current
/// list and iterates it without holding the lock, so subscribe/unsubscribe
/// never wait on a slow delivery pass.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

use super::counters::TrafficSnapshot;

/// Per-subscriber buffer; a subscriber this far behind is dropped
pub const SUBSCRIBER_BUFFER: usize = 16;

type Entry = (u64, mpsc::Sender<Arc<TrafficSnapshot>>);

#[derive(Debug, Default)]
pub struct SubscriberSet {
    entries: Mutex<Arc<Vec<Entry>>>,
    next_id: AtomicU64,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, seeding it with `initial`
    pub fn subscribe(&self, initial: Arc<TrafficSnapshot>) -> mpsc::Receiver<Arc<TrafficSnapshot>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        // Fresh channel with free capacity; cannot fail
        let _ = tx.try_send(initial);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.lock();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push((id, tx));
        *guard = Arc::new(next);
        debug!("Traffic subscriber {} registered ({} total)", id, guard.len());
        rx
    }

    /// Push a snapshot to every listener, dropping those whose push fails.
    /// Returns the number of listeners that received it.
    pub fn publish(&self, snapshot: Arc<TrafficSnapshot>) -> usize {
        let current = Arc::clone(&self.lock());

        let mut dead = Vec::new();
        for (id, tx) in current.iter() {
            if tx.try_send(Arc::clone(&snapshot)).is_err() {
                dead.push(*id);
            }
        }

        if !dead.is_empty() {
            self.remove(&dead);
        }
        current.len() - dead.len()
    }

    fn remove(&self, ids: &[u64]) {
        let mut guard = self.lock();
        let next: Vec<Entry> = guard
            .iter()
            .filter(|(id, _)| !ids.contains(id))
            .cloned()
            .collect();
        *guard = Arc::new(next);
        debug!("Dropped {} traffic subscriber(s)", ids.len());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Arc<Vec<Entry>>> {
        // A poisoned registry still holds a valid list
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

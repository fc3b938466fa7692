//! Bounded per-client request history for windowed metrics.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use super::key::OperationClass;

/// Default number of entries retained per client.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    at: Instant,
    operation: OperationClass,
}

/// Per-class request counts over a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationCounts {
    pub read: u64,
    pub write: u64,
}

impl OperationCounts {
    fn add(&mut self, operation: OperationClass) {
        match operation {
            OperationClass::Read => self.read += 1,
            OperationClass::Write => self.write += 1,
        }
    }
}

/// Ring of admitted requests per client, oldest evicted first.
///
/// Only used for reporting; admission never reads it.
#[derive(Debug)]
pub struct RequestHistory {
    capacity: usize,
    rings: DashMap<String, Mutex<VecDeque<HistoryEntry>>>,
}

impl RequestHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rings: DashMap::new(),
        }
    }

    /// Append an admitted request for `client_id`.
    pub fn record(&self, client_id: &str, operation: OperationClass) {
        let entry = HistoryEntry {
            at: Instant::now(),
            operation,
        };

        if let Some(ring) = self.rings.get(client_id) {
            Self::push(&mut ring.lock(), entry, self.capacity);
            return;
        }

        let ring = self
            .rings
            .entry(client_id.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(self.capacity.min(64))));
        Self::push(&mut ring.lock(), entry, self.capacity);
    }

    /// Count the client's requests no older than `window`.
    pub fn counts_within(&self, client_id: &str, window: Duration) -> OperationCounts {
        let mut counts = OperationCounts::default();
        let Some(ring) = self.rings.get(client_id) else {
            return counts;
        };

        let now = Instant::now();
        for entry in ring.lock().iter() {
            if now.saturating_duration_since(entry.at) <= window {
                counts.add(entry.operation);
            }
        }
        counts
    }

    /// Number of entries currently retained for a client.
    pub fn len(&self, client_id: &str) -> usize {
        self.rings
            .get(client_id)
            .map(|ring| ring.lock().len())
            .unwrap_or(0)
    }

    fn push(ring: &mut VecDeque<HistoryEntry>, entry: HistoryEntry, capacity: usize) {
        while ring.len() >= capacity {
            ring.pop_front();
        }
        ring.push_back(entry);
    }
}

impl Default for RequestHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_operation() {
        let history = RequestHistory::default();
        history.record("client-a", OperationClass::Read);
        history.record("client-a", OperationClass::Read);
        history.record("client-a", OperationClass::Write);
        history.record("client-b", OperationClass::Write);

        let counts = history.counts_within("client-a", Duration::from_secs(60));
        assert_eq!(counts, OperationCounts { read: 2, write: 1 });

        let counts = history.counts_within("client-b", Duration::from_secs(60));
        assert_eq!(counts, OperationCounts { read: 0, write: 1 });
    }

    #[test]
    fn test_oldest_entries_evicted_at_capacity() {
        let history = RequestHistory::new(3);
        history.record("client-a", OperationClass::Write);
        history.record("client-a", OperationClass::Read);
        history.record("client-a", OperationClass::Read);
        history.record("client-a", OperationClass::Read);

        assert_eq!(history.len("client-a"), 3);
        let counts = history.counts_within("client-a", Duration::from_secs(60));
        assert_eq!(counts, OperationCounts { read: 3, write: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_excludes_old_entries() {
        let history = RequestHistory::default();
        history.record("client-a", OperationClass::Read);

        tokio::time::advance(Duration::from_secs(61)).await;
        history.record("client-a", OperationClass::Write);

        let counts = history.counts_within("client-a", Duration::from_secs(60));
        assert_eq!(counts, OperationCounts { read: 0, write: 1 });
        assert_eq!(history.len("client-a"), 2);
    }

    #[test]
    fn test_unknown_client_has_no_history() {
        let history = RequestHistory::default();
        assert_eq!(
            history.counts_within("nobody", Duration::from_secs(60)),
            OperationCounts::default()
        );
        assert_eq!(history.len("nobody"), 0);
    }
}

//! Bounded-concurrency admission gate.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

use super::key::CellKey;
use crate::error::{Result, TurnstileError};

#[derive(Debug)]
struct SlotCell {
    active: u32,
    limit: u32,
}

/// Tracks in-flight requests per (client, operation class).
///
/// Cells are created lazily on first acquire and live for the lifetime of
/// the limiter. The map is only locked long enough to find or insert a
/// cell; the check-then-increment runs under that cell's own lock so
/// unrelated cells never contend.
#[derive(Debug, Default)]
pub struct ConcurrencySlotLimiter {
    cells: DashMap<CellKey, Arc<Mutex<SlotCell>>>,
}

impl ConcurrencySlotLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take a slot. Succeeds iff fewer than `limit` are active.
    ///
    /// `limit` is fixed when the cell is first created.
    pub fn try_acquire(&self, key: &CellKey, limit: u32) -> bool {
        let cell = self.cell(key, limit);
        let mut cell = cell.lock();
        if cell.active < cell.limit {
            cell.active += 1;
            true
        } else {
            false
        }
    }

    /// Give back a slot taken by [`try_acquire`](Self::try_acquire).
    ///
    /// Releasing with nothing active leaves the count at zero and reports
    /// [`TurnstileError::SlotUnderflow`].
    pub fn release(&self, key: &CellKey) -> Result<()> {
        let Some(cell) = self.cells.get(key).map(|c| c.value().clone()) else {
            warn!(key = %key, "Release for a concurrency cell that was never acquired");
            return Err(TurnstileError::SlotUnderflow(key.clone()));
        };

        let mut cell = cell.lock();
        if cell.active == 0 {
            warn!(key = %key, "Concurrency slot released more times than acquired");
            return Err(TurnstileError::SlotUnderflow(key.clone()));
        }
        cell.active -= 1;
        Ok(())
    }

    /// Number of in-flight requests for a cell; zero if it does not exist.
    pub fn active(&self, key: &CellKey) -> u32 {
        self.cells
            .get(key)
            .map(|c| c.value().clone())
            .map(|c| c.lock().active)
            .unwrap_or(0)
    }

    /// The limit a cell was created with, if it exists.
    pub fn limit(&self, key: &CellKey) -> Option<u32> {
        self.cells
            .get(key)
            .map(|c| c.value().clone())
            .map(|c| c.lock().limit)
    }

    /// Every cell created so far.
    pub fn keys(&self) -> Vec<CellKey> {
        self.cells.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    fn cell(&self, key: &CellKey, limit: u32) -> Arc<Mutex<SlotCell>> {
        if let Some(cell) = self.cells.get(key) {
            return cell.value().clone();
        }
        self.cells
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SlotCell { active: 0, limit })))
            .value()
            .clone()
    }
}

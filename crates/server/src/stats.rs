use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Event and movement counters, updated inline on the command handling
/// path. Uptime is derived at query time, never stored.
#[derive(Debug)]
pub struct StatsTracker {
    total_smiles: AtomicU64,
    total_movements: AtomicU64,
    last_smile: Mutex<Option<DateTime<Utc>>>,
    started_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub total_smiles: u64,
    pub total_movements: u64,
    pub last_smile: Option<DateTime<Utc>>,
    pub uptime_seconds: f64,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            total_smiles: AtomicU64::new(0),
            total_movements: AtomicU64::new(0),
            last_smile: Mutex::new(None),
            started_at: Instant::now(),
        }
    }

    pub fn record_smile(&self) {
        self.total_smiles.fetch_add(1, Ordering::Relaxed);
        *self.last_smile.lock() = Some(Utc::now());
    }

    /// Returns the new movement total.
    pub fn record_movement(&self) -> u64 {
        self.total_movements.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_smiles: self.total_smiles.load(Ordering::Relaxed),
            total_movements: self.total_movements.load(Ordering::Relaxed),
            last_smile: *self.last_smile.lock(),
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

//! Counters shared between the reconciler/deletion path (writers) and the
//! metrics scrape handler (reader). Plain atomics suffice — no lock needed.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

pub struct Counters {
    pub pods_killed_total: AtomicU64,
    pub delete_errors_total: AtomicU64,
    pub event_errors_total: AtomicU64,
    pub last_kill_unix: AtomicI64,
    pub cache_synced: AtomicBool,
}

impl Counters {
    pub fn new() -> Self {
        Self {
            pods_killed_total: AtomicU64::new(0),
            delete_errors_total: AtomicU64::new(0),
            event_errors_total: AtomicU64::new(0),
            last_kill_unix: AtomicI64::new(0),
            cache_synced: AtomicBool::new(false),
        }
    }

    pub fn record_kill(&self, unix_ts: i64) {
        self.pods_killed_total.fetch_add(1, Ordering::Relaxed);
        self.last_kill_unix.store(unix_ts, Ordering::Relaxed);
    }

    pub fn record_delete_error(&self) {
        self.delete_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_error(&self) {
        self.event_errors_total.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

//! Progress aggregator (spec §2 item 2): mutable counters updated under a
//! single lock, throttled to one external callback every 500 ms.
//!
//! Grounded on `pbs-datastore::store_progress::StoreProgress`, which keeps
//! the same "plain counters + `Display`" shape; this version adds the
//! entry/byte/error breakdown and throttled-callback plumbing spec.md
//! requires.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Counters for one bucket (done, skipped, error or total).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryCounters {
    pub count: u64,
    pub size: u64,
}

/// Descriptor of the entry currently being processed, for display.
#[derive(Debug, Clone, Default)]
pub struct CurrentEntry {
    pub name: String,
    pub fragment_number: u32,
    pub fragment_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub done: EntryCounters,
    pub skipped: EntryCounters,
    pub error: EntryCounters,
    pub total: EntryCounters,
    pub archive_size: u64,
    pub compression_ratio: f64,
    pub current_entry: Option<CurrentEntry>,
}

impl ProgressSnapshot {
    /// `skipped.count + error.count + done.count` must equal the number
    /// of entries the enumerator emitted (spec §8 invariant).
    pub fn emitted_count(&self) -> u64 {
        self.done.count + self.skipped.count + self.error.count
    }
}

type ProgressCallback = Box<dyn Fn(&ProgressSnapshot) + Send + Sync>;

/// Shared, lock-protected progress state with a throttled external
/// callback. Every mutator takes the lock only for the duration of the
/// counter update, never across I/O, per spec §5.
pub struct ProgressAggregator {
    state: Mutex<ProgressSnapshot>,
    last_callback: Mutex<Instant>,
    throttle: Duration,
    callback: Option<ProgressCallback>,
}

impl ProgressAggregator {
    pub fn new(callback: Option<ProgressCallback>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ProgressSnapshot::default()),
            last_callback: Mutex::new(Instant::now() - Duration::from_secs(1)),
            throttle: Duration::from_millis(500),
            callback,
        })
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().unwrap().clone()
    }

    /// Sum-pass bookkeeping: only totals move.
    pub fn add_total(&self, count: u64, size: u64) {
        let mut guard = self.state.lock().unwrap();
        guard.total.count += count;
        guard.total.size += size;
        drop(guard);
        self.maybe_fire();
    }

    pub fn add_done(&self, count: u64, size: u64) {
        let mut guard = self.state.lock().unwrap();
        guard.done.count += count;
        guard.done.size += size;
        drop(guard);
        self.maybe_fire();
    }

    pub fn add_skipped(&self, count: u64, size: u64) {
        let mut guard = self.state.lock().unwrap();
        guard.skipped.count += count;
        guard.skipped.size += size;
        drop(guard);
        self.maybe_fire();
    }

    pub fn add_error(&self, count: u64, size: u64) {
        let mut guard = self.state.lock().unwrap();
        guard.error.count += count;
        guard.error.size += size;
        drop(guard);
        self.maybe_fire();
    }

    pub fn update_archive_size(&self, archive_size: u64, compression_ratio: f64) {
        let mut guard = self.state.lock().unwrap();
        guard.archive_size = archive_size;
        guard.compression_ratio = compression_ratio;
        drop(guard);
        self.maybe_fire();
    }

    pub fn set_current_entry(&self, entry: Option<CurrentEntry>) {
        let mut guard = self.state.lock().unwrap();
        guard.current_entry = entry;
        drop(guard);
        self.maybe_fire();
    }

    /// Fire the callback unconditionally (e.g. at run end), bypassing the
    /// throttle.
    pub fn force_callback(&self) {
        if let Some(cb) = &self.callback {
            let snap = self.snapshot();
            cb(&snap);
        }
        *self.last_callback.lock().unwrap() = Instant::now();
    }

    fn maybe_fire(&self) {
        let Some(cb) = &self.callback else { return };
        let mut last = self.last_callback.lock().unwrap();
        if last.elapsed() < self.throttle {
            return;
        }
        *last = Instant::now();
        drop(last);
        let snap = self.snapshot();
        cb(&snap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn counters_accumulate_independently() {
        let progress = ProgressAggregator::new(None);
        progress.add_total(3, 30);
        progress.add_done(1, 10);
        progress.add_skipped(1, 5);
        progress.add_error(1, 2);
        let snap = progress.snapshot();
        assert_eq!(snap.total.count, 3);
        assert_eq!(snap.emitted_count(), 3);
    }

    #[test]
    fn callback_is_throttled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let progress = ProgressAggregator::new(Some(Box::new(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        })));
        for _ in 0..50 {
            progress.add_done(1, 1);
        }
        // first call always fires (last_callback seeded in the past);
        // the rest land inside the 500ms throttle window.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn force_callback_bypasses_throttle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let progress = ProgressAggregator::new(Some(Box::new(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        })));
        progress.add_done(1, 1);
        progress.force_callback();
        progress.force_callback();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}

//! Work dispatcher (spec.md §2 item 6, §5 "Queues"): the entry queue and
//! storage queue are plain `crossbeam_channel` pairs; this module only
//! fixes their shape (bounded vs. unbounded, capacity) so callers do not
//! have to re-derive it at each call site.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::message::{EntryWork, StorageMessage};

/// Entry queue capacity (spec.md §5 "Entry queue: bounded (≤ 256
/// messages)").
pub const ENTRY_QUEUE_CAPACITY: usize = 256;

/// Producer = entry-enumerator, consumers = worker pool.
pub fn entry_queue() -> (Sender<EntryWork>, Receiver<EntryWork>) {
    bounded(ENTRY_QUEUE_CAPACITY)
}

/// Producer = archive writer's storage callback (called from any worker),
/// consumer = single storage dispatcher. Unbounded per spec.md §5 --
/// backpressure for storage segments is instead provided by
/// `storage_dispatch::TempFileSpace`.
pub fn storage_queue() -> (Sender<StorageMessage>, Receiver<StorageMessage>) {
    unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_queue_has_spec_capacity() {
        let (tx, rx) = entry_queue();
        assert!(tx.capacity() == Some(ENTRY_QUEUE_CAPACITY));
        drop(rx);
    }
}

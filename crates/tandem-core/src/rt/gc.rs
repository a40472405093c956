//! Deferred reclamation for state shared with the audio thread
//!
//! Snapshots published to the audio thread are `basedrop::Shared<T>`. When the
//! last reference to a superseded snapshot is dropped on the audio thread the
//! memory is not freed there: the pointer is queued and a background collector
//! thread frees it later. Bridge state owns resamplers and scratch buffers, so
//! freeing it inline would mean calling the allocator from the callback.

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// How often the collector thread frees queued allocations
const COLLECT_INTERVAL: Duration = Duration::from_millis(50);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("tandem-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives on this thread for good
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }

            log::info!("Realtime state collector started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn realtime state collector thread");

    rx.recv().expect("Collector thread exited before sending its handle")
}

/// Handle for allocating `Shared<T>` values reclaimed by the collector thread
///
/// The first call starts the collector thread. Call from the control thread
/// only; the audio thread never allocates.
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Shared;

    #[test]
    fn test_handle_is_shared_across_calls() {
        let a = Shared::new(&gc_handle(), vec![1.0f32; 16]);
        let b = Shared::new(&gc_handle(), vec![2.0f32; 16]);
        let a2 = a.clone();
        drop(a);
        assert_eq!(a2[0], 1.0);
        assert_eq!(b[15], 2.0);
    }
}

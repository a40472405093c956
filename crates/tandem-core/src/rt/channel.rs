//! Lock-free snapshot hand-off from the control thread to the audio thread
//!
//! The control thread builds a complete new state value and publishes it; the
//! audio thread acquires whatever was published last at the start of each
//! block. Publishing swaps a reference-counted pointer, so the audio thread
//! sees either the old value or the new one and never a half-written mix.
//!
//! ```text
//! control thread                         audio thread
//! ──────────────                         ────────────
//! build T (may allocate)
//! publish(T) ──► SharedCell swap ──────► acquire() -> Snapshot<T>
//! old snapshot dropped                   ... use for one block ...
//!                                        Snapshot dropped
//!                   last reference gone ─► queued for tandem-gc thread
//! ```
//!
//! Neither side ever frees memory inline: a superseded value stays alive for
//! as long as any snapshot references it, and the final drop only queues the
//! allocation for the collector thread (see [`super::gc`]).

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use basedrop::{Handle, Shared, SharedCell};
use thiserror::Error;

use super::gc::gc_handle;

/// Poll interval for [`RealtimeStateChannel::sync`]
const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Failure to publish new state
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishError {
    /// Another publish on the same channel was in progress
    #[error("Concurrent publish in progress")]
    Contended,
}

struct Versioned<T> {
    generation: u64,
    value: T,
}

/// A published value as seen by the audio thread
///
/// Holding a snapshot keeps the value alive even after newer values are
/// published. Dropping it never frees memory on the calling thread.
pub struct Snapshot<T: Send + Sync + 'static> {
    inner: Shared<Versioned<T>>,
}

impl<T: Send + Sync + 'static> Snapshot<T> {
    /// Generation this value was published as (0 for the initial value)
    #[inline]
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }
}

impl<T: Send + Sync + 'static> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Shared::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Deref for Snapshot<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.inner.value
    }
}

/// Single-writer / single-reader snapshot publisher
pub struct RealtimeStateChannel<T: Send + Sync + 'static> {
    cell: SharedCell<Versioned<T>>,
    handle: Handle,
    publishing: AtomicBool,
    generation: AtomicU64,
    acknowledged: AtomicU64,
}

impl<T: Send + Sync + 'static> RealtimeStateChannel<T> {
    /// Create a channel holding `initial` as generation 0
    pub fn new(initial: T) -> Self {
        Self::with_handle(gc_handle(), initial)
    }

    /// Create a channel that allocates through a specific collector handle
    pub fn with_handle(handle: Handle, initial: T) -> Self {
        let first = Shared::new(
            &handle,
            Versioned {
                generation: 0,
                value: initial,
            },
        );
        Self {
            cell: SharedCell::new(first),
            handle,
            publishing: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            acknowledged: AtomicU64::new(0),
        }
    }

    /// Make `value` the state the audio thread sees from its next acquire on
    ///
    /// Control thread only. Returns the new generation. A second publish
    /// racing this one gets [`PublishError::Contended`] and publishes nothing.
    pub fn publish(&self, value: T) -> Result<u64, PublishError> {
        if self
            .publishing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(PublishError::Contended);
        }

        let generation = self.generation.load(Ordering::Relaxed) + 1;
        let next = Shared::new(&self.handle, Versioned { generation, value });
        let previous = self.cell.replace(next);
        self.generation.store(generation, Ordering::Release);
        self.publishing.store(false, Ordering::Release);

        drop(previous);
        Ok(generation)
    }

    /// Most recently published state
    ///
    /// Audio thread. Never blocks, allocates or panics.
    #[inline]
    pub fn acquire(&self) -> Snapshot<T> {
        let inner = self.cell.get();
        self.acknowledged.fetch_max(inner.generation, Ordering::Release);
        Snapshot { inner }
    }

    /// Control-side look at the current state without acknowledging it
    pub fn peek(&self) -> Snapshot<T> {
        Snapshot {
            inner: self.cell.get(),
        }
    }

    /// Latest published generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Latest generation the audio thread has acquired
    pub fn acknowledged_generation(&self) -> u64 {
        self.acknowledged.load(Ordering::Acquire)
    }

    /// Wait until the audio thread has acquired the latest publish
    ///
    /// Once this returns true, the audio thread no longer starts blocks with
    /// any earlier state. Returns false if `timeout` elapsed first.
    pub fn sync(&self, timeout: Duration) -> bool {
        let target = self.generation();
        let deadline = Instant::now() + timeout;
        loop {
            if self.acknowledged_generation() >= target {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(SYNC_POLL_INTERVAL);
        }
    }
}

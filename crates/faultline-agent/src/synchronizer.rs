//! Fan-in synchronizer - aggregates N async outcomes into one completion
//!
//! The delivery worker fans one collector submission out per pending file
//! and needs a single "this round is done" signal once every submission
//! has answered, in whatever order and from whatever thread the answers
//! arrive. The [`Synchronizer`] counts outstanding [`Holder`]s; the
//! completion closure fires exactly once, when the last holder releases,
//! with the released values in release order.
//!
//! Holders are consumed by [`Holder::release`], so releasing twice is
//! rejected by the type system rather than detected at runtime. Dropping a
//! holder without releasing it counts the contribution as abandoned and is
//! logged - the aggregate would otherwise wait forever.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

type Completion<T> = Box<dyn FnOnce(Vec<T>) + Send>;

/// Lock acquisition that survives a poisoned mutex; a release from a
/// panicking worker thread must still be counted.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Inner<T> {
    outstanding: usize,
    cancelled: bool,
    completed: bool,
    results: Vec<T>,
    on_complete: Option<Completion<T>>,
}

/// Aggregates an a-priori-unknown number of concurrent contributions
pub struct Synchronizer<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T: Send + 'static> Synchronizer<T> {
    /// Creates a synchronizer whose `on_complete` receives the ordered
    /// released values once the last outstanding holder releases.
    pub fn new(on_complete: impl FnOnce(Vec<T>) + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                outstanding: 0,
                cancelled: false,
                completed: false,
                results: Vec::new(),
                on_complete: Some(Box::new(on_complete)),
            })),
        }
    }

    /// Registers one more expected contribution.
    ///
    /// May be called from any thread at any time before the aggregate has
    /// completed, including after earlier holders have already released
    /// (dynamic fan-out). Creating a holder on a completed aggregate is a
    /// programming error; the holder is returned but inert.
    pub fn create_holder(&self) -> Holder<T> {
        let mut inner = lock(&self.inner);
        if inner.completed {
            debug_assert!(false, "create_holder called after completion");
            warn!("Holder created on an already-completed synchronizer; it will be ignored");
        } else {
            inner.outstanding += 1;
        }
        Holder {
            inner: Arc::clone(&self.inner),
            released: false,
        }
    }

    /// Abandons the aggregate: completion never fires, later releases are
    /// no-ops. Safe to call more than once.
    pub fn cancel(&self) {
        let mut inner = lock(&self.inner);
        inner.cancelled = true;
        inner.on_complete = None;
    }

    /// Whether the aggregate was cancelled.
    pub fn is_cancelled(&self) -> bool {
        lock(&self.inner).cancelled
    }

    /// Whether contributions are still outstanding.
    pub fn is_waiting(&self) -> bool {
        lock(&self.inner).outstanding > 0
    }

    /// Whether the completion already fired.
    pub fn did_complete(&self) -> bool {
        lock(&self.inner).completed
    }
}

/// One outstanding contribution to a [`Synchronizer`]
///
/// Owned exclusively by the call site that created it until released.
pub struct Holder<T> {
    inner: Arc<Mutex<Inner<T>>>,
    released: bool,
}

impl<T: Send + 'static> Holder<T> {
    /// Records the contribution and decrements the outstanding count.
    ///
    /// Consumes the holder; the last release triggers the completion
    /// closure outside the lock, with every released value in release
    /// order.
    pub fn release(mut self, value: T) {
        self.released = true;
        let fire = {
            let mut inner = lock(&self.inner);
            if inner.cancelled || inner.completed {
                return;
            }
            if inner.outstanding == 0 {
                // Only reachable through a holder created after completion
                return;
            }
            inner.results.push(value);
            inner.outstanding -= 1;
            if inner.outstanding == 0 {
                inner.completed = true;
                inner
                    .on_complete
                    .take()
                    .map(|cb| (cb, std::mem::take(&mut inner.results)))
            } else {
                None
            }
        };

        if let Some((callback, results)) = fire {
            callback(results);
        }
    }
}

impl<T> Drop for Holder<T> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let inner = lock(&self.inner);
        if !inner.cancelled && !inner.completed {
            // The owning task died without releasing; the aggregate will
            // never complete.
            warn!("Holder dropped without release; fan-in aggregate is stuck");
            debug_assert!(false, "holder dropped without release");
        }
    }
}

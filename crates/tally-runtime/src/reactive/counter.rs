#![forbid(unsafe_code)]

//! Integer counter with synchronous subscriber notification.
//!
//! [`ObservableCounter`] is a thin layer over an eager [`Observable<i64>`]:
//! every `increment()` and `reset()` notifies, even when the value does not
//! change (two resets in a row fire twice).

use tracing::trace;

use super::observable::{Observable, Subscription};

/// An observable `i64` counter supporting increment and reset.
///
/// The value is set once at construction and is never undefined afterwards.
/// Cloning yields a second handle to the same counter.
#[derive(Debug, Clone)]
pub struct ObservableCounter {
    cell: Observable<i64>,
}

impl Default for ObservableCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ObservableCounter {
    /// Create a counter starting at `initial`.
    #[must_use]
    pub fn new(initial: i64) -> Self {
        Self {
            cell: Observable::eager(initial),
        }
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.cell.get()
    }

    /// Add one and notify subscribers. Wraps at `i64::MAX`.
    ///
    /// Returns the new value.
    pub fn increment(&self) -> i64 {
        let mut next = 0;
        self.cell.update(|v| {
            *v = v.wrapping_add(1);
            next = *v;
        });
        trace!(value = next, "counter incremented");
        next
    }

    /// Set the value to zero and notify subscribers.
    pub fn reset(&self) {
        self.cell.set(0);
        trace!("counter reset");
    }

    /// Register `callback`. It is invoked immediately with the current value
    /// and then after every increment or reset, on the calling thread.
    pub fn subscribe(&self, callback: impl Fn(i64) + 'static) -> Subscription {
        self.cell.observe(move |v| callback(*v))
    }

    /// Number of writes since construction.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.cell.version()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.cell.subscriber_count()
    }

    /// Borrow the underlying observable, e.g. to [`map`](Observable::map) it.
    #[must_use]
    pub fn as_observable(&self) -> &Observable<i64> {
        &self.cell
    }

    /// Unregister every subscriber. Later mutations still apply but notify
    /// no one.
    pub fn dispose(&self) {
        self.cell.dispose();
    }
}

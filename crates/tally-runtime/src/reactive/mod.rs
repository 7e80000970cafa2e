#![forbid(unsafe_code)]

//! Reactive state primitives.
//!
//! - [`Observable`]: A shared, version-tracked value wrapper with change
//!   notification via subscriber callbacks.
//! - [`Subscription`]: RAII guard that automatically unsubscribes on drop.
//! - [`ObservableCounter`]: An `i64` counter that notifies on every
//!   increment and reset.
//! - [`KeyedLookup`]: Resolves a record for the latest key on a worker
//!   thread and delivers only that key's outcome.
//!
//! # Architecture
//!
//! Everything here is single-threaded (`Rc<RefCell<..>>`) and owned by one
//! context. Subscribers are stored as `Weak` function pointers and cleaned up
//! lazily during notification. `KeyedLookup` is the only piece that touches
//! other threads, and its results re-enter through an mpsc channel drained by
//! the owner.
//!
//! # Invariants
//!
//! 1. Subscribers are notified in registration order.
//! 2. Dropping a [`Subscription`] removes the callback before the next
//!    notification cycle.
//! 3. Disposed components never invoke callbacks.
//! 4. A lookup delivers nothing for a key that has been superseded.

pub mod counter;
pub mod keyed;
pub mod observable;

pub use counter::ObservableCounter;
pub use keyed::{
    FailureReason, KeyedLookup, LookupError, LookupEvent, LookupState, LookupStats, ResolveError,
    Resolver,
};
pub use observable::{NotifyPolicy, Observable, Subscription};

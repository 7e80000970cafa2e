#![forbid(unsafe_code)]

//! Single-context reactive state for tally.
//!
//! # Role in tally
//! `tally-runtime` holds the state primitives a host drives from one owning
//! context: an [`ObservableCounter`] that notifies synchronously, and a
//! [`KeyedLookup`] that resolves records off-thread but delivers them back on
//! the owner, honoring only the latest key.
//!
//! # How it fits in the system
//! A host builds a [`Session`] from a [`SessionConfig`] and a [`Resolver`],
//! subscribes to the counter and lookup, and calls [`Session::poll`] from its
//! loop. [`task`] offers a separate fire-and-forget work stub with no link to
//! the session state.

pub mod config;
pub mod reactive;
pub mod session;
pub mod task;

pub use config::{ConfigError, LookupConfig, SessionConfig, SessionConfigParse};
pub use reactive::{
    FailureReason, KeyedLookup, LookupError, LookupEvent, LookupState, LookupStats, NotifyPolicy,
    Observable, ObservableCounter, ResolveError, Resolver, Subscription,
};
pub use session::Session;
pub use task::{LogWork, Work, WorkHandle, WorkOutcome, spawn_work};

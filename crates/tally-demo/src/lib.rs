#![forbid(unsafe_code)]

//! tally demo library.
//!
//! Exposes the demo scenario so integration tests can run it without a
//! process boundary.
//!
//! # Role in tally
//! `tally-demo` is the runnable tour of `tally-runtime`: a counter seeded from
//! configuration, user lookups against an in-memory directory, a derived
//! display name, and the background work stub.
//!
//! # How it fits in the system
//! The demo is the only consumer of the runtime in this workspace. It owns
//! the logging setup (`tracing-subscriber`) and the output format; the
//! runtime itself never installs a subscriber.

pub mod cli;
pub mod directory;
pub mod run;

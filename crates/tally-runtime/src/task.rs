#![forbid(unsafe_code)]

//! Fire-and-forget background work.
//!
//! A [`Work`] item runs once on its own thread and reports a
//! [`WorkOutcome`] to whoever holds the [`WorkHandle`]. There is no queue,
//! retry, or scheduling policy here; hosts that need one layer it on top.

use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

/// Result reported by a finished [`Work`] item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    Success,
    Failure(String),
}

impl WorkOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A unit of background work.
pub trait Work: Send + 'static {
    /// Name used for the worker thread and in logs.
    fn name(&self) -> &str;

    /// Perform the work. Runs on a dedicated thread.
    fn run(&mut self) -> WorkOutcome;
}

/// Work that only logs a message and succeeds.
#[derive(Debug, Clone)]
pub struct LogWork {
    name: String,
    message: String,
}

impl LogWork {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Work for LogWork {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> WorkOutcome {
        info!(work = %self.name, "{}", self.message);
        WorkOutcome::Success
    }
}

/// Handle to a spawned [`Work`] item.
#[derive(Debug)]
pub struct WorkHandle {
    name: String,
    handle: JoinHandle<WorkOutcome>,
}

impl WorkHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the work to finish and return its outcome.
    pub fn join(self) -> WorkOutcome {
        match self.handle.join() {
            Ok(outcome) => outcome,
            // `run` is wrapped in catch_unwind; this only covers panics in
            // the reporting path itself.
            Err(_) => WorkOutcome::Failure(format!("work '{}' thread panicked", self.name)),
        }
    }
}

/// Run `work` once on a new thread.
///
/// A panic inside [`Work::run`] is reported as [`WorkOutcome::Failure`].
pub fn spawn_work<W: Work>(mut work: W) -> io::Result<WorkHandle> {
    let name = work.name().to_string();
    let thread_name = format!("tally-work-{name}");
    let log_name = name.clone();
    let handle = thread::Builder::new().name(thread_name).spawn(move || {
        let outcome = match catch_unwind(AssertUnwindSafe(|| work.run())) {
            Ok(outcome) => outcome,
            Err(_) => WorkOutcome::Failure(format!("work '{log_name}' panicked")),
        };
        match &outcome {
            WorkOutcome::Success => debug!(work = %log_name, "work succeeded"),
            WorkOutcome::Failure(reason) => warn!(work = %log_name, %reason, "work failed"),
        }
        outcome
    })?;
    Ok(WorkHandle { name, handle })
}

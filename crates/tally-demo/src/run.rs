#![forbid(unsafe_code)]

//! Scripted walkthrough of one session.
//!
//! The scenario fires every requested key back to back, applies the counter
//! operations while the lookup is in flight, waits for the lookup to settle,
//! then optionally runs the background work stub. Everything observed by
//! subscribers is collected as [`DemoEvent`]s.

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use tally_runtime::{
    LogWork, LookupConfig, LookupEvent, Observable, Session, SessionConfig, WorkOutcome,
    spawn_work,
};
use tracing::{debug, info, info_span};

use crate::cli::Opts;
use crate::directory::{User, UserDirectory};

/// Upper bound on how long the demo waits for the last key to settle.
const SETTLE_GRACE: Duration = Duration::from_secs(30);

/// Something a subscriber observed during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DemoEvent {
    Count { value: i64 },
    UserResolved { key: String, user: User },
    DisplayName { name: String },
    LookupFailed { key: String, reason: String },
    Work { name: String, success: bool, detail: Option<String> },
}

impl fmt::Display for DemoEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count { value } => write!(f, "count = {value}"),
            Self::UserResolved { key, user } => {
                write!(f, "user {key} = {} (age {})", user.full_name(), user.age)
            }
            Self::DisplayName { name } => write!(f, "display name = {name}"),
            Self::LookupFailed { key, reason } => write!(f, "lookup {key} failed: {reason}"),
            Self::Work {
                name,
                success,
                detail,
            } => {
                let status = if *success { "succeeded" } else { "failed" };
                match detail {
                    Some(detail) => write!(f, "work {name} {status}: {detail}"),
                    None => write!(f, "work {name} {status}"),
                }
            }
        }
    }
}

/// Errors that abort the demo.
#[derive(Debug)]
pub enum DemoError {
    /// The background work thread could not be started.
    WorkSpawn(io::Error),
}

impl fmt::Display for DemoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkSpawn(err) => write!(f, "failed to spawn background work: {err}"),
        }
    }
}

impl std::error::Error for DemoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::WorkSpawn(err) => Some(err),
        }
    }
}

/// Apply CLI overrides on top of the environment-derived session config.
#[must_use]
pub fn session_config(opts: &Opts, base: SessionConfig) -> SessionConfig {
    let mut config = base;
    if let Some(initial) = opts.initial {
        config.initial_count = initial;
    }
    match opts.timeout_ms {
        Some(0) => config.lookup = LookupConfig::default().without_timeout(),
        Some(ms) => config.lookup = LookupConfig::default().with_timeout(Duration::from_millis(ms)),
        None => {}
    }
    config
}

/// Build the directory the scenario resolves against.
#[must_use]
pub fn directory(opts: &Opts) -> UserDirectory {
    let mut dir = UserDirectory::sample().with_latency(Duration::from_millis(opts.latency_ms));
    if opts.stagger_ms > 0 {
        let stagger = Duration::from_millis(opts.stagger_ms);
        for key in opts.keys.iter().rev().skip(1) {
            dir = dir.with_extra_delay(key.clone(), stagger);
        }
    }
    dir
}

/// Run the scenario and return everything subscribers saw, in order.
pub fn run(opts: &Opts, config: &SessionConfig) -> Result<Vec<DemoEvent>, DemoError> {
    let _span = info_span!("demo_run", keys = opts.keys.len()).entered();
    let events: Rc<RefCell<Vec<DemoEvent>>> = Rc::default();
    let mut session = Session::from_config(config, directory(opts));

    let sink = Rc::clone(&events);
    let _count_sub = session
        .counter()
        .subscribe(move |value| sink.borrow_mut().push(DemoEvent::Count { value }));

    let selected: Observable<Option<User>> = Observable::new(None);
    let display_name = selected.map(|user| user.as_ref().map(User::full_name));
    let sink = Rc::clone(&events);
    let _name_sub = display_name.subscribe(move |name| {
        if let Some(name) = name {
            sink.borrow_mut().push(DemoEvent::DisplayName { name: name.clone() });
        }
    });

    let sink = Rc::clone(&events);
    let target = selected.clone();
    let _lookup_sub = session.lookup().subscribe(move |event| match event {
        LookupEvent::Resolved { key, record } => {
            sink.borrow_mut().push(DemoEvent::UserResolved {
                key: key.clone(),
                user: record.clone(),
            });
            target.set(Some(record.clone()));
        }
        LookupEvent::Failed(err) => sink.borrow_mut().push(DemoEvent::LookupFailed {
            key: err.key().to_string(),
            reason: err.reason().to_string(),
        }),
    });

    for key in &opts.keys {
        debug!(key = %key, "requesting user");
        session.set_key(key.as_str());
    }
    for _ in 0..opts.increments {
        session.increment();
    }
    if opts.reset {
        session.reset();
    }

    if session.lookup().is_resolving() {
        let budget = config.lookup.resolve_timeout.unwrap_or(SETTLE_GRACE) + SETTLE_GRACE;
        session.lookup_mut().wait(budget);
    }
    let stats = session.lookup().stats();
    info!(
        started = stats.started,
        resolved = stats.resolved,
        failed = stats.failed,
        "lookup settled"
    );

    if opts.work {
        let work = LogWork::new("simple", "do work in simple worker");
        let handle = spawn_work(work).map_err(DemoError::WorkSpawn)?;
        let name = handle.name().to_string();
        let event = match handle.join() {
            WorkOutcome::Success => DemoEvent::Work {
                name,
                success: true,
                detail: None,
            },
            WorkOutcome::Failure(reason) => DemoEvent::Work {
                name,
                success: false,
                detail: Some(reason),
            },
        };
        events.borrow_mut().push(event);
    }

    session.dispose();
    let collected = events.borrow().clone();
    Ok(collected)
}

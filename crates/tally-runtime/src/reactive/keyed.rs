#![forbid(unsafe_code)]

//! Key-driven record resolution with last-key-wins delivery.
//!
//! # Design
//!
//! [`KeyedLookup<R>`] owns a monotonically increasing generation counter.
//! Every [`set_key`](KeyedLookup::set_key) bumps the generation and spawns a
//! worker thread that calls the [`Resolver`]. The worker sends its outcome,
//! tagged with the generation it was started for, over an mpsc channel. The
//! owner drains that channel from [`poll`](KeyedLookup::poll) or
//! [`wait`](KeyedLookup::wait), so subscribers always run on the owning
//! thread.
//!
//! # State machine
//!
//! ```text
//! Idle ──set_key──▶ Resolving(k) ──ok──▶ Resolved(k)
//!                        │  ▲    └─err/timeout─▶ Failed(k)
//!                        │  └───────set_key───────────┘
//!                        └─set_key─▶ Resolving(k')
//! ```
//!
//! # Invariants
//!
//! 1. At most one key is honored at a time: a completion is delivered only if
//!    its generation equals the current generation and the current key has not
//!    settled yet.
//! 2. Each key settles at most once: one `Resolved` or one `Failed`.
//! 3. A failure leaves [`latest_record`](KeyedLookup::latest_record) untouched.
//! 4. After [`dispose`](KeyedLookup::dispose) no callback runs.
//!
//! # Failure Modes
//!
//! | Condition                  | Delivered                                  |
//! |----------------------------|--------------------------------------------|
//! | Resolver returns `Err`     | `Failed(ResolutionFailed { Resolver(..) })` |
//! | Resolver exceeds timeout   | `Failed(ResolutionFailed { TimedOut(..) })` |
//! | Resolver panics            | `Failed(ResolutionFailed { Panicked(..) })` |
//! | Worker thread cannot spawn | `Failed(ResolutionFailed { Spawn(..) })`    |
//!
//! A timed-out resolver thread is not interrupted; its late result is
//! discarded like any stale completion.

use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, debug_span, trace, warn};

use super::observable::{SubscriberList, Subscription};
use crate::config::LookupConfig;

/// How often a blocking [`KeyedLookup::wait`] re-checks the resolve deadline.
const WAIT_SLICE: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error returned by a [`Resolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveError {
    message: String,
}

impl ResolveError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ResolveError {}

/// Why a resolution failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The resolver returned an error.
    Resolver(ResolveError),
    /// The resolver did not answer within the configured timeout.
    TimedOut(Duration),
    /// The resolver panicked; carries the panic payload when it is a string.
    Panicked(String),
    /// The worker thread could not be started.
    Spawn(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolver(err) => write!(f, "resolver error: {err}"),
            Self::TimedOut(after) => write!(f, "timed out after {}ms", after.as_millis()),
            Self::Panicked(msg) => write!(f, "resolver panicked: {msg}"),
            Self::Spawn(msg) => write!(f, "worker spawn failed: {msg}"),
        }
    }
}

/// Errors surfaced to lookup subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// Resolution for `key` failed and will not be retried.
    ResolutionFailed { key: String, reason: FailureReason },
}

impl LookupError {
    /// The key whose resolution failed.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::ResolutionFailed { key, .. } => key,
        }
    }

    #[must_use]
    pub fn reason(&self) -> &FailureReason {
        match self {
            Self::ResolutionFailed { reason, .. } => reason,
        }
    }
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResolutionFailed { key, reason } => {
                write!(f, "resolution failed for key '{key}': {reason}")
            }
        }
    }
}

impl std::error::Error for LookupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.reason() {
            FailureReason::Resolver(err) => Some(err),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// External collaborator that turns a key into a record.
///
/// Called on a worker thread, so it may block.
pub trait Resolver<R>: Send + Sync + 'static {
    fn resolve(&self, key: &str) -> Result<R, ResolveError>;
}

impl<R, F> Resolver<R> for F
where
    F: Fn(&str) -> Result<R, ResolveError> + Send + Sync + 'static,
{
    fn resolve(&self, key: &str) -> Result<R, ResolveError> {
        self(key)
    }
}

// ---------------------------------------------------------------------------
// Events and state
// ---------------------------------------------------------------------------

/// Notification delivered to lookup subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupEvent<R> {
    Resolved { key: String, record: R },
    Failed(LookupError),
}

impl<R> LookupEvent<R> {
    /// The key this event settles.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Resolved { key, .. } => key,
            Self::Failed(err) => err.key(),
        }
    }

    #[must_use]
    pub fn record(&self) -> Option<&R> {
        match self {
            Self::Resolved { record, .. } => Some(record),
            Self::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Phase of the lookup state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupState {
    Idle,
    Resolving { key: String, generation: u64 },
    Resolved { key: String },
    Failed { key: String },
}

/// Counters describing lookup activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupStats {
    /// Resolutions started by `set_key`.
    pub started: u64,
    /// `Resolved` events delivered.
    pub resolved: u64,
    /// `Failed` events delivered.
    pub failed: u64,
    /// Completions dropped because a newer key superseded them.
    pub discarded: u64,
}

/// Worker result tagged with the generation it was started for.
struct Completion<R> {
    generation: u64,
    key: String,
    outcome: Result<R, FailureReason>,
}

struct InFlight {
    key: String,
    generation: u64,
    started: Instant,
}

// ---------------------------------------------------------------------------
// KeyedLookup
// ---------------------------------------------------------------------------

/// Resolves a record for the most recently set key.
///
/// `KeyedLookup` is `!Send`: it belongs to one owning context, which drives it
/// through `set_key`, `poll`/`wait`, and `dispose`.
pub struct KeyedLookup<R> {
    resolver: Arc<dyn Resolver<R>>,
    config: LookupConfig,
    generation: u64,
    key: Option<String>,
    state: LookupState,
    in_flight: Option<InFlight>,
    sender: Sender<Completion<R>>,
    receiver: Receiver<Completion<R>>,
    subscribers: RefCell<SubscriberList<LookupEvent<R>>>,
    /// Settled outcome for the current generation, replayed to new subscribers.
    settled: Option<(u64, Rc<LookupEvent<R>>)>,
    /// Most recent `Resolved` event; failures leave it in place.
    last_resolved: Option<Rc<LookupEvent<R>>>,
    stats: LookupStats,
    disposed: bool,
}

impl<R> fmt::Debug for KeyedLookup<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLookup")
            .field("generation", &self.generation)
            .field("state", &self.state)
            .field("config", &self.config)
            .field("stats", &self.stats)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl<R: Send + 'static> KeyedLookup<R> {
    /// Create a lookup with the default configuration.
    pub fn new(resolver: impl Resolver<R>) -> Self {
        Self::with_config(resolver, LookupConfig::default())
    }

    pub fn with_config(resolver: impl Resolver<R>, config: LookupConfig) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            resolver: Arc::new(resolver),
            config,
            generation: 0,
            key: None,
            state: LookupState::Idle,
            in_flight: None,
            sender,
            receiver,
            subscribers: RefCell::new(SubscriberList::new()),
            settled: None,
            last_resolved: None,
            stats: LookupStats::default(),
            disposed: false,
        }
    }

    /// Switch to `key` and start resolving it.
    ///
    /// Any resolution still running for an earlier key is abandoned: its
    /// result will be discarded when it arrives. Setting the same key again
    /// starts a fresh resolution.
    ///
    /// Abandoning a resolution, by a newer key or by the resolve timeout,
    /// does not stop its worker thread; the thread runs until the resolver
    /// returns. A resolver that can hang should enforce its own deadline,
    /// or every `set_key` against it leaves one more thread behind.
    pub fn set_key(&mut self, key: impl Into<String>) {
        let key = key.into();
        if self.disposed {
            debug!(key = %key, "set_key ignored: lookup disposed");
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        if let Some(prev) = self.in_flight.take() {
            debug!(
                superseded = %prev.key,
                superseded_generation = prev.generation,
                key = %key,
                generation,
                "abandoning in-flight resolution"
            );
        }

        self.key = Some(key.clone());
        self.settled = None;
        self.state = LookupState::Resolving {
            key: key.clone(),
            generation,
        };
        self.in_flight = Some(InFlight {
            key: key.clone(),
            generation,
            started: Instant::now(),
        });
        self.stats.started += 1;

        let resolver = Arc::clone(&self.resolver);
        let sender = self.sender.clone();
        let worker_key = key.clone();
        let spawned = thread::Builder::new()
            .name("tally-resolve".to_string())
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| resolver.resolve(&worker_key)));
                let outcome = match result {
                    Ok(Ok(record)) => Ok(record),
                    Ok(Err(err)) => Err(FailureReason::Resolver(err)),
                    Err(payload) => Err(FailureReason::Panicked(panic_message(payload.as_ref()))),
                };
                // The owner may be gone; nothing to report to then.
                let _ = sender.send(Completion {
                    generation,
                    key: worker_key,
                    outcome,
                });
            });

        match spawned {
            Ok(_) => debug!(key = %key, generation, "resolution started"),
            Err(err) => {
                warn!(key = %key, error = %err, "failed to spawn resolver thread");
                self.settle(Completion {
                    generation,
                    key,
                    outcome: Err(FailureReason::Spawn(err.to_string())),
                });
            }
        }
    }

    /// Deliver any completed resolution on the calling thread.
    ///
    /// Stale completions are discarded. If the current resolution has
    /// exceeded its timeout, a `TimedOut` failure is delivered instead.
    /// Returns the number of events delivered (0 or 1).
    pub fn poll(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            if self.accept(completion) {
                delivered += 1;
            }
        }
        if self.check_timeout(Instant::now()) {
            delivered += 1;
        }
        delivered
    }

    /// Block for up to `timeout` until the current key settles, delivering
    /// the outcome on the calling thread.
    ///
    /// Returns immediately with 0 when nothing is in flight.
    pub fn wait(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let delivered = self.poll();
            if delivered > 0 || self.in_flight.is_none() {
                return delivered;
            }
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            let slice = (deadline - now).min(WAIT_SLICE);
            match self.receiver.recv_timeout(slice) {
                Ok(completion) => {
                    if self.accept(completion) {
                        return 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return 0,
            }
        }
    }

    /// Register a callback for settled outcomes.
    ///
    /// If the current key has already settled, the callback is invoked
    /// immediately with that outcome. Outcomes of earlier keys are never
    /// replayed.
    pub fn subscribe(&self, callback: impl Fn(&LookupEvent<R>) + 'static) -> Subscription {
        let (guard, replay) = self.subscribers.borrow_mut().register(callback);
        if let (Some(cb), Some((generation, event))) = (replay, &self.settled)
            && *generation == self.generation
        {
            cb(&**event);
        }
        guard
    }

    /// Most recently requested key.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Generation of the most recent `set_key` call (0 before the first).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn state(&self) -> &LookupState {
        &self.state
    }

    #[must_use]
    pub fn is_resolving(&self) -> bool {
        self.in_flight.is_some()
    }

    /// The most recently resolved record, kept across later failures.
    #[must_use]
    pub fn latest_record(&self) -> Option<&R> {
        self.last_resolved.as_deref().and_then(LookupEvent::record)
    }

    #[must_use]
    pub fn stats(&self) -> LookupStats {
        self.stats
    }

    #[must_use]
    pub fn config(&self) -> &LookupConfig {
        &self.config
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Unregister all subscribers and abandon any in-flight resolution.
    ///
    /// Idempotent. Late worker results are dropped with the channel.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.generation += 1;
        self.in_flight = None;
        self.settled = None;
        self.state = LookupState::Idle;
        self.subscribers.borrow_mut().close();
        debug!(generation = self.generation, "lookup disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Deliver `completion` if it belongs to the unsettled current key.
    fn accept(&mut self, completion: Completion<R>) -> bool {
        let current = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.generation == completion.generation);
        if !current {
            self.stats.discarded += 1;
            trace!(
                key = %completion.key,
                generation = completion.generation,
                current_generation = self.generation,
                "discarding stale resolution"
            );
            return false;
        }
        if let Some(flight) = &self.in_flight {
            trace!(
                key = %completion.key,
                elapsed_ms = flight.started.elapsed().as_millis() as u64,
                "resolution completed"
            );
        }
        self.settle(completion);
        true
    }

    /// Fail the current key if it has been resolving for too long.
    fn check_timeout(&mut self, now: Instant) -> bool {
        let Some(limit) = self.config.resolve_timeout else {
            return false;
        };
        let Some(flight) = &self.in_flight else {
            return false;
        };
        if now.saturating_duration_since(flight.started) < limit {
            return false;
        }
        warn!(
            key = %flight.key,
            generation = flight.generation,
            timeout_ms = limit.as_millis() as u64,
            "resolution timed out"
        );
        let completion = Completion {
            generation: flight.generation,
            key: flight.key.clone(),
            outcome: Err(FailureReason::TimedOut(limit)),
        };
        self.settle(completion);
        true
    }

    /// Record the outcome for the current generation and notify subscribers.
    fn settle(&mut self, completion: Completion<R>) {
        let Completion {
            generation,
            key,
            outcome,
        } = completion;
        self.in_flight = None;

        let event = match outcome {
            Ok(record) => {
                self.stats.resolved += 1;
                self.state = LookupState::Resolved { key: key.clone() };
                LookupEvent::Resolved { key, record }
            }
            Err(reason) => {
                self.stats.failed += 1;
                debug!(key = %key, reason = %reason, "resolution failed");
                self.state = LookupState::Failed { key: key.clone() };
                LookupEvent::Failed(LookupError::ResolutionFailed { key, reason })
            }
        };
        let event = Rc::new(event);
        if !event.is_failure() {
            self.last_resolved = Some(Rc::clone(&event));
        }
        self.settled = Some((generation, Rc::clone(&event)));
        self.publish(&event);
    }

    fn publish(&self, event: &LookupEvent<R>) {
        let _span = debug_span!("lookup_publish", key = event.key()).entered();
        let callbacks = self.subscribers.borrow_mut().snapshot();
        for weak in &callbacks {
            if self.subscribers.borrow().is_closed() {
                return;
            }
            if let Some(cb) = weak.upgrade() {
                cb(event);
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const SETTLE: Duration = Duration::from_secs(5);

    /// Resolver whose answers are released one key at a time by the test.
    struct Gated {
        gates: Mutex<HashMap<String, Receiver<Result<String, ResolveError>>>>,
    }

    impl Gated {
        fn new(keys: &[&str]) -> (Self, HashMap<String, Sender<Result<String, ResolveError>>>) {
            let mut gates = HashMap::new();
            let mut releases = HashMap::new();
            for key in keys {
                let (tx, rx) = mpsc::channel();
                gates.insert((*key).to_string(), rx);
                releases.insert((*key).to_string(), tx);
            }
            (
                Self {
                    gates: Mutex::new(gates),
                },
                releases,
            )
        }
    }

    impl Resolver<String> for Gated {
        fn resolve(&self, key: &str) -> Result<String, ResolveError> {
            let gate = self.gates.lock().unwrap().remove(key);
            match gate {
                Some(rx) => rx
                    .recv()
                    .unwrap_or_else(|_| Err(ResolveError::new("gate dropped"))),
                None => Err(ResolveError::new(format!("unknown key {key}"))),
            }
        }
    }

    fn record_events(
        lookup: &KeyedLookup<String>,
    ) -> (Rc<RefCell<Vec<LookupEvent<String>>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let sub = lookup.subscribe(move |e| seen_clone.borrow_mut().push(e.clone()));
        (seen, sub)
    }

    fn drain_until(lookup: &mut KeyedLookup<String>, done: impl Fn(&KeyedLookup<String>) -> bool) {
        let deadline = Instant::now() + SETTLE;
        while !done(lookup) {
            assert!(Instant::now() < deadline, "lookup did not reach expected state");
            lookup.poll();
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn resolves_current_key() {
        let mut lookup = KeyedLookup::new(|key: &str| Ok::<_, ResolveError>(key.to_uppercase()));
        let (seen, _sub) = record_events(&lookup);
        assert_eq!(lookup.state(), &LookupState::Idle);

        lookup.set_key("abc");
        assert!(lookup.is_resolving());
        assert_eq!(lookup.wait(SETTLE), 1);

        assert_eq!(
            *seen.borrow(),
            vec![LookupEvent::Resolved {
                key: "abc".to_string(),
                record: "ABC".to_string()
            }]
        );
        assert_eq!(lookup.state(), &LookupState::Resolved { key: "abc".into() });
        assert_eq!(lookup.latest_record().map(String::as_str), Some("ABC"));
    }

    #[test]
    fn superseded_key_is_never_delivered() {
        let (resolver, releases) = Gated::new(&["a", "b"]);
        let mut lookup = KeyedLookup::new(resolver);
        let (seen, _sub) = record_events(&lookup);

        lookup.set_key("a");
        lookup.set_key("b");
        assert_eq!(lookup.generation(), 2);

        releases["b"].send(Ok("record-b".to_string())).unwrap();
        assert_eq!(lookup.wait(SETTLE), 1);

        releases["a"].send(Ok("record-a".to_string())).unwrap();
        drain_until(&mut lookup, |l| l.stats().discarded == 1);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].key(), "b");
        assert_eq!(seen[0].record().map(String::as_str), Some("record-b"));
        assert_eq!(lookup.latest_record().map(String::as_str), Some("record-b"));
    }

    #[test]
    fn failure_delivered_once_without_record() {
        let mut lookup =
            KeyedLookup::new(|_: &str| Err::<String, _>(ResolveError::new("no such user")));
        let (seen, _sub) = record_events(&lookup);

        lookup.set_key("x");
        assert_eq!(lookup.wait(SETTLE), 1);
        assert_eq!(lookup.poll(), 0);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].record().is_none());
        match &seen[0] {
            LookupEvent::Failed(err) => {
                assert_eq!(err.key(), "x");
                assert_eq!(
                    err.reason(),
                    &FailureReason::Resolver(ResolveError::new("no such user"))
                );
                assert_eq!(
                    err.to_string(),
                    "resolution failed for key 'x': resolver error: no such user"
                );
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(lookup.state(), &LookupState::Failed { key: "x".into() });
    }

    #[test]
    fn failure_keeps_previous_record() {
        let mut lookup = KeyedLookup::new(|key: &str| {
            if key == "bad" {
                Err(ResolveError::new("boom"))
            } else {
                Ok(format!("rec-{key}"))
            }
        });
        lookup.set_key("good");
        lookup.wait(SETTLE);
        lookup.set_key("bad");
        lookup.wait(SETTLE);

        assert_eq!(lookup.latest_record().map(String::as_str), Some("rec-good"));
        assert_eq!(lookup.stats().resolved, 1);
        assert_eq!(lookup.stats().failed, 1);
    }

    #[test]
    fn timeout_fails_and_discards_late_result() {
        let (resolver, releases) = Gated::new(&["slow"]);
        let config = LookupConfig::default().with_timeout(Duration::from_millis(20));
        let mut lookup = KeyedLookup::with_config(resolver, config);
        let (seen, _sub) = record_events(&lookup);

        lookup.set_key("slow");
        assert_eq!(lookup.wait(SETTLE), 1);
        assert!(matches!(
            seen.borrow()[0],
            LookupEvent::Failed(LookupError::ResolutionFailed {
                reason: FailureReason::TimedOut(_),
                ..
            })
        ));

        releases["slow"].send(Ok("late".to_string())).unwrap();
        drain_until(&mut lookup, |l| l.stats().discarded == 1);
        assert_eq!(seen.borrow().len(), 1);
        assert!(lookup.latest_record().is_none());
    }

    #[test]
    fn panicking_resolver_reports_failure() {
        let mut lookup = KeyedLookup::new(|_: &str| -> Result<String, ResolveError> {
            panic!("resolver exploded")
        });
        let (seen, _sub) = record_events(&lookup);
        lookup.set_key("p");
        assert_eq!(lookup.wait(SETTLE), 1);
        match &seen.borrow()[0] {
            LookupEvent::Failed(err) => {
                assert_eq!(err.reason(), &FailureReason::Panicked("resolver exploded".into()));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn late_subscriber_gets_current_outcome_only() {
        let (resolver, releases) = Gated::new(&["a", "b"]);
        let mut lookup = KeyedLookup::new(resolver);
        lookup.set_key("a");
        releases["a"].send(Ok("record-a".to_string())).unwrap();
        lookup.wait(SETTLE);

        let (seen, _sub) = record_events(&lookup);
        assert_eq!(seen.borrow().len(), 1);

        lookup.set_key("b");
        let (late, _late_sub) = record_events(&lookup);
        assert!(late.borrow().is_empty());

        releases["b"].send(Ok("record-b".to_string())).unwrap();
        lookup.wait(SETTLE);
        assert_eq!(late.borrow().len(), 1);
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut lookup = KeyedLookup::new(|key: &str| Ok::<_, ResolveError>(key.to_string()));
        let (seen, sub) = record_events(&lookup);
        lookup.set_key("one");
        lookup.wait(SETTLE);
        sub.unsubscribe();
        lookup.set_key("two");
        lookup.wait(SETTLE);
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn unsubscribe_from_earlier_callback_skips_rest_of_publish() {
        let mut lookup = KeyedLookup::new(|key: &str| Ok::<_, ResolveError>(key.to_string()));
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::default();
        let slot = Rc::clone(&victim);
        let _first = lookup.subscribe(move |_| {
            slot.borrow_mut().take();
        });
        let (seen, sub) = record_events(&lookup);
        *victim.borrow_mut() = Some(sub);

        lookup.set_key("one");
        assert_eq!(lookup.wait(SETTLE), 1);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn dispose_silences_everything() {
        let (resolver, releases) = Gated::new(&["a"]);
        let mut lookup = KeyedLookup::new(resolver);
        let (seen, _sub) = record_events(&lookup);
        lookup.set_key("a");
        lookup.dispose();
        assert_eq!(lookup.subscriber_count(), 0);

        releases["a"].send(Ok("record-a".to_string())).unwrap();
        drain_until(&mut lookup, |l| l.stats().discarded == 1);
        lookup.set_key("ignored");
        assert_eq!(lookup.stats().started, 1);
        assert!(seen.borrow().is_empty());
        assert!(lookup.is_disposed());
    }

    #[test]
    fn wait_without_work_returns_immediately() {
        let mut lookup = KeyedLookup::new(|key: &str| Ok::<_, ResolveError>(key.to_string()));
        let start = Instant::now();
        assert_eq!(lookup.wait(Duration::from_secs(2)), 0);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn resolve_error_is_error_source() {
        let err = LookupError::ResolutionFailed {
            key: "k".into(),
            reason: FailureReason::Resolver(ResolveError::new("inner")),
        };
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("inner"));
    }
}

#![forbid(unsafe_code)]

//! Host lifecycle for a counter and a lookup.
//!
//! A [`Session`] is created by the owning context (a window, a request, a
//! CLI run) with an initial count and a resolver, driven from that context,
//! and disposed on teardown. Disposal is idempotent and also happens on drop;
//! no callback fires afterwards.

use tracing::{debug, info_span};

use crate::config::SessionConfig;
use crate::reactive::{KeyedLookup, ObservableCounter, Resolver};

/// A counter and a keyed lookup sharing one owning context.
#[derive(Debug)]
pub struct Session<R: Send + 'static> {
    counter: ObservableCounter,
    lookup: KeyedLookup<R>,
    disposed: bool,
}

impl<R: Send + 'static> Session<R> {
    /// Create a session with a counter starting at `initial` and a lookup
    /// using the default configuration.
    pub fn new(initial: i64, resolver: impl Resolver<R>) -> Self {
        Self::from_config(
            &SessionConfig::default().with_initial_count(initial),
            resolver,
        )
    }

    pub fn from_config(config: &SessionConfig, resolver: impl Resolver<R>) -> Self {
        let _span = info_span!("session_new", initial = config.initial_count).entered();
        debug!(lookup = ?config.lookup, "creating session");
        Self {
            counter: ObservableCounter::new(config.initial_count),
            lookup: KeyedLookup::with_config(resolver, config.lookup.clone()),
            disposed: false,
        }
    }

    #[must_use]
    pub fn counter(&self) -> &ObservableCounter {
        &self.counter
    }

    #[must_use]
    pub fn lookup(&self) -> &KeyedLookup<R> {
        &self.lookup
    }

    pub fn lookup_mut(&mut self) -> &mut KeyedLookup<R> {
        &mut self.lookup
    }

    pub fn increment(&self) -> i64 {
        self.counter.increment()
    }

    pub fn reset(&self) {
        self.counter.reset();
    }

    pub fn set_key(&mut self, key: impl Into<String>) {
        self.lookup.set_key(key);
    }

    /// Pump pending lookup results. See [`KeyedLookup::poll`].
    pub fn poll(&mut self) -> usize {
        self.lookup.poll()
    }

    /// Unregister every subscriber and abandon pending lookups.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.counter.dispose();
        self.lookup.dispose();
        debug!(count = self.counter.get(), "session disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl<R: Send + 'static> Drop for Session<R> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LookupConfig;
    use crate::reactive::ResolveError;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;

    fn echo(key: &str) -> Result<String, ResolveError> {
        Ok(format!("user:{key}"))
    }

    #[test]
    fn counter_starts_at_initial() {
        let session = Session::new(5, echo);
        assert_eq!(session.counter().get(), 5);
        assert_eq!(session.increment(), 6);
        session.reset();
        assert_eq!(session.counter().get(), 0);
    }

    #[test]
    fn from_config_applies_lookup_settings() {
        let config = SessionConfig::default()
            .with_initial_count(-3)
            .with_lookup(LookupConfig::default().without_timeout());
        let session = Session::from_config(&config, echo);
        assert_eq!(session.counter().get(), -3);
        assert_eq!(session.lookup().config().resolve_timeout, None);
    }

    #[test]
    fn lookup_failure_leaves_counter_untouched() {
        let mut session = Session::new(2, |_: &str| {
            Err::<String, _>(ResolveError::new("offline"))
        });
        session.increment();
        session.set_key("u1");
        assert_eq!(session.lookup_mut().wait(Duration::from_secs(5)), 1);
        assert_eq!(session.counter().get(), 3);
        assert_eq!(session.lookup().stats().failed, 1);
    }

    #[test]
    fn dispose_unregisters_all_subscribers() {
        let mut session = Session::new(0, echo);
        let counter_calls = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&counter_calls);
        let _cs = session.counter().subscribe(move |_| c.set(c.get() + 1));
        let lookup_calls = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&lookup_calls);
        let _ls = session
            .lookup()
            .subscribe(move |e| l.borrow_mut().push(e.key().to_string()));

        session.dispose();
        session.dispose();
        assert!(session.is_disposed());

        session.increment();
        session.set_key("late");
        assert_eq!(session.poll(), 0);
        assert_eq!(counter_calls.get(), 1);
        assert!(lookup_calls.borrow().is_empty());
        assert_eq!(session.lookup().subscriber_count(), 0);
    }

    #[test]
    fn drop_disposes_shared_counter() {
        let session = Session::new(0, echo);
        let counter = session.counter().clone();
        let calls = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&calls);
        let _sub = counter.subscribe(move |_| c.set(c.get() + 1));

        drop(session);
        counter.increment();
        assert_eq!(calls.get(), 1);
    }
}

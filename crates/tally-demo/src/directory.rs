#![forbid(unsafe_code)]

//! In-memory user directory used as the demo's lookup resolver.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tally_runtime::{ResolveError, Resolver};
use tracing::trace;

/// A user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub first_name: String,
    pub last_name: String,
    pub age: u32,
}

impl User {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>, age: u32) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            age,
        }
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Fixed set of users keyed by id, answered after an artificial delay.
///
/// Earlier keys in a burst can finish after later ones when `stagger` is set,
/// which is what the demo uses to show superseded lookups being dropped.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: HashMap<String, User>,
    latency: Duration,
    stagger: HashMap<String, Duration>,
}

impl UserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory preloaded with a few users (`1`, `2`, `3`, `42`).
    #[must_use]
    pub fn sample() -> Self {
        Self::new()
            .with_user("1", User::new("Tom", "Brady", 44))
            .with_user("2", User::new("Grace", "Hopper", 85))
            .with_user("3", User::new("Alan", "Turing", 41))
            .with_user("42", User::new("Ada", "Lovelace", 36))
    }

    #[must_use]
    pub fn with_user(mut self, id: impl Into<String>, user: User) -> Self {
        self.users.insert(id.into(), user);
        self
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Extra delay applied only to `id`.
    #[must_use]
    pub fn with_extra_delay(mut self, id: impl Into<String>, delay: Duration) -> Self {
        self.stagger.insert(id.into(), delay);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Resolver<User> for UserDirectory {
    fn resolve(&self, key: &str) -> Result<User, ResolveError> {
        let delay = self.latency + self.stagger.get(key).copied().unwrap_or_default();
        if !delay.is_zero() {
            trace!(key, delay_ms = delay.as_millis() as u64, "simulating directory latency");
            thread::sleep(delay);
        }
        self.users
            .get(key)
            .cloned()
            .ok_or_else(|| ResolveError::new(format!("no user with id '{key}'")))
    }
}

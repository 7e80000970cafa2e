#![forbid(unsafe_code)]

//! Observable value wrapper with change notification and version tracking.
//!
//! # Design
//!
//! [`Observable<T>`] wraps a value of type `T` in shared, reference-counted
//! storage (`Rc<RefCell<..>>`). Writes notify all live subscribers in
//! registration order. Whether an equal write notifies depends on the
//! [`NotifyPolicy`] chosen at construction.
//!
//! # Performance
//!
//! | Operation     | Complexity                 |
//! |---------------|----------------------------|
//! | `get()`       | O(1)                       |
//! | `set()`       | O(S) where S = subscribers |
//! | `subscribe()` | O(1) amortized             |
//!
//! # Failure Modes
//!
//! - **Re-entrant set**: A write from within a subscriber callback updates
//!   the value at once but does not notify on its own. The running cycle
//!   notices the version moved, abandons the stale value, and restarts from
//!   the first subscriber with the latest one. Every subscriber's last
//!   observed value is therefore the current value.
//! - **Mid-cycle teardown**: Each callback is upgraded from its `Weak` just
//!   before it runs, and the cycle stops as soon as the observable is
//!   disposed, so dropped or disposed subscribers never see the rest of it.
//! - **Subscriber leak**: `Subscription` guards kept forever keep their
//!   callbacks alive. Dead weak references are pruned lazily during notify.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// A subscriber callback stored as a strong `Rc` by its [`Subscription`],
/// handed out as `Weak` to the notifier.
type CallbackRc<T> = Rc<dyn Fn(&T)>;
type CallbackWeak<T> = Weak<dyn Fn(&T)>;

/// When a write produces a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyPolicy {
    /// Only writes that change the value (by `PartialEq`) notify.
    #[default]
    OnChange,
    /// Every write notifies, including writes of an equal value.
    Always,
}

/// Ordered list of weak subscriber callbacks.
///
/// Shared by [`Observable`] and [`KeyedLookup`](super::KeyedLookup). Once
/// closed, the list drops every entry and refuses new ones.
pub(crate) struct SubscriberList<T> {
    entries: Vec<CallbackWeak<T>>,
    closed: bool,
}

impl<T: 'static> SubscriberList<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            closed: false,
        }
    }

    /// Register a callback. Returns the guard and, unless the list is
    /// closed, a strong handle the caller may use for an immediate replay.
    pub(crate) fn register(
        &mut self,
        callback: impl Fn(&T) + 'static,
    ) -> (Subscription, Option<CallbackRc<T>>) {
        if self.closed {
            return (Subscription::inert(), None);
        }
        let strong: CallbackRc<T> = Rc::new(callback);
        self.entries.push(Rc::downgrade(&strong));
        // `Rc<dyn Fn(&T)>` cannot coerce to `Rc<dyn Any>`, so box the Rc itself.
        let guard = Subscription {
            _guard: Box::new(Rc::clone(&strong)),
        };
        (guard, Some(strong))
    }

    /// Prune dead entries and return weak handles to the rest, in order.
    ///
    /// Callers upgrade each handle right before invoking it, so a callback
    /// unsubscribed earlier in the same cycle is skipped.
    pub(crate) fn snapshot(&mut self) -> Vec<CallbackWeak<T>> {
        self.entries.retain(|w| w.strong_count() > 0);
        self.entries.clone()
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.entries.clear();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Shared interior for [`Observable<T>`].
struct ObservableInner<T> {
    value: T,
    version: u64,
    policy: NotifyPolicy,
    subscribers: SubscriberList<T>,
    /// Keeps a derived observable attached to its source.
    upstream: Option<Subscription>,
    /// Set while a notify cycle runs; nested writes defer to that cycle.
    notifying: bool,
}

/// A shared, version-tracked value with change notification.
///
/// Cloning an `Observable` creates a new handle to the **same** inner state:
/// both handles see the same value and share subscribers.
///
/// # Invariants
///
/// 1. `version` increments by exactly 1 on each write that notifies.
/// 2. Under [`NotifyPolicy::OnChange`], `set(v)` where `v == current` is a no-op.
/// 3. Subscribers are notified in registration order.
/// 4. After [`dispose`](Self::dispose) no callback is ever invoked again.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("policy", &inner.policy)
            .field("subscriber_count", &inner.subscribers.entries.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create an observable that notifies only on value changes.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_policy(value, NotifyPolicy::OnChange)
    }

    /// Create an observable that notifies on every write.
    #[must_use]
    pub fn eager(value: T) -> Self {
        Self::with_policy(value, NotifyPolicy::Always)
    }

    /// Create an observable with an explicit notification policy.
    #[must_use]
    pub fn with_policy(value: T, policy: NotifyPolicy) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                policy,
                subscribers: SubscriberList::new(),
                upstream: None,
                notifying: false,
            })),
        }
    }

    /// Get a clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Access the current value by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Write a new value and notify according to the policy.
    ///
    /// Called from within a subscriber callback, the write takes effect
    /// immediately and the running cycle restarts with it.
    pub fn set(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.policy == NotifyPolicy::OnChange && inner.value == value {
                return;
            }
            inner.value = value;
            inner.version += 1;
        }
        self.notify();
    }

    /// Modify the value in place via a closure, then notify according to the
    /// policy (under `OnChange`, only if the value differs from a snapshot).
    ///
    /// Re-entrant calls behave as for [`set`](Self::set).
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let notify = {
            let mut inner = self.inner.borrow_mut();
            let policy = inner.policy;
            match policy {
                NotifyPolicy::Always => {
                    f(&mut inner.value);
                    true
                }
                NotifyPolicy::OnChange => {
                    let old = inner.value.clone();
                    f(&mut inner.value);
                    inner.value != old
                }
            }
        };
        if notify {
            self.inner.borrow_mut().version += 1;
            self.notify();
        }
    }

    /// Subscribe to future notifications. The current value is **not**
    /// delivered; see [`observe`](Self::observe) for that.
    ///
    /// Dropping the returned guard unsubscribes the callback.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.inner.borrow_mut().subscribers.register(callback).0
    }

    /// Subscribe and immediately receive the current value, then every
    /// subsequent notification.
    pub fn observe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let (guard, replay) = self.inner.borrow_mut().subscribers.register(callback);
        if let Some(cb) = replay {
            let value = self.get();
            cb(&value);
        }
        guard
    }

    /// Derive an observable whose value is `map(source)` and which tracks
    /// every notification of `self`.
    ///
    /// The derived observable uses the `OnChange` policy, so repeated source
    /// writes mapping to the same output are coalesced.
    pub fn map<U>(&self, map: impl Fn(&T) -> U + 'static) -> Observable<U>
    where
        U: Clone + PartialEq + 'static,
    {
        let derived = Observable::new(self.with(|v| map(v)));
        let weak = Rc::downgrade(&derived.inner);
        let sub = self.subscribe(move |value| {
            if let Some(strong) = weak.upgrade() {
                Observable { inner: strong }.set(map(value));
            }
        });
        derived.inner.borrow_mut().upstream = Some(sub);
        derived
    }

    /// Current version number.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Number of registered subscribers (including dead ones not yet pruned).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    /// Drop every subscriber and detach from any upstream source.
    ///
    /// The value stays readable and writable; no callback runs again.
    pub fn dispose(&self) {
        let upstream = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.close();
            inner.upstream.take()
        };
        drop(upstream);
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.borrow().subscribers.is_closed()
    }

    /// Notify live subscribers and prune dead ones.
    ///
    /// No borrow is held while a callback runs. A write made by a callback
    /// bumps `version`; the loop sees that before the next callback and
    /// starts over with the newer value instead of delivering the stale one.
    fn notify(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.notifying {
                return;
            }
            inner.notifying = true;
        }
        let _cycle = NotifyCycle { inner: &self.inner };

        'cycle: loop {
            let (callbacks, value, version) = {
                let mut inner = self.inner.borrow_mut();
                if inner.subscribers.is_closed() {
                    return;
                }
                let callbacks = inner.subscribers.snapshot();
                (callbacks, inner.value.clone(), inner.version)
            };
            for weak in &callbacks {
                {
                    let inner = self.inner.borrow();
                    if inner.subscribers.is_closed() {
                        return;
                    }
                    if inner.version != version {
                        continue 'cycle;
                    }
                }
                if let Some(cb) = weak.upgrade() {
                    cb(&value);
                }
            }
            let settled = self.inner.borrow().version == version;
            if settled {
                return;
            }
        }
    }
}

/// Clears the `notifying` flag when a cycle ends, including by unwinding.
struct NotifyCycle<'a, T> {
    inner: &'a Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Drop for NotifyCycle<'_, T> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.notifying = false;
        }
    }
}

/// RAII guard for a subscriber callback.
///
/// Dropping the `Subscription` drops the strong `Rc` to the callback, so the
/// `Weak` held by the notifier fails to upgrade on the next notification.
pub struct Subscription {
    /// Type-erased strong reference keeping the callback alive.
    _guard: Box<dyn std::any::Any>,
}

impl Subscription {
    /// A guard that keeps nothing alive, returned after disposal.
    pub(crate) fn inert() -> Self {
        Self {
            _guard: Box::new(()),
        }
    }

    /// Explicitly unsubscribe. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

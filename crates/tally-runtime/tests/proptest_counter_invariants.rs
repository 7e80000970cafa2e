//! Property-based invariant tests for the observable counter.
//!
//! **ObservableCounter:**
//! 1. The last observed value equals the fold of the operations over the
//!    initial value (increment: +1, reset: 0).
//! 2. Every operation produces exactly one notification (no dedup).
//! 3. A late subscriber immediately sees the accumulated value.
//! 4. Version equals the number of operations.
//! 5. Dropping the subscription freezes the observed sequence.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use tally_runtime::ObservableCounter;

#[derive(Debug, Clone, Copy)]
enum Op {
    Increment,
    Reset,
}

// ── Strategies ────────────────────────────────────────────────────────────

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![3 => Just(Op::Increment), 1 => Just(Op::Reset)]
}

fn ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(op_strategy(), 0..=max_len)
}

fn fold(initial: i64, ops: &[Op]) -> i64 {
    ops.iter().fold(initial, |acc, op| match op {
        Op::Increment => acc.wrapping_add(1),
        Op::Reset => 0,
    })
}

fn apply(counter: &ObservableCounter, ops: &[Op]) {
    for op in ops {
        match op {
            Op::Increment => {
                counter.increment();
            }
            Op::Reset => counter.reset(),
        }
    }
}

fn observed(counter: &ObservableCounter) -> (Rc<RefCell<Vec<i64>>>, tally_runtime::Subscription) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = Rc::clone(&seen);
    let sub = counter.subscribe(move |v| seen_clone.borrow_mut().push(v));
    (seen, sub)
}

// ── Properties ────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn observed_value_matches_fold(initial in -1_000i64..=1_000, ops in ops_strategy(64)) {
        let counter = ObservableCounter::new(initial);
        let (seen, _sub) = observed(&counter);
        apply(&counter, &ops);

        let seen = seen.borrow();
        prop_assert_eq!(seen.len(), ops.len() + 1);
        prop_assert_eq!(seen[0], initial);
        prop_assert_eq!(*seen.last().unwrap(), fold(initial, &ops));
        prop_assert_eq!(counter.get(), fold(initial, &ops));
    }

    #[test]
    fn every_prefix_matches_fold(initial in any::<i64>(), ops in ops_strategy(32)) {
        let counter = ObservableCounter::new(initial);
        let (seen, _sub) = observed(&counter);
        apply(&counter, &ops);

        let seen = seen.borrow();
        for (i, value) in seen.iter().enumerate() {
            prop_assert_eq!(*value, fold(initial, &ops[..i]));
        }
    }

    #[test]
    fn late_subscriber_sees_accumulated(initial in -50i64..=50, ops in ops_strategy(32)) {
        let counter = ObservableCounter::new(initial);
        apply(&counter, &ops);
        let (seen, _sub) = observed(&counter);
        prop_assert_eq!(seen.borrow().clone(), vec![fold(initial, &ops)]);
    }

    #[test]
    fn version_counts_operations(ops in ops_strategy(64)) {
        let counter = ObservableCounter::new(0);
        apply(&counter, &ops);
        prop_assert_eq!(counter.version(), ops.len() as u64);
    }

    #[test]
    fn unsubscribe_freezes_observations(
        before in ops_strategy(16),
        after in ops_strategy(16),
    ) {
        let counter = ObservableCounter::new(0);
        let (seen, sub) = observed(&counter);
        apply(&counter, &before);
        let snapshot = seen.borrow().clone();

        sub.unsubscribe();
        apply(&counter, &after);
        prop_assert_eq!(seen.borrow().clone(), snapshot);
    }
}

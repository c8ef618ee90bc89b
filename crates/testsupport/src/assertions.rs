//! Assertion helpers for outcomes and replica state.

use crate::context::ReplicaContext;
use pretty_assertions::assert_eq;
use statemachine::{Command, Outcome, StateMachine, Status};

/// Assert that `outcome` has `status`, showing the whole outcome on failure.
pub fn assert_status(outcome: &Outcome, status: Status) {
    assert_eq!(
        outcome.status, status,
        "unexpected outcome {outcome}"
    );
}

/// Assert what a READ query for `key` returns on `machine`.
///
/// `None` means the key must be absent.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// let ctx = ReplicaContext::new().unwrap();
/// assert_read(&ctx, "missing", None);
/// ```
pub fn assert_read<S: StateMachine + ?Sized>(machine: &S, key: &str, expected: Option<&str>) {
    let outcome = machine.query(&Command::read(key).encode());
    match expected {
        Some(value) => assert_eq!(outcome, Outcome::ok_with(value), "READ {key}"),
        None => assert_status(&outcome, Status::NotFound),
    }
}

/// Assert that every replica holds identical storage contents and has
/// applied up to the same position.
pub fn assert_replicas_agree(replicas: &[ReplicaContext]) {
    let Some((first, rest)) = replicas.split_first() else {
        return;
    };
    let expected = first.dump().expect("dump replica 0");
    for (i, replica) in rest.iter().enumerate() {
        assert_eq!(
            replica.dump().expect("dump replica"),
            expected,
            "replica {} diverged from replica 0",
            i + 1
        );
        assert_eq!(
            replica.last_applied(),
            first.last_applied(),
            "replica {} applied position",
            i + 1
        );
    }
}

//! Property-based test generators using proptest.
//!
//! Keys come from a deliberately small alphabet so that generated sequences
//! collide on the same keys often enough to exercise overwrite, update and
//! delete interactions.

use bytes::Bytes;
use proptest::prelude::*;
use statemachine::Command;

/// Strategy for keys drawn from a small key space.
pub fn arb_key() -> impl Strategy<Value = String> {
    "[a-d]{1,2}"
}

/// Strategy for values, including the empty string.
pub fn arb_value() -> impl Strategy<Value = String> {
    "[a-z0-9]{0,8}"
}

/// Strategy for commands that go through the log.
pub fn arb_mutation() -> impl Strategy<Value = Command> {
    prop_oneof![
        3 => (arb_key(), arb_value()).prop_map(|(k, v)| Command::insert(k, v)),
        2 => (arb_key(), arb_value()).prop_map(|(k, v)| Command::update(k, v)),
        2 => arb_key().prop_map(Command::delete),
    ]
}

/// Strategy for every command kind.
///
/// # Example
///
/// ```
/// use proptest::prelude::*;
/// use testsupport::proptest_generators::arb_command;
///
/// proptest! {
///     #[test]
///     fn commands_encode(cmd in arb_command()) {
///         assert!(!cmd.encode().is_empty());
///     }
/// }
/// ```
pub fn arb_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        6 => arb_mutation(),
        1 => arb_key().prop_map(Command::read),
        1 => prop_oneof![Just(String::new()), arb_key()].prop_map(Command::scan),
        1 => Just(Command::Size),
    ]
}

/// Strategy for entry payloads: mostly valid commands, sometimes garbage.
pub fn arb_payload() -> impl Strategy<Value = Bytes> {
    prop_oneof![
        9 => arb_command().prop_map(|c| c.encode()),
        1 => prop::collection::vec(any::<u8>(), 0..16).prop_map(Bytes::from),
    ]
}

/// Strategy for a log of `1..max_len` payloads.
pub fn arb_log(max_len: usize) -> impl Strategy<Value = Vec<Bytes>> {
    prop::collection::vec(arb_payload(), 1..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_commands_decode_back(cmd in arb_command()) {
            prop_assert_eq!(Command::decode(&cmd.encode()).unwrap(), cmd);
        }

        #[test]
        fn prop_mutations_are_not_read_only(cmd in arb_mutation()) {
            prop_assert!(!cmd.is_read_only());
            prop_assert!(cmd.key().is_some_and(|k| !k.is_empty()));
        }

        #[test]
        fn prop_log_is_non_empty(log in arb_log(20)) {
            prop_assert!(!log.is_empty() && log.len() < 20);
        }
    }
}

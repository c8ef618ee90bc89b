//! Common command scripts and entry builders.

use statemachine::{Command, CommittedEntry};

/// A short session touching every mutating kind.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// assert_eq!(sample_session().len(), 7);
/// ```
pub fn sample_session() -> Vec<Command> {
    vec![
        Command::insert("user:1", "alice"),
        Command::insert("user:2", "bob"),
        Command::update("user:1", "alice@example.com"),
        Command::update("user:9", "nobody"),
        Command::delete("user:2"),
        Command::delete("user:2"),
        Command::insert("user:3", "carol"),
    ]
}

/// Storage contents after [`sample_session`].
pub fn sample_session_state() -> Vec<(String, String)> {
    vec![
        ("user:1".to_string(), "alice@example.com".to_string()),
        ("user:3".to_string(), "carol".to_string()),
    ]
}

/// Insert `count` keys named `key-000`, `key-001`, ... with their index as value.
pub fn numbered_inserts(count: usize) -> Vec<Command> {
    (0..count)
        .map(|i| Command::insert(format!("key-{i:03}"), i.to_string()))
        .collect()
}

/// Wrap commands as consecutive entries in one term, starting at `first_index`.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// let entries = entries_from(2, 10, &sample_session());
/// assert_eq!(entries[0].index, 10);
/// assert_eq!(entries.last().unwrap().index, 16);
/// assert!(entries.iter().all(|e| e.term == 2));
/// ```
pub fn entries_from(term: u64, first_index: u64, commands: &[Command]) -> Vec<CommittedEntry> {
    commands
        .iter()
        .zip(first_index..)
        .map(|(command, index)| CommittedEntry::command(term, index, command))
        .collect()
}

//! In-process consensus host.
//!
//! [`LocalHost`] stands in for the consensus engine: it owns the log,
//! assigns strictly increasing indexes, tracks the current term and leader,
//! and applies every committed entry to every replica in the same order.

use bytes::Bytes;
use statemachine::{Command, CommittedEntry, Outcome, Role, StateMachine};

/// Drives a group of replicas from a single totally-ordered log.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
/// use statemachine::{Command, Status};
///
/// let mut host = LocalHost::new(vec![ReplicaContext::new().unwrap()]);
/// let outcomes = host.submit(&Command::insert("k", "v"));
/// assert_eq!(outcomes[0].status, Status::Ok);
/// assert_eq!(host.query(0, &Command::read("k")).payload.as_deref(), Some("v"));
/// ```
pub struct LocalHost<S: StateMachine> {
    replicas: Vec<S>,
    log: Vec<CommittedEntry>,
    term: u64,
    next_index: u64,
    leader: usize,
}

impl<S: StateMachine> LocalHost<S> {
    /// Term 1, first index 1, replica 0 leading.
    pub fn new(replicas: Vec<S>) -> Self {
        Self {
            replicas,
            log: Vec::new(),
            term: 1,
            next_index: 1,
            leader: 0,
        }
    }

    /// Start numbering entries at `index`, as after a log prefix was compacted away.
    pub fn starting_at(mut self, index: u64) -> Self {
        self.next_index = index;
        self
    }

    /// Commit an encoded command and apply it everywhere.
    pub fn submit(&mut self, command: &Command) -> Vec<Outcome> {
        self.submit_raw(command.encode())
    }

    /// Commit an arbitrary payload and apply it everywhere.
    ///
    /// Returns one outcome per replica, in replica order.
    pub fn submit_raw(&mut self, payload: impl Into<Bytes>) -> Vec<Outcome> {
        let entry = CommittedEntry::new(self.term, self.next_index, payload);
        self.next_index += 1;
        let outcomes = self
            .replicas
            .iter()
            .enumerate()
            .map(|(i, replica)| replica.apply(&entry, self.role_of(i)))
            .collect();
        self.log.push(entry);
        outcomes
    }

    /// Move leadership to `replica` in a new term.
    pub fn elect(&mut self, replica: usize) {
        assert!(replica < self.replicas.len(), "no replica {replica}");
        self.leader = replica;
        self.term += 1;
    }

    /// Leave an index unused, as when an entry never reaches the state machine.
    pub fn skip_index(&mut self) {
        self.next_index += 1;
    }

    pub fn query(&self, replica: usize, command: &Command) -> Outcome {
        self.replicas[replica].query(&command.encode())
    }

    pub fn role_of(&self, replica: usize) -> Role {
        if replica == self.leader {
            Role::Leader
        } else {
            Role::Follower
        }
    }

    /// Add a replica and bring it up to date by replaying the whole log.
    pub fn join(&mut self, replica: S) -> usize {
        for entry in &self.log {
            replica.apply(entry, Role::Follower);
        }
        self.replicas.push(replica);
        self.replicas.len() - 1
    }

    pub fn replicas(&self) -> &[S] {
        &self.replicas
    }

    pub fn into_replicas(self) -> Vec<S> {
        self.replicas
    }

    pub fn replica(&self, index: usize) -> &S {
        &self.replicas[index]
    }

    pub fn log(&self) -> &[CommittedEntry] {
        &self.log
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn leader(&self) -> usize {
        self.leader
    }
}

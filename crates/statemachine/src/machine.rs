//! The replica state machine.
//!
//! A consensus host drives a [`KvStateMachine`] through two entry points:
//!
//! - [`apply`](KvStateMachine::apply) for committed log entries, in log order,
//!   from a single thread. Every call advances the consistency tracker exactly
//!   once, whatever the outcome.
//! - [`query`](KvStateMachine::query) for local reads, from any number of
//!   threads, concurrently with apply. Queries never touch the tracker.
//!
//! A machine starts life as a [`Bootstrap`], which resolves the latest
//! snapshot marker and attaches storage. Only then can entries be applied.

use crate::activity::{ActivityEvent, ActivitySender};
use crate::command::{Command, CommandKind};
use crate::outcome::Outcome;
use crate::snapshot::{SnapshotManager, SnapshotMarker};
use crate::tracker::ConsistencyTracker;
use bytes::Bytes;
use common::{KvError, KvResult, LogPosition, ReplicaConfig};
use std::sync::Arc;
use storage::KvStorage;
use tracing::{debug, error, info, warn};

/// Role of this replica when an entry is applied, as reported by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Leader,
    Follower,
}

/// A log entry the consensus host has committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedEntry {
    pub term: u64,
    pub index: u64,
    /// Encoded command envelope.
    pub payload: Bytes,
}

impl CommittedEntry {
    pub fn new(term: u64, index: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            term,
            index,
            payload: payload.into(),
        }
    }

    /// Build an entry carrying an encoded command.
    pub fn command(term: u64, index: u64, command: &Command) -> Self {
        Self::new(term, index, command.encode())
    }

    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.term, self.index)
    }
}

/// Contract between a consensus host and a replicated state machine.
pub trait StateMachine: Send + Sync {
    /// Apply a committed entry. Called in log order, never concurrently.
    fn apply(&self, entry: &CommittedEntry, role: Role) -> Outcome;

    /// Serve a read-only request against local state.
    fn query(&self, payload: &[u8]) -> Outcome;

    /// Position of the last applied entry, `None` before the first.
    fn last_applied(&self) -> Option<LogPosition>;
}

/// A state machine that has not been attached to storage yet.
#[derive(Debug)]
pub struct Bootstrap {
    snapshots: SnapshotManager,
    scan_limit: usize,
    activity_events: bool,
}

impl Bootstrap {
    pub fn new(config: &ReplicaConfig) -> KvResult<Self> {
        config.validate()?;
        Ok(Self {
            snapshots: SnapshotManager::from_config(config)?,
            scan_limit: config.scan_limit,
            activity_events: config.activity_events,
        })
    }

    /// Resolve the latest snapshot and attach `storage`.
    ///
    /// A corrupt snapshot marker is logged and ignored; the tracker then
    /// starts from "nothing applied" and the host replays the log from its
    /// beginning.
    pub fn initialize(self, storage: Arc<dyn KvStorage>) -> KvResult<KvStateMachine> {
        let start = resolve_start(&self.snapshots)?;
        info!(
            start = %start.map_or_else(|| "none".to_string(), |p| p.to_string()),
            snapshot_dir = %self.snapshots.dir().display(),
            "state machine initialised"
        );
        Ok(KvStateMachine {
            storage,
            tracker: ConsistencyTracker::new(start),
            snapshots: self.snapshots,
            scan_limit: self.scan_limit,
            activity_events: self.activity_events,
            activity: None,
        })
    }
}

fn resolve_start(snapshots: &SnapshotManager) -> KvResult<Option<LogPosition>> {
    let Some(marker) = snapshots.locate_latest()? else {
        return Ok(None);
    };
    match snapshots.load(&marker) {
        Ok(position) => Ok(Some(position)),
        Err(e @ KvError::CorruptSnapshot { .. }) => {
            warn!(error = %e, "ignoring corrupt snapshot, starting from an empty position");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Key-value state machine attached to a storage adapter.
pub struct KvStateMachine {
    storage: Arc<dyn KvStorage>,
    tracker: ConsistencyTracker,
    snapshots: SnapshotManager,
    scan_limit: usize,
    activity_events: bool,
    activity: Option<ActivitySender>,
}

impl KvStateMachine {
    /// Publish leader activity on `sender` as well as in the log.
    pub fn with_activity(mut self, sender: ActivitySender) -> Self {
        self.activity = Some(sender);
        self
    }

    pub fn storage(&self) -> &Arc<dyn KvStorage> {
        &self.storage
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn last_applied(&self) -> Option<LogPosition> {
        self.tracker.current()
    }

    /// Apply a committed entry and advance the tracker to its position.
    ///
    /// # Panics
    ///
    /// Panics if `entry.index` does not exceed the last applied index.
    pub fn apply(&self, entry: &CommittedEntry, role: Role) -> Outcome {
        let (kind, outcome) = match Command::decode(&entry.payload) {
            Ok(command) => {
                debug!(index = entry.index, term = entry.term, command = %command, "applying entry");
                (Some(command.kind()), self.apply_command(command))
            }
            Err(e) => {
                warn!(index = entry.index, term = entry.term, error = %e, "undecodable log entry");
                (None, Outcome::error(e.to_string()))
            }
        };

        let position = self.tracker.advance(entry.term, entry.index);

        if role == Role::Leader {
            self.publish(ActivityEvent::new(position, kind, outcome.status));
        }
        outcome
    }

    fn apply_command(&self, command: Command) -> Outcome {
        let kind = command.kind();
        let result = match command {
            Command::Insert { key, value } => self.storage.put(&key, &value).map(|()| Outcome::ok()),
            Command::Update { key, value } => self.storage.update(&key, &value).map(|existed| {
                if existed {
                    Outcome::ok()
                } else {
                    Outcome::not_found(no_record(&key))
                }
            }),
            Command::Delete { key } => self.storage.delete(&key).map(|_| Outcome::ok()),
            Command::Read { .. } | Command::Scan { .. } | Command::Size => {
                return Outcome::invalid(format!(
                    "{kind} is read-only and cannot be applied through the log"
                ));
            }
        };
        result.unwrap_or_else(|e| storage_failure(kind, e))
    }

    /// Serve a read-only request from local storage.
    pub fn query(&self, payload: &[u8]) -> Outcome {
        let command = match Command::decode(payload) {
            Ok(command) => command,
            Err(e) => {
                debug!(error = %e, "rejecting malformed query");
                return Outcome::invalid(e.to_string());
            }
        };
        debug!(command = %command, applied = ?self.tracker.current(), "serving query");

        let kind = command.kind();
        let result = match command {
            Command::Read { key } => self.storage.get(&key).map(|value| match value {
                Some(value) => Outcome::ok_with(value),
                None => Outcome::not_found(no_record(&key)),
            }),
            Command::Scan { start } => {
                self.storage
                    .scan(&start, self.scan_limit)
                    .map(|keys| match serde_json::to_string(&keys) {
                        Ok(listing) => Outcome::ok_with(listing),
                        Err(e) => Outcome::error(e.to_string()),
                    })
            }
            Command::Size => self.storage.len().map(|n| Outcome::ok_with(n.to_string())),
            Command::Insert { .. } | Command::Update { .. } | Command::Delete { .. } => {
                return Outcome::invalid(format!(
                    "{kind} mutates state and must be submitted through the log"
                ));
            }
        };
        result.unwrap_or_else(|e| storage_failure(kind, e))
    }

    /// Pin the current applied position in a new snapshot marker.
    ///
    /// Storage is synced first so the marker never points past durable data.
    pub fn take_snapshot(&self) -> KvResult<SnapshotMarker> {
        let Some(position) = self.tracker.current() else {
            return Err(KvError::Snapshot(
                "nothing has been applied since the last snapshot".into(),
            ));
        };
        self.storage.sync()?;
        let keys = self.storage.len()?;
        self.snapshots.save(position, keys)
    }

    /// Re-resolve the latest snapshot and reset the tracker to it.
    ///
    /// Used after the host installs a snapshot received from the leader.
    pub fn reinitialize(&self) -> KvResult<Option<LogPosition>> {
        let start = resolve_start(&self.snapshots)?;
        self.tracker.reset(start);
        info!(
            start = %start.map_or_else(|| "none".to_string(), |p| p.to_string()),
            "state machine reinitialised"
        );
        Ok(start)
    }

    fn publish(&self, event: ActivityEvent) {
        info!(event = %event, "leader applied entry");
        if !self.activity_events {
            return;
        }
        if let Some(tx) = &self.activity {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }
}

impl StateMachine for KvStateMachine {
    fn apply(&self, entry: &CommittedEntry, role: Role) -> Outcome {
        KvStateMachine::apply(self, entry, role)
    }

    fn query(&self, payload: &[u8]) -> Outcome {
        KvStateMachine::query(self, payload)
    }

    fn last_applied(&self) -> Option<LogPosition> {
        KvStateMachine::last_applied(self)
    }
}

fn no_record(key: &str) -> String {
    format!("no record for key: {key}")
}

fn storage_failure(kind: CommandKind, e: KvError) -> Outcome {
    error!(kind = %kind, error = %e, "storage operation failed");
    Outcome::error(e.to_string())
}

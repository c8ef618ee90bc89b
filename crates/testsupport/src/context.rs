//! Isolated replica contexts.
//!
//! Each context owns a temporary data directory, a storage adapter and a
//! state machine bootstrapped over it. Everything is removed on drop.

use common::{KvResult, LogPosition, ReplicaConfig};
use statemachine::{
    ActivitySender, Bootstrap, CommittedEntry, KvStateMachine, Outcome, Role, StateMachine,
};
use std::path::Path;
use std::sync::Arc;
use storage::{FileStorage, KvStorage, MemStorage};
use tempfile::TempDir;

/// A single replica with its own temporary data directory.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
/// use statemachine::{Command, CommittedEntry, Role};
///
/// let ctx = ReplicaContext::new().unwrap();
/// ctx.machine()
///     .apply(&CommittedEntry::command(1, 1, &Command::insert("a", "1")), Role::Leader);
/// assert_eq!(ctx.dump().unwrap(), vec![("a".to_string(), "1".to_string())]);
/// ```
pub struct ReplicaContext {
    config: ReplicaConfig,
    machine: KvStateMachine,
    durable: bool,
    // Dropped last so the directory outlives open files.
    _dir: TempDir,
}

impl ReplicaContext {
    /// Replica over in-memory storage.
    pub fn new() -> KvResult<Self> {
        Self::build(false, |b| b)
    }

    /// Replica over a `FileStorage` log inside the temporary directory.
    pub fn durable() -> KvResult<Self> {
        Self::build(true, |b| b)
    }

    /// Replica over in-memory storage with a custom scan limit.
    pub fn with_scan_limit(scan_limit: usize) -> KvResult<Self> {
        Self::build(false, |config| ReplicaConfig {
            scan_limit,
            ..config
        })
    }

    fn build(
        durable: bool,
        customize: impl FnOnce(ReplicaConfig) -> ReplicaConfig,
    ) -> KvResult<Self> {
        let dir = tempfile::tempdir()?;
        let config = customize(
            ReplicaConfig::builder()
                .data_dir(dir.path().to_path_buf())
                .build(),
        );
        let storage: Arc<dyn KvStorage> = if durable {
            Arc::new(FileStorage::open(config.storage_path())?)
        } else {
            Arc::new(MemStorage::new())
        };
        let machine = Bootstrap::new(&config)?.initialize(storage)?;
        Ok(Self {
            config,
            machine,
            durable,
            _dir: dir,
        })
    }

    /// Simulate a process restart: rebuild the state machine from the
    /// snapshot directory and the same storage contents.
    pub fn restart(self) -> KvResult<Self> {
        let Self {
            config,
            machine,
            durable,
            _dir,
        } = self;

        let storage = if durable {
            // Close the old log handle before reopening the file.
            drop(machine);
            Arc::new(FileStorage::open(config.storage_path())?) as Arc<dyn KvStorage>
        } else {
            Arc::clone(machine.storage())
        };
        let machine = Bootstrap::new(&config)?.initialize(storage)?;
        Ok(Self {
            config,
            machine,
            durable,
            _dir,
        })
    }

    /// Publish leader activity for this replica on `sender`.
    pub fn with_activity(self, sender: ActivitySender) -> Self {
        Self {
            machine: self.machine.with_activity(sender),
            ..self
        }
    }

    pub fn machine(&self) -> &KvStateMachine {
        &self.machine
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Every key-value pair in storage, in key order.
    pub fn dump(&self) -> KvResult<Vec<(String, String)>> {
        let storage = self.machine.storage();
        let mut pairs = Vec::new();
        for key in storage.scan("", usize::MAX)? {
            if let Some(value) = storage.get(&key)? {
                pairs.push((key, value));
            }
        }
        Ok(pairs)
    }
}

impl StateMachine for ReplicaContext {
    fn apply(&self, entry: &CommittedEntry, role: Role) -> Outcome {
        self.machine.apply(entry, role)
    }

    fn query(&self, payload: &[u8]) -> Outcome {
        self.machine.query(payload)
    }

    fn last_applied(&self) -> Option<LogPosition> {
        self.machine.last_applied()
    }
}

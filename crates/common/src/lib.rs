
use serde::{Deserialize, Serialize};
use std::{fmt, fs, io, path::Path, path::PathBuf};
use thiserror::Error;

/// Position of an entry in the replicated log.
/// Examples:
/// - `let first = LogPosition::new(1, 1);`
/// - `let after_election = LogPosition::new(3, 42);`
/// - `let snapshot_point = LogPosition::new(7, 10_000);`
///
/// Ordering is term-major, then index, matching the order in which a
/// single replica observes committed entries.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LogPosition {
    pub term: u64,
    pub index: u64,
}

impl LogPosition {
    pub fn new(term: u64, index: u64) -> Self {
        Self { term, index }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.term, self.index)
    }
}

/// Canonical error type shared across the replica subsystems.
#[derive(Error, Debug)]
pub enum KvError {
    #[error("malformed command: {0}")]
    MalformedCommand(String),
    #[error("malformed outcome: {0}")]
    MalformedOutcome(String),
    #[error("corrupt snapshot {path}: {reason}")]
    CorruptSnapshot { path: PathBuf, reason: String },
    #[error("snapshot: {0}")]
    Snapshot(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("config: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl KvError {
    pub fn corrupt_snapshot(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptSnapshot {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias that carries a `KvError`.
pub type KvResult<T> = Result<T, KvError>;

/// Runtime configuration for one replica's state machine.
///
/// # Example
/// ```
/// use common::ReplicaConfig;
/// use std::path::PathBuf;
///
/// let config = ReplicaConfig::builder()
///     .data_dir(PathBuf::from("./replica-1"))
///     .scan_limit(500)
///     .snapshot_retain(3)
///     .build();
/// assert_eq!(config.snapshot_dir(), PathBuf::from("./replica-1/snapshots"));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(default)]
pub struct ReplicaConfig {
    /// Directory holding the storage record log and snapshot markers.
    #[builder(default = PathBuf::from("./kv_data"))]
    pub data_dir: PathBuf,
    /// Upper bound on the number of keys a single SCAN returns.
    #[builder(default = 1000)]
    pub scan_limit: usize,
    /// Number of snapshot markers kept after a new one is written.
    #[builder(default = 2)]
    pub snapshot_retain: usize,
    /// Whether leader activity records are also published on the activity channel.
    #[builder(default = true)]
    pub activity_events: bool,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./kv_data"),
            scan_limit: 1000,
            snapshot_retain: 2,
            activity_events: true,
        }
    }
}

impl ReplicaConfig {
    /// Read a JSON config file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> KvResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| KvError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> KvResult<()> {
        if self.scan_limit == 0 {
            return Err(KvError::Config("scan_limit must be positive".into()));
        }
        if self.snapshot_retain == 0 {
            return Err(KvError::Config("snapshot_retain must be positive".into()));
        }
        Ok(())
    }

    /// Path to the storage adapter's record log.
    pub fn storage_path(&self) -> PathBuf {
        self.data_dir.join("kv.log")
    }

    /// Path to the snapshot marker directory.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{KvError, KvResult, LogPosition, ReplicaConfig};
}

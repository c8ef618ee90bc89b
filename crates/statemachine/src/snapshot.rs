//! Snapshot markers: where a replica's applied state was last pinned.
//!
//! A snapshot marker records the log position the storage adapter's data
//! reflected when it was taken. The key-value data itself stays with the
//! storage adapter; the marker only tells a restarting replica where in the
//! log to resume.
//!
//! ## File Layout
//!
//! ```text
//! {snapshot_dir}/snapshot_{term}_{index}.snap
//!
//! ┌──────────────────────────────┐
//! │ magic: [u8; 4] ("KVSN")      │
//! │ meta_len: u32 (LE)           │
//! │ meta: JSON SnapshotMeta      │
//! │ checksum: u32 (CRC32 of meta)│
//! └──────────────────────────────┘
//! ```
//!
//! Markers are written to a `.tmp` file, fsynced and renamed into place, so a
//! crash never leaves a half-written marker under the final name.

use common::{KvError, KvResult, LogPosition, ReplicaConfig};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const SNAPSHOT_MAGIC: &[u8; 4] = b"KVSN";
const FILE_PREFIX: &str = "snapshot_";
const FILE_SUFFIX: &str = ".snap";

/// Reference to a snapshot marker on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotMarker {
    /// Position parsed from the file name.
    pub position: LogPosition,
    pub path: PathBuf,
}

/// Metadata stored inside a marker file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub term: u64,
    pub index: u64,
    /// Number of keys in storage when the marker was written.
    pub keys: usize,
    pub created_at_ms: u64,
}

impl SnapshotMeta {
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.term, self.index)
    }
}

/// Writes, finds and validates snapshot markers in one directory.
#[derive(Clone, Debug)]
pub struct SnapshotManager {
    dir: PathBuf,
    retain: usize,
}

impl SnapshotManager {
    /// Manage markers under `dir`, keeping the `retain` newest on purge.
    pub fn new(dir: impl Into<PathBuf>, retain: usize) -> KvResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            retain: retain.max(1),
        })
    }

    pub fn from_config(config: &ReplicaConfig) -> KvResult<Self> {
        Self::new(config.snapshot_dir(), config.snapshot_retain)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(position: LogPosition) -> String {
        format!("{FILE_PREFIX}{}_{}{FILE_SUFFIX}", position.term, position.index)
    }

    /// Parse `snapshot_{term}_{index}.snap`.
    pub fn parse_file_name(name: &str) -> Option<LogPosition> {
        let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
        let (term, index) = stem.split_once('_')?;
        Some(LogPosition::new(term.parse().ok()?, index.parse().ok()?))
    }

    /// Every marker in the directory, newest first.
    pub fn list(&self) -> KvResult<Vec<SnapshotMarker>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut markers = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(position) = name.to_str().and_then(Self::parse_file_name) else {
                continue;
            };
            markers.push(SnapshotMarker {
                position,
                path: entry.path(),
            });
        }
        markers.sort_by(|a, b| b.position.cmp(&a.position));
        Ok(markers)
    }

    /// The newest marker, or `None` when there is none or it has vanished.
    pub fn locate_latest(&self) -> KvResult<Option<SnapshotMarker>> {
        let Some(marker) = self.list()?.into_iter().next() else {
            debug!(dir = %self.dir.display(), "no snapshot markers");
            return Ok(None);
        };
        if !marker.path.is_file() {
            warn!(path = %marker.path.display(), "snapshot marker file is missing");
            return Ok(None);
        }
        Ok(Some(marker))
    }

    /// Read and validate the metadata of `marker`.
    pub fn read_meta(&self, marker: &SnapshotMarker) -> KvResult<SnapshotMeta> {
        let path = &marker.path;
        let corrupt = |reason: String| KvError::corrupt_snapshot(path, reason);

        let name_position = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(Self::parse_file_name)
            .ok_or_else(|| corrupt("unrecognised file name".into()))?;

        let bytes = fs::read(path).map_err(|e| corrupt(e.to_string()))?;
        if bytes.len() < 8 {
            return Err(corrupt("truncated header".into()));
        }
        if &bytes[0..4] != SNAPSHOT_MAGIC {
            return Err(corrupt("bad magic".into()));
        }

        let meta_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let meta_end = 8 + meta_len;
        if bytes.len() < meta_end + 4 {
            return Err(corrupt("truncated metadata".into()));
        }
        let meta_bytes = &bytes[8..meta_end];
        let stored = u32::from_le_bytes([
            bytes[meta_end],
            bytes[meta_end + 1],
            bytes[meta_end + 2],
            bytes[meta_end + 3],
        ]);
        if crc32fast::hash(meta_bytes) != stored {
            return Err(corrupt("checksum mismatch".into()));
        }

        let meta: SnapshotMeta = serde_json::from_slice(meta_bytes)
            .map_err(|e| corrupt(format!("unreadable metadata: {e}")))?;
        if meta.position() != name_position {
            return Err(corrupt(format!(
                "metadata position {} disagrees with file name {}",
                meta.position(),
                name_position
            )));
        }
        Ok(meta)
    }

    /// Validate `marker` and return the position it pins.
    pub fn load(&self, marker: &SnapshotMarker) -> KvResult<LogPosition> {
        self.read_meta(marker).map(|meta| meta.position())
    }

    /// Write a marker for `position`, then purge markers beyond the retain count.
    pub fn save(&self, position: LogPosition, keys: usize) -> KvResult<SnapshotMarker> {
        let meta = SnapshotMeta {
            term: position.term,
            index: position.index,
            keys,
            created_at_ms: now_ms(),
        };
        let meta_bytes =
            serde_json::to_vec(&meta).map_err(|e| KvError::Snapshot(e.to_string()))?;

        let path = self.dir.join(Self::file_name(position));
        let temp_path = path.with_extension("snap.tmp");
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(SNAPSHOT_MAGIC)?;
            file.write_all(&(meta_bytes.len() as u32).to_le_bytes())?;
            file.write_all(&meta_bytes)?;
            file.write_all(&crc32fast::hash(&meta_bytes).to_le_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &path)?;
        File::open(&self.dir)?.sync_all()?;

        info!(position = %position, keys, path = %path.display(), "snapshot marker written");
        self.purge()?;
        Ok(SnapshotMarker { position, path })
    }

    /// Delete every marker older than the `retain` newest. Returns how many went.
    pub fn purge(&self) -> KvResult<usize> {
        let stale: Vec<_> = self.list()?.into_iter().skip(self.retain).collect();
        for marker in &stale {
            match fs::remove_file(&marker.path) {
                Ok(()) => debug!(path = %marker.path.display(), "purged snapshot marker"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(stale.len())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn file_name_round_trip() {
        let position = LogPosition::new(3, 42);
        let name = SnapshotManager::file_name(position);
        assert_eq!(name, "snapshot_3_42.snap");
        assert_eq!(SnapshotManager::parse_file_name(&name), Some(position));
    }

    #[test]
    fn rejects_foreign_file_names() {
        for name in [
            "snapshot_3_42.snap.tmp",
            "snapshot_3.snap",
            "snapshot_a_1.snap",
            "snap_1_2.snap",
            "snapshot_1_2_3.snap",
        ] {
            assert_eq!(SnapshotManager::parse_file_name(name), None, "{name}");
        }
    }

    #[test]
    fn empty_directory_has_no_latest() {
        let dir = tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path().join("snaps"), 2).unwrap();
        assert_eq!(manager.locate_latest().unwrap(), None);
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path(), 2).unwrap();

        let marker = manager.save(LogPosition::new(2, 17), 5).unwrap();
        assert!(marker.path.ends_with("snapshot_2_17.snap"));
        assert_eq!(manager.load(&marker).unwrap(), LogPosition::new(2, 17));
        assert_eq!(manager.read_meta(&marker).unwrap().keys, 5);
        assert_eq!(manager.locate_latest().unwrap(), Some(marker));
    }

    #[test]
    fn list_is_newest_first_and_purge_keeps_retain() {
        let dir = tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path(), 2).unwrap();
        for (term, index) in [(1, 5), (1, 9), (2, 12)] {
            manager.save(LogPosition::new(term, index), 0).unwrap();
        }

        let positions: Vec<_> = manager.list().unwrap().iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![LogPosition::new(2, 12), LogPosition::new(1, 9)]);
    }

    #[test]
    fn ignores_leftover_temp_files() {
        let dir = tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path(), 2).unwrap();
        fs::write(dir.path().join("snapshot_9_99.snap.tmp"), b"partial").unwrap();
        assert_eq!(manager.locate_latest().unwrap(), None);
    }

    fn corrupt_reason(manager: &SnapshotManager, marker: &SnapshotMarker) -> String {
        match manager.load(marker) {
            Err(KvError::CorruptSnapshot { reason, .. }) => reason,
            other => panic!("expected CorruptSnapshot, got {other:?}"),
        }
    }

    #[test]
    fn detects_corruption() {
        let dir = tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path(), 2).unwrap();
        let marker = manager.save(LogPosition::new(1, 3), 1).unwrap();
        let good = fs::read(&marker.path).unwrap();

        fs::write(&marker.path, b"KV").unwrap();
        assert_eq!(corrupt_reason(&manager, &marker), "truncated header");

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        fs::write(&marker.path, &bad_magic).unwrap();
        assert_eq!(corrupt_reason(&manager, &marker), "bad magic");

        let mut flipped = good.clone();
        flipped[10] ^= 0xFF;
        fs::write(&marker.path, &flipped).unwrap();
        assert_eq!(corrupt_reason(&manager, &marker), "checksum mismatch");

        fs::write(&marker.path, &good[..good.len() - 2]).unwrap();
        assert_eq!(corrupt_reason(&manager, &marker), "truncated metadata");
    }

    #[test]
    fn detects_renamed_marker() {
        let dir = tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path(), 2).unwrap();
        let marker = manager.save(LogPosition::new(1, 3), 1).unwrap();

        let renamed = dir.path().join("snapshot_1_4.snap");
        fs::rename(&marker.path, &renamed).unwrap();
        let marker = SnapshotMarker {
            position: LogPosition::new(1, 4),
            path: renamed,
        };
        assert!(corrupt_reason(&manager, &marker).contains("disagrees"));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_marker_is_treated_as_absent() {
        let dir = tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path(), 2).unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("gone"),
            dir.path().join("snapshot_4_40.snap"),
        )
        .unwrap();
        assert_eq!(manager.list().unwrap().len(), 1);
        assert_eq!(manager.locate_latest().unwrap(), None);
    }
}

//! Durable storage adapter backed by an append-only record log.
//!
//! ## File Format
//!
//! Every mutation is appended to a single file as a framed record:
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Header (12 bytes)                  │
//! │ ├─ magic: u32 (0x4B564C47 "KVLG") │
//! │ ├─ checksum: u32 (CRC32)          │
//! │ └─ length: u32                     │
//! ├────────────────────────────────────┤
//! │ Payload (bincode StorageRecord)    │
//! └────────────────────────────────────┘
//! ```
//!
//! The live map is rebuilt on open by replaying the file. Replay stops at the
//! first torn or corrupt record and the file is cut back to the last good
//! record, so a crash mid-append loses at most that append.

use crate::{scan_map, KvStorage};
use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{KvError, KvResult};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Magic bytes for record validation: "KVLG" in ASCII
const RECORD_MAGIC: u32 = 0x4B564C47;

/// Size of the record header in bytes
const HEADER_SIZE: usize = 12;

/// A logical mutation persisted in the record log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
enum StorageRecord {
    Put { key: String, value: String },
    Delete { key: String },
}

#[derive(Clone, Debug)]
struct RecordHeader {
    magic: u32,
    checksum: u32,
    length: u32,
}

impl RecordHeader {
    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..12].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Self {
            magic: word(0),
            checksum: word(4),
            length: word(8),
        }
    }
}

/// Append handle plus the byte offset just past the last good record.
struct LogHandle {
    file: File,
    end: u64,
    /// Set when a failed append could not be rolled back.
    poisoned: bool,
}

/// Durable key-value storage adapter.
///
/// Reads are served from an in-memory map. Writes are appended and fsynced
/// before the map changes, so a write that returned is never lost. A failed
/// append is cut back off the file; if that fails too, the adapter refuses
/// all further writes.
pub struct FileStorage {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
    /// Also serialises writers.
    log: Mutex<LogHandle>,
}

impl FileStorage {
    /// Open or create the record log at `path` and rebuild the live map.
    pub fn open(path: impl AsRef<Path>) -> KvResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let (data, valid_len) = Self::replay(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| KvError::Storage(format!("failed to open {}: {e}", path.display())))?;

        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            warn!(
                path = %path.display(),
                discarded_bytes = on_disk - valid_len,
                "discarding torn tail of storage log"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        info!(path = %path.display(), keys = data.len(), "storage opened");

        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            path,
            data: RwLock::new(data),
            log: Mutex::new(LogHandle {
                file,
                end: valid_len,
                poisoned: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the log with a single `Put` per live key.
    pub fn compact(&self) -> KvResult<()> {
        let mut log = self.log.lock();
        let data = self.data.read();

        let temp_path = self.path.with_extension("compact.tmp");
        let mut written = 0u64;
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            for (key, value) in data.iter() {
                let record = StorageRecord::Put {
                    key: key.clone(),
                    value: value.clone(),
                };
                let bytes = frame(&record)?;
                writer.write_all(&bytes)?;
                written += bytes.len() as u64;
            }
            writer.flush()?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;
        sync_parent_dir(&self.path)?;

        // The rewritten file mirrors the live map, so it is a clean base again.
        *log = LogHandle {
            file: OpenOptions::new().append(true).open(&self.path)?,
            end: written,
            poisoned: false,
        };
        info!(path = %self.path.display(), keys = data.len(), "storage log compacted");
        Ok(())
    }

    /// Replay the record log. Returns the rebuilt map and the byte length of
    /// the valid prefix.
    fn replay(path: &Path) -> KvResult<(BTreeMap<String, String>, u64)> {
        let mut data = BTreeMap::new();
        if !path.exists() {
            return Ok((data, 0));
        }

        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut offset = 0u64;
        let mut records = 0usize;

        loop {
            let mut header_buf = [0u8; HEADER_SIZE];
            match reader.read_exact(&mut header_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let header = RecordHeader::from_bytes(&header_buf);
            if header.magic != RECORD_MAGIC {
                break;
            }
            let remaining = file_len.saturating_sub(offset + HEADER_SIZE as u64);
            if u64::from(header.length) > remaining {
                break;
            }

            let mut payload = vec![0u8; header.length as usize];
            if reader.read_exact(&mut payload).is_err() {
                break;
            }

            if crc32fast::hash(&payload) != header.checksum {
                break;
            }

            let Ok((record, _)) = decode_from_slice::<StorageRecord, _>(&payload, bincode_config())
            else {
                break;
            };

            match record {
                StorageRecord::Put { key, value } => {
                    data.insert(key, value);
                }
                StorageRecord::Delete { key } => {
                    data.remove(&key);
                }
            }

            records += 1;
            offset += HEADER_SIZE as u64 + header.length as u64;
        }

        debug!(path = %path.display(), records, "storage log replayed");
        Ok((data, offset))
    }

    /// Append one record and fsync it.
    ///
    /// Bytes past `log.end` are cut off first, and a failed write or fsync is
    /// rolled back to `log.end`, so every record lands on a clean boundary.
    fn append(&self, log: &mut LogHandle, record: &StorageRecord) -> KvResult<()> {
        if log.poisoned {
            return Err(KvError::Storage(format!(
                "{} refuses writes until it is compacted",
                self.path.display()
            )));
        }
        let bytes = frame(record)?;

        let on_disk = log.file.metadata()?.len();
        if on_disk < log.end {
            error!(
                path = %self.path.display(),
                expected = log.end,
                on_disk,
                "storage log shrank underneath the adapter, refusing further writes"
            );
            log.poisoned = true;
            return Err(KvError::Storage(format!(
                "{} is shorter than its last good record",
                self.path.display()
            )));
        }
        if on_disk > log.end {
            warn!(
                path = %self.path.display(),
                expected = log.end,
                on_disk,
                "discarding bytes past the last good record"
            );
            self.truncate_to_end(log)?;
        }

        match log.file.write_all(&bytes).and_then(|_| log.file.sync_data()) {
            Ok(()) => {
                log.end += bytes.len() as u64;
                Ok(())
            }
            Err(e) => {
                let _ = self.truncate_to_end(log);
                Err(KvError::Storage(format!(
                    "append to {} failed: {e}",
                    self.path.display()
                )))
            }
        }
    }

    /// Cut the file back to `log.end`, poisoning the handle if that fails.
    fn truncate_to_end(&self, log: &mut LogHandle) -> KvResult<()> {
        let result = log.file.set_len(log.end).and_then(|_| log.file.sync_all());
        if let Err(e) = result {
            error!(
                path = %self.path.display(),
                error = %e,
                "failed to roll back storage log, refusing further writes"
            );
            log.poisoned = true;
            return Err(KvError::Storage(format!(
                "rollback of {} failed: {e}",
                self.path.display()
            )));
        }
        Ok(())
    }
}

impl KvStorage for FileStorage {
    fn get(&self, key: &str) -> KvResult<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> KvResult<()> {
        let mut log = self.log.lock();
        let record = StorageRecord::Put {
            key: key.to_string(),
            value: value.to_string(),
        };
        self.append(&mut log, &record)?;
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn update(&self, key: &str, value: &str) -> KvResult<bool> {
        let mut log = self.log.lock();
        if !self.data.read().contains_key(key) {
            return Ok(false);
        }
        let record = StorageRecord::Put {
            key: key.to_string(),
            value: value.to_string(),
        };
        self.append(&mut log, &record)?;
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(true)
    }

    fn delete(&self, key: &str) -> KvResult<bool> {
        let mut log = self.log.lock();
        if !self.data.read().contains_key(key) {
            return Ok(false);
        }
        let record = StorageRecord::Delete {
            key: key.to_string(),
        };
        self.append(&mut log, &record)?;
        self.data.write().remove(key);
        Ok(true)
    }

    fn scan(&self, start: &str, limit: usize) -> KvResult<Vec<String>> {
        Ok(scan_map(&self.data.read(), start, limit))
    }

    fn len(&self) -> KvResult<usize> {
        Ok(self.data.read().len())
    }

    fn sync(&self) -> KvResult<()> {
        self.log.lock().file.sync_all()?;
        Ok(())
    }
}

/// Serialize a record into header + payload bytes.
fn frame(record: &StorageRecord) -> KvResult<Vec<u8>> {
    let payload = encode_to_vec(record, bincode_config())
        .map_err(|e| KvError::Storage(format!("failed to encode record: {e}")))?;
    let header = RecordHeader {
        magic: RECORD_MAGIC,
        checksum: crc32fast::hash(&payload),
        length: payload.len() as u32,
    };
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&header.to_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
        _ => Ok(()),
    }
}

fn bincode_config() -> impl Config {
    config::legacy()
}

//! Key-value storage adapters.
//!
//! The replica state machine never owns key-value data itself; it drives a
//! [`KvStorage`] handle that is passed in at initialisation. Two adapters are
//! provided:
//!
//! - [`MemStorage`]: an in-memory ordered map, used by tests and by replicas
//!   that rebuild their state by replaying the log.
//! - [`FileStorage`]: a durable map persisted as a checksummed record log
//!   (see [`file`] for the on-disk format).
//!
//! Every operation is synchronous and, for durable adapters, durable on
//! return. Adapters guarantee per-key atomicity only.


pub mod file;

pub use file::FileStorage;

use common::{KvError, KvResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

/// Storage contract consumed by the state machine.
///
/// Implementations must be safe to read from many threads while a single
/// writer mutates them.
pub trait KvStorage: Send + Sync {
    /// Fetch the value stored under `key`.
    fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &str) -> KvResult<()>;

    /// Replace the value under an existing `key`.
    ///
    /// Returns `false` without writing anything when the key is absent.
    fn update(&self, key: &str, value: &str) -> KvResult<bool>;

    /// Remove `key`. Returns whether the key was present.
    fn delete(&self, key: &str) -> KvResult<bool>;

    /// Up to `limit` keys in ascending order, starting at `start` (inclusive).
    fn scan(&self, start: &str, limit: usize) -> KvResult<Vec<String>>;

    /// Number of live keys.
    fn len(&self) -> KvResult<usize>;

    fn is_empty(&self) -> KvResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Force everything written so far to durable media.
    fn sync(&self) -> KvResult<()> {
        Ok(())
    }
}

/// Collect keys from an ordered map for a SCAN.
pub(crate) fn scan_map(map: &BTreeMap<String, String>, start: &str, limit: usize) -> Vec<String> {
    map.range::<str, _>((Bound::Included(start), Bound::Unbounded))
        .take(limit)
        .map(|(k, _)| k.clone())
        .collect()
}

/// In-memory storage adapter.
///
/// Can be switched into a failing mode to exercise error paths of callers.
#[derive(Debug, Default)]
pub struct MemStorage {
    data: RwLock<BTreeMap<String, String>>,
    failing: AtomicBool,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `KvError::Storage` until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Copy of every key-value pair, in key order.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn check(&self) -> KvResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(KvError::Storage("injected storage failure".into()));
        }
        Ok(())
    }
}

impl KvStorage for MemStorage {
    fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.check()?;
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> KvResult<()> {
        self.check()?;
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn update(&self, key: &str, value: &str) -> KvResult<bool> {
        self.check()?;
        let mut data = self.data.write();
        match data.get_mut(key) {
            Some(existing) => {
                *existing = value.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, key: &str) -> KvResult<bool> {
        self.check()?;
        Ok(self.data.write().remove(key).is_some())
    }

    fn scan(&self, start: &str, limit: usize) -> KvResult<Vec<String>> {
        self.check()?;
        Ok(scan_map(&self.data.read(), start, limit))
    }

    fn len(&self) -> KvResult<usize> {
        self.check()?;
        Ok(self.data.read().len())
    }
}

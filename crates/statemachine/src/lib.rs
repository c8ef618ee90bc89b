//! Deterministic key-value state machine for a replicated store.
//!
//! A consensus engine decides the order of commands; this crate turns that
//! ordered log into key-value state on every replica and serves reads from it.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        Consensus Host                          │
//! │     apply(entry, role)          query(payload)                 │
//! └───────────┬───────────────────────────┬────────────────────────┘
//!             ▼                           ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │                 KvStateMachine (machine.rs)                    │
//! │  Command::decode ─▶ dispatch ─▶ Outcome   ActivityEvent (lead) │
//! └──────┬──────────────────┬──────────────────────┬───────────────┘
//!        ▼                  ▼                      ▼
//! ┌──────────────┐  ┌────────────────────┐  ┌─────────────────────┐
//! │ KvStorage    │  │ ConsistencyTracker │  │ SnapshotManager     │
//! │ (storage)    │  │ last applied pos.  │  │ snapshot_{t}_{i}    │
//! └──────────────┘  └────────────────────┘  └─────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use common::ReplicaConfig;
//! use statemachine::{Bootstrap, Command, CommittedEntry, Role};
//! use storage::MemStorage;
//!
//! # fn main() -> common::KvResult<()> {
//! let config = ReplicaConfig::default();
//! let machine = Bootstrap::new(&config)?.initialize(Arc::new(MemStorage::new()))?;
//!
//! let entry = CommittedEntry::command(1, 1, &Command::insert("a", "1"));
//! machine.apply(&entry, Role::Leader);
//! let outcome = machine.query(&Command::read("a").encode());
//! assert_eq!(outcome.payload.as_deref(), Some("1"));
//! # Ok(())
//! # }
//! ```

mod activity;
mod command;
mod machine;
mod outcome;
mod snapshot;
mod tracker;

pub use activity::{activity_channel, ActivityEvent, ActivityReceiver, ActivitySender};
pub use command::{Command, CommandKind};
pub use machine::{Bootstrap, CommittedEntry, KvStateMachine, Role, StateMachine};
pub use outcome::{Outcome, Status};
pub use snapshot::{SnapshotManager, SnapshotMarker, SnapshotMeta};
pub use tracker::ConsistencyTracker;

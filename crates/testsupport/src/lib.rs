//! Test support utilities for the replicated key-value workspace.
//!
//! This crate provides:
//! - Isolated replica contexts with temporary data directories
//! - An in-process consensus host that feeds replicas the same log
//! - Command fixtures and property-based generators
//! - Assertion helpers for outcomes and replica state
//!
//! # Example Usage
//!
//! ```no_run
//! use testsupport::prelude::*;
//! use statemachine::Command;
//!
//! let mut host = LocalHost::new(vec![
//!     ReplicaContext::new().unwrap(),
//!     ReplicaContext::new().unwrap(),
//! ]);
//! host.submit(&Command::insert("a", "1"));
//! assert_replicas_agree(host.replicas());
//! ```

pub mod assertions;
pub mod context;
pub mod fixtures;
pub mod harness;
pub mod proptest_generators;

/// Convenient re-exports for common testing patterns.
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::context::*;
    pub use crate::fixtures::*;
    pub use crate::harness::*;
}

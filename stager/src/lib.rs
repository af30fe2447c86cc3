//! Staged application deployment from object storage.
//!
//! A deployment reads a pointer object naming the current artifact, moves the
//! previously deployed app aside, downloads and unpacks the new archive, and
//! either discards the old app (commit) or restores it (rollback). The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (target derivation, staging state).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (object storage, filesystem moves,
//!   process execution, reporting). Isolated behind traits to enable fakes in tests.
//!
//! [`deploy`] sequences the two into a single deployment attempt.

pub mod core;
pub mod deploy;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

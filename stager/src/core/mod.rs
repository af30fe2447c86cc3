//! Deterministic, pure logic shared by the deployment pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! values and return deterministic outputs suitable for tests.

pub mod staging;
pub mod target;
pub mod types;

//! I/O adapters for the deployment pipeline.

pub mod command;
pub mod config;
pub mod pointer;
pub mod process;
pub mod report;
pub mod stage;
pub mod storage;

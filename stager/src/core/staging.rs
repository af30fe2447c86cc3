//! Staging state threaded between stage-manager operations.
//!
//! One deployment attempt moves through `Clean -> Staged -> {Committed | RolledBack}`.
//! The holding path is recorded if and only if the previous app was moved aside
//! and has not yet been discarded (commit) or restored (rollback).

use std::path::{Path, PathBuf};

/// Maximum unpack attempts before the attempt is rolled back.
pub const MAX_UNPACK_ATTEMPTS: u32 = 5;

/// Suffix appended to the app directory while the previous version is held aside.
pub const HOLDING_SUFFIX: &str = "-holding";

/// Return `<original>-holding` as a sibling of `original`.
pub fn holding_path_for(original: &Path) -> PathBuf {
    let mut raw = original.as_os_str().to_owned();
    raw.push(HOLDING_SUFFIX);
    PathBuf::from(raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StagePhase {
    #[default]
    Clean,
    Staged,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StagingState {
    phase: StagePhase,
    original_path: Option<PathBuf>,
    holding_path: Option<PathBuf>,
}

impl StagingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> StagePhase {
        self.phase
    }

    pub fn original_path(&self) -> Option<&Path> {
        self.original_path.as_deref()
    }

    pub fn holding_path(&self) -> Option<&Path> {
        self.holding_path.as_deref()
    }

    /// True while a previous version sits in a holding directory.
    pub fn has_holding(&self) -> bool {
        self.holding_path.is_some()
    }

    /// First-ever deployment: nothing was moved aside.
    pub fn mark_staged_empty(&mut self) {
        self.phase = StagePhase::Staged;
        self.original_path = None;
        self.holding_path = None;
    }

    /// The previous app now lives at `holding`.
    pub fn mark_staged(&mut self, original: PathBuf, holding: PathBuf) {
        self.phase = StagePhase::Staged;
        self.original_path = Some(original);
        self.holding_path = Some(holding);
    }

    /// Holding directory discarded; the new version is final.
    pub fn mark_committed(&mut self) {
        self.phase = StagePhase::Committed;
        self.holding_path = None;
    }

    /// Holding directory restored to the original path.
    pub fn mark_rolled_back(&mut self) {
        self.phase = StagePhase::RolledBack;
        self.holding_path = None;
    }
}

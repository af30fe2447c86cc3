//! Test-only fakes for the storage, command and reporting seams.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::core::staging::holding_path_for;
use crate::core::types::ObjectLocation;
use crate::io::command::{CommandRequest, CommandRunner};
use crate::io::process::CommandOutput;
use crate::io::report::Reporter;
use crate::io::storage::{StorageClient, StorageError};

/// File written into fake app directories to identify the version.
pub const MARKER_FILE: &str = "VERSION";

/// Create `dir` (if needed) and stamp it with `marker`.
pub fn write_app(dir: &Path, marker: &str) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    fs::write(dir.join(MARKER_FILE), marker)
        .with_context(|| format!("write marker in {}", dir.display()))
}

/// Read the version marker of an app directory.
pub fn read_marker(dir: &Path) -> Result<String> {
    fs::read_to_string(dir.join(MARKER_FILE))
        .with_context(|| format!("read marker in {}", dir.display()))
}

/// Temporary working directory with helpers for app/holding paths.
pub struct TestWorkdir {
    dir: tempfile::TempDir,
}

impl TestWorkdir {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("create temp workdir")?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn app(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn holding(&self, name: &str) -> PathBuf {
        holding_path_for(&self.app(name))
    }
}

/// Scripted outcome of one command invocation.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    exit_code: Option<i32>,
    timed_out: bool,
    stderr: String,
    spawn_error: Option<String>,
    /// Apps to materialize, relative to the request workdir: (dir, marker).
    apps: Vec<(String, String)>,
    /// Paths to delete, relative to the request workdir.
    removals: Vec<String>,
}

impl ScriptedRun {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            timed_out: false,
            stderr: String::new(),
            spawn_error: None,
            apps: Vec::new(),
            removals: Vec::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr: stderr.to_string(),
            ..Self::success()
        }
    }

    pub fn timeout() -> Self {
        Self {
            exit_code: None,
            timed_out: true,
            ..Self::success()
        }
    }

    pub fn spawn_error(message: &str) -> Self {
        Self {
            spawn_error: Some(message.to_string()),
            ..Self::success()
        }
    }

    /// Also create `<workdir>/<dir>` stamped with `marker`.
    pub fn with_app(mut self, dir: &str, marker: &str) -> Self {
        self.apps.push((dir.to_string(), marker.to_string()));
        self
    }

    /// Also delete `<workdir>/<path>`.
    pub fn removing(mut self, path: &str) -> Self {
        self.removals.push(path.to_string());
        self
    }
}

/// Command runner that replays a fixed script and records every request.
pub struct ScriptedRunner {
    script: RefCell<VecDeque<ScriptedRun>>,
    requests: RefCell<Vec<CommandRequest>>,
}

impl ScriptedRunner {
    pub fn new(script: Vec<ScriptedRun>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<CommandRequest> {
        self.requests.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput> {
        self.requests.borrow_mut().push(request.clone());
        let run = self
            .script
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted runner exhausted"))?;

        for path in &run.removals {
            let target = request.workdir.join(path);
            if target.is_dir() {
                fs::remove_dir_all(&target)
                    .with_context(|| format!("remove {}", target.display()))?;
            } else if target.exists() {
                fs::remove_file(&target).with_context(|| format!("remove {}", target.display()))?;
            }
        }
        for (dir, marker) in &run.apps {
            write_app(&request.workdir.join(dir), marker)?;
        }
        if let Some(message) = run.spawn_error {
            return Err(anyhow!(message)).context("spawn command");
        }

        Ok(CommandOutput {
            exit_code: run.exit_code,
            stdout: Vec::new(),
            stderr: run.stderr.into_bytes(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            timed_out: run.timed_out,
        })
    }
}

/// In-memory object storage with call counters.
#[derive(Default)]
pub struct MemoryStorage {
    objects: HashMap<ObjectLocation, Vec<u8>>,
    fetch_calls: Cell<usize>,
    download_calls: Cell<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, location: &ObjectLocation, body: &[u8]) -> Self {
        self.objects.insert(location.clone(), body.to_vec());
        self
    }

    /// Store a pointer at `pointer` naming `artifact`, plus the artifact bytes.
    pub fn with_release(self, pointer: &ObjectLocation, artifact: &ObjectLocation) -> Self {
        let body = serde_json::json!({ "bucket": artifact.bucket, "key": artifact.key });
        self.with_object(pointer, body.to_string().as_bytes())
            .with_object(artifact, b"PK\x05\x06fake-zip")
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.get()
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.get()
    }
}

impl StorageClient for MemoryStorage {
    fn fetch_object(&self, location: &ObjectLocation) -> Result<Vec<u8>, StorageError> {
        self.fetch_calls.set(self.fetch_calls.get() + 1);
        self.objects
            .get(location)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(location.clone()))
    }

    fn download_object(&self, location: &ObjectLocation, dest: &Path) -> Result<u64, StorageError> {
        self.download_calls.set(self.download_calls.get() + 1);
        let body = self
            .objects
            .get(location)
            .ok_or_else(|| StorageError::NotFound(location.clone()))?;
        fs::write(dest, body).map_err(|source| StorageError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(body.len() as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLevel {
    Info,
    Warn,
    Error,
}

/// Reporter that keeps every line for assertions.
#[derive(Default)]
pub struct RecordingReporter {
    lines: RefCell<Vec<(ReportLevel, String)>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(ReportLevel, String)> {
        self.lines.borrow().clone()
    }

    /// True if any line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines
            .borrow()
            .iter()
            .any(|(_, line)| line.contains(needle))
    }

    pub fn count(&self, level: ReportLevel) -> usize {
        self.lines
            .borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .count()
    }
}

impl Reporter for RecordingReporter {
    fn info(&self, line: &str) {
        self.lines
            .borrow_mut()
            .push((ReportLevel::Info, line.to_string()));
    }

    fn warn(&self, line: &str) {
        self.lines
            .borrow_mut()
            .push((ReportLevel::Warn, line.to_string()));
    }

    fn error(&self, line: &str) {
        self.lines
            .borrow_mut()
            .push((ReportLevel::Error, line.to_string()));
    }
}

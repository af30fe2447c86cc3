//! Shell command runner used for archive extraction and dependency installs.
//!
//! The [`CommandRunner`] trait keeps the stage manager independent of the real
//! shell. Tests use scripted runners that report predetermined outcomes and
//! materialize files without spawning processes.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CommandOutput, run_command_with_timeout};

/// A command template plus the time it may take.
///
/// Templates expand `{zip}` to the archive path and `{output}` to the app
/// directory, both shell-quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub template: String,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(template: impl Into<String>, timeout: Duration) -> Self {
        Self {
            template: template.into(),
            timeout,
        }
    }

    pub fn render(&self, zip: &Path, output: &Path) -> String {
        self.template
            .replace("{zip}", &shell_quote(&zip.to_string_lossy()))
            .replace("{output}", &shell_quote(&output.to_string_lossy()))
    }
}

/// Parameters for one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Full command line passed to `sh -c`.
    pub command: String,
    /// Working directory for the child process.
    pub workdir: PathBuf,
    pub timeout: Duration,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Abstraction over shell execution.
pub trait CommandRunner {
    /// Run the command. `Err` means the command could not be run at all;
    /// a non-zero exit is reported through [`CommandOutput`].
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput>;
}

/// Runner that spawns `sh -c <command>`.
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput> {
        info!(command = %request.command, workdir = %request.workdir.display(), "running shell command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&request.command)
            .current_dir(&request.workdir);

        let output = run_command_with_timeout(cmd, request.timeout, request.output_limit_bytes)
            .with_context(|| format!("run `{}`", request.command))?;

        if output.success() {
            debug!("shell command succeeded");
        } else {
            warn!(exit_code = ?output.exit_code, timed_out = output.timed_out, "shell command failed");
        }
        Ok(output)
    }
}

/// Run a command and fold every failure mode into a single diagnostic string.
pub fn run_to_completion<C: CommandRunner + ?Sized>(
    runner: &C,
    request: &CommandRequest,
) -> std::result::Result<CommandOutput, String> {
    match runner.run(request) {
        Ok(output) if output.success() => Ok(output),
        Ok(output) => Err(output.failure_summary(request.timeout)),
        Err(err) => Err(format!("{err:#}")),
    }
}

/// Quote a string for POSIX `sh` (single quotes, embedded quotes escaped).
pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

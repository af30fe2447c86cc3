//! Stage manager: swap the previous app for the new one with a rollback window.
//!
//! The manager is the only writer of `<app>` and `<app>-holding`. Every
//! operation takes the [`StagingState`] explicitly so the holding directory is
//! never tracked behind the caller's back.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info, instrument, warn};

use crate::core::staging::{MAX_UNPACK_ATTEMPTS, StagingState, holding_path_for};
use crate::error::{DeployError, DeployWarning, RollbackStatus};
use crate::io::command::{CommandRequest, CommandRunner, CommandSpec, run_to_completion};
use crate::io::report::Reporter;

/// Inputs for one unpack operation.
#[derive(Debug, Clone)]
pub struct UnpackRequest<'a> {
    /// Downloaded archive.
    pub zip_path: &'a Path,
    /// Directory the archive is expected to materialize.
    pub output_dir: &'a Path,
    /// Directory the extraction command runs in.
    pub workdir: &'a Path,
    pub command: &'a CommandSpec,
    pub output_limit_bytes: usize,
}

pub struct StageManager<'a, C: ?Sized, R: ?Sized> {
    runner: &'a C,
    reporter: &'a R,
}

impl<'a, C, R> StageManager<'a, C, R>
where
    C: CommandRunner + ?Sized,
    R: Reporter + ?Sized,
{
    pub fn new(runner: &'a C, reporter: &'a R) -> Self {
        Self { runner, reporter }
    }

    /// Move the app at `output_dir` aside into its holding directory.
    ///
    /// First-ever deployments record no holding directory. A holding directory
    /// left by an interrupted attempt is discarded when the app also exists,
    /// and adopted as the previous version when it does not.
    #[instrument(skip_all, fields(output_dir = %output_dir.display()))]
    pub fn stage(&self, output_dir: &Path) -> Result<StagingState, DeployError> {
        let holding = holding_path_for(output_dir);
        let mut state = StagingState::new();
        let app_exists = path_exists(output_dir);
        let holding_exists = path_exists(&holding);

        if !app_exists {
            if holding_exists {
                warn!(holding = %holding.display(), "adopting holding directory from interrupted attempt");
                self.reporter.warn(&format!(
                    "found {} from an interrupted deployment; keeping it as the previous version",
                    holding.display()
                ));
                state.mark_staged(output_dir.to_path_buf(), holding);
                return Ok(state);
            }
            debug!("no previous app, nothing to stage");
            self.reporter.info(&format!(
                "no previous app at {}, first deployment",
                output_dir.display()
            ));
            state.mark_staged_empty();
            return Ok(state);
        }

        if holding_exists {
            warn!(holding = %holding.display(), "removing stale holding directory");
            self.reporter.warn(&format!(
                "removing stale holding directory {}",
                holding.display()
            ));
            remove_path(&holding).map_err(|source| {
                self.reporter.error(&format!(
                    "failed to remove stale holding directory {}: {source}",
                    holding.display()
                ));
                DeployError::StaleHolding {
                    path: holding.clone(),
                    source,
                }
            })?;
        }

        fs::rename(output_dir, &holding).map_err(|source| {
            self.reporter.error(&format!(
                "failed to move {} to {}: {source}",
                output_dir.display(),
                holding.display()
            ));
            DeployError::StageMove {
                from: output_dir.to_path_buf(),
                to: holding.clone(),
                source,
            }
        })?;

        info!(holding = %holding.display(), "previous app staged");
        self.reporter.info(&format!(
            "moved {} to {}",
            output_dir.display(),
            holding.display()
        ));
        state.mark_staged(output_dir.to_path_buf(), holding);
        Ok(state)
    }

    /// Extract the archive, retrying up to [`MAX_UNPACK_ATTEMPTS`] times.
    ///
    /// Returns the 1-indexed attempt that succeeded. On exhaustion the previous
    /// version is rolled back exactly once before the error is returned; a
    /// failed rollback is attached to the error instead of replacing it.
    #[instrument(skip_all, fields(zip = %request.zip_path.display()))]
    pub fn unpack(
        &self,
        state: &mut StagingState,
        request: &UnpackRequest<'_>,
    ) -> Result<u32, DeployError> {
        let command = CommandRequest {
            command: request
                .command
                .render(request.zip_path, request.output_dir),
            workdir: request.workdir.to_path_buf(),
            timeout: request.command.timeout,
            output_limit_bytes: request.output_limit_bytes,
        };

        let mut last_failure = String::new();
        for attempt in 1..=MAX_UNPACK_ATTEMPTS {
            debug!(attempt, "unpack attempt");
            match self.try_unpack(&command, request.output_dir) {
                Ok(()) => {
                    info!(attempt, "unpack succeeded");
                    self.reporter.info(&format!(
                        "unpacked {} into {} (attempt {attempt}/{MAX_UNPACK_ATTEMPTS})",
                        request.zip_path.display(),
                        request.output_dir.display()
                    ));
                    return Ok(attempt);
                }
                Err(reason) => {
                    warn!(attempt, reason = %reason, "unpack attempt failed");
                    self.reporter.error(&format!(
                        "unpack attempt {attempt}/{MAX_UNPACK_ATTEMPTS} failed: {reason}"
                    ));
                    self.discard_partial_output(request.output_dir);
                    last_failure = reason;
                }
            }
        }

        let rollback = self.rollback(state);
        Err(DeployError::UnpackExhausted {
            attempts: MAX_UNPACK_ATTEMPTS,
            last_failure,
            rollback,
        })
    }

    /// Discard the previous version. No-op when nothing is held.
    ///
    /// Failure leaves the new app in place and is reported as a warning.
    #[instrument(skip_all)]
    pub fn commit(&self, state: &mut StagingState) -> Result<(), DeployWarning> {
        let Some(holding) = state.holding_path().map(Path::to_path_buf) else {
            debug!("nothing to commit");
            state.mark_committed();
            return Ok(());
        };

        match fs::remove_dir_all(&holding) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(holding = %holding.display(), "holding directory already gone");
            }
            Err(err) => {
                warn!(holding = %holding.display(), err = %err, "failed to remove holding directory");
                self.reporter.warn(&format!(
                    "failed to remove previous version at {}: {err}",
                    holding.display()
                ));
                return Err(DeployWarning::Commit {
                    path: holding,
                    reason: err.to_string(),
                });
            }
        }

        info!(holding = %holding.display(), "previous version removed");
        self.reporter
            .info(&format!("removed previous version {}", holding.display()));
        state.mark_committed();
        Ok(())
    }

    /// Restore the held previous version to its original path.
    ///
    /// Anything left at the original path by a failed unpack is removed first.
    #[instrument(skip_all)]
    pub fn rollback(&self, state: &mut StagingState) -> RollbackStatus {
        let (Some(original), Some(holding)) = (
            state.original_path().map(Path::to_path_buf),
            state.holding_path().map(Path::to_path_buf),
        ) else {
            debug!("nothing to roll back");
            return RollbackStatus::NotNeeded;
        };

        if let Err(reason) = self.restore(&original, &holding) {
            warn!(holding = %holding.display(), reason = %reason, "rollback failed");
            self.reporter.error(&format!(
                "rollback failed, previous version remains at {}: {reason}",
                holding.display()
            ));
            return RollbackStatus::Failed { holding, reason };
        }

        info!(original = %original.display(), "previous version restored");
        self.reporter.info(&format!(
            "rolled back: restored {} from {}",
            original.display(),
            holding.display()
        ));
        state.mark_rolled_back();
        RollbackStatus::Restored
    }

    fn try_unpack(&self, command: &CommandRequest, output_dir: &Path) -> Result<(), String> {
        run_to_completion(self.runner, command)?;
        if !output_dir.is_dir() {
            return Err(format!(
                "archive did not produce {}",
                output_dir.display()
            ));
        }
        Ok(())
    }

    fn restore(&self, original: &Path, holding: &Path) -> Result<(), String> {
        if path_exists(original) {
            remove_path(original)
                .map_err(|e| format!("remove partial {}: {e}", original.display()))?;
        }
        fs::rename(holding, original).map_err(|e| {
            format!(
                "move {} to {}: {e}",
                holding.display(),
                original.display()
            )
        })
    }

    fn discard_partial_output(&self, output_dir: &Path) {
        if !path_exists(output_dir) {
            return;
        }
        if let Err(err) = remove_path(output_dir) {
            warn!(output_dir = %output_dir.display(), err = %err, "failed to remove partial output");
            self.reporter.warn(&format!(
                "failed to remove partial output {}: {err}",
                output_dir.display()
            ));
        }
    }
}

/// True for anything at `path`, including dangling symlinks.
fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn remove_path(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::core::staging::StagePhase;
    use crate::test_support::{
        RecordingReporter, ReportLevel, ScriptedRun, ScriptedRunner, read_marker, write_app,
    };

    fn spec() -> CommandSpec {
        CommandSpec::new("unzip -o -q {zip}", Duration::from_secs(5))
    }

    fn unpack_request<'a>(
        workdir: &'a Path,
        zip: &'a Path,
        output: &'a Path,
        command: &'a CommandSpec,
    ) -> UnpackRequest<'a> {
        UnpackRequest {
            zip_path: zip,
            output_dir: output,
            workdir,
            command,
            output_limit_bytes: 1000,
        }
    }

    #[test]
    fn stage_without_previous_app_is_noop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new(vec![]);
        let reporter = RecordingReporter::new();
        let manager = StageManager::new(&runner, &reporter);
        let app = temp.path().join("app");

        let mut state = manager.stage(&app).expect("stage");
        assert_eq!(state.phase(), StagePhase::Staged);
        assert!(!state.has_holding());
        assert!(!holding_path_for(&app).exists());

        assert_eq!(manager.rollback(&mut state), RollbackStatus::NotNeeded);
        manager.commit(&mut state).expect("commit");
        assert!(!holding_path_for(&app).exists());
    }

    #[test]
    fn stage_moves_previous_app_into_holding() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = temp.path().join("app");
        write_app(&app, "v1").expect("write app");
        let runner = ScriptedRunner::new(vec![]);
        let reporter = RecordingReporter::new();
        let manager = StageManager::new(&runner, &reporter);

        let state = manager.stage(&app).expect("stage");
        assert!(!app.exists());
        assert!(holding_path_for(&app).is_dir());
        assert_eq!(read_marker(&holding_path_for(&app)).expect("marker"), "v1");
        assert_eq!(state.holding_path(), Some(holding_path_for(&app).as_path()));
        assert_eq!(state.original_path(), Some(app.as_path()));
        assert!(reporter.contains("moved"));
    }

    #[test]
    fn stage_move_failure_is_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        // `<app>-holding` exceeds the file name limit, so the rename fails.
        let app = temp.path().join("a".repeat(250));
        write_app(&app, "v1").expect("write app");
        let runner = ScriptedRunner::new(vec![]);
        let reporter = RecordingReporter::new();
        let manager = StageManager::new(&runner, &reporter);

        let err = manager.stage(&app).unwrap_err();
        match &err {
            DeployError::StageMove { from, to, .. } => {
                assert_eq!(from, &app);
                assert_eq!(to, &holding_path_for(&app));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(read_marker(&app).expect("marker"), "v1");
        assert_eq!(reporter.count(ReportLevel::Error), 1);
        assert!(reporter.contains("failed to move"));
        assert_eq!(runner.calls(), 0);
    }

    #[test]
    fn stage_replaces_stale_holding_when_app_exists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = temp.path().join("app");
        write_app(&app, "v2").expect("write app");
        write_app(&holding_path_for(&app), "v0").expect("write stale");
        let runner = ScriptedRunner::new(vec![]);
        let reporter = RecordingReporter::new();
        let manager = StageManager::new(&runner, &reporter);

        manager.stage(&app).expect("stage");
        assert_eq!(read_marker(&holding_path_for(&app)).expect("marker"), "v2");
        assert!(reporter.contains("stale holding"));
    }

    #[test]
    fn stage_adopts_orphaned_holding() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = temp.path().join("app");
        write_app(&holding_path_for(&app), "v1").expect("write holding");
        let runner = ScriptedRunner::new(vec![]);
        let reporter = RecordingReporter::new();
        let manager = StageManager::new(&runner, &reporter);

        let mut state = manager.stage(&app).expect("stage");
        assert!(state.has_holding());
        assert_eq!(manager.rollback(&mut state), RollbackStatus::Restored);
        assert_eq!(read_marker(&app).expect("marker"), "v1");
    }

    #[test]
    fn unpack_succeeds_on_later_attempt_without_rollback() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = temp.path().join("app");
        let zip = temp.path().join("app-1234.zip");
        write_app(&app, "v1").expect("write app");
        let runner = ScriptedRunner::new(vec![
            ScriptedRun::failure(9, "End-of-central-directory signature not found"),
            ScriptedRun::failure(9, "End-of-central-directory signature not found"),
            ScriptedRun::success().with_app("app", "v2"),
        ]);
        let reporter = RecordingReporter::new();
        let manager = StageManager::new(&runner, &reporter);
        let command = spec();

        let mut state = manager.stage(&app).expect("stage");
        let attempts = manager
            .unpack(&mut state, &unpack_request(temp.path(), &zip, &app, &command))
            .expect("unpack");
        assert_eq!(attempts, 3);
        assert_eq!(runner.calls(), 3);
        assert_eq!(state.phase(), StagePhase::Staged);
        assert!(holding_path_for(&app).is_dir());
        assert!(reporter.contains("unpack attempt 2/5 failed"));

        manager.commit(&mut state).expect("commit");
        assert!(!holding_path_for(&app).exists());
        assert_eq!(read_marker(&app).expect("marker"), "v2");
    }

    #[test]
    fn unpack_command_runs_in_workdir_with_quoted_zip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = temp.path().join("app");
        let zip = temp.path().join("app-1234.zip");
        let runner = ScriptedRunner::new(vec![ScriptedRun::success().with_app("app", "v1")]);
        let reporter = RecordingReporter::new();
        let manager = StageManager::new(&runner, &reporter);
        let command = spec();

        let mut state = manager.stage(&app).expect("stage");
        manager
            .unpack(&mut state, &unpack_request(temp.path(), &zip, &app, &command))
            .expect("unpack");

        let requests = runner.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].workdir, temp.path());
        assert_eq!(
            requests[0].command,
            format!("unzip -o -q '{}'", zip.display())
        );
    }

    #[test]
    fn unpack_exhaustion_restores_previous_app() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = temp.path().join("app");
        let zip = temp.path().join("app-1234.zip");
        write_app(&app, "v1").expect("write app");
        let runner = ScriptedRunner::new(
            (0..6)
                .map(|_| ScriptedRun::failure(2, "corrupt").with_app("app", "partial"))
                .collect(),
        );
        let reporter = RecordingReporter::new();
        let manager = StageManager::new(&runner, &reporter);
        let command = spec();

        let mut state = manager.stage(&app).expect("stage");
        let err = manager
            .unpack(&mut state, &unpack_request(temp.path(), &zip, &app, &command))
            .unwrap_err();

        assert_eq!(runner.calls(), MAX_UNPACK_ATTEMPTS as usize);
        match err {
            DeployError::UnpackExhausted {
                attempts,
                last_failure,
                rollback,
            } => {
                assert_eq!(attempts, 5);
                assert_eq!(last_failure, "exit status 2: corrupt");
                assert_eq!(rollback, RollbackStatus::Restored);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(state.phase(), StagePhase::RolledBack);
        assert_eq!(read_marker(&app).expect("marker"), "v1");
        assert!(!holding_path_for(&app).exists());
        assert!(reporter.contains("rolled back"));
    }

    #[test]
    fn missing_output_dir_counts_as_failed_attempt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = temp.path().join("app");
        let zip = temp.path().join("app-1234.zip");
        let runner = ScriptedRunner::new(vec![
            ScriptedRun::success(),
            ScriptedRun::success().with_app("app", "v1"),
        ]);
        let reporter = RecordingReporter::new();
        let manager = StageManager::new(&runner, &reporter);
        let command = spec();

        let mut state = manager.stage(&app).expect("stage");
        let attempts = manager
            .unpack(&mut state, &unpack_request(temp.path(), &zip, &app, &command))
            .expect("unpack");
        assert_eq!(attempts, 2);
        assert!(reporter.contains("did not produce"));
    }

    #[test]
    fn rollback_failure_does_not_mask_unpack_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = temp.path().join("app");
        let zip = temp.path().join("app-1234.zip");
        write_app(&app, "v1").expect("write app");
        let runner = ScriptedRunner::new(
            (0..5)
                .map(|_| ScriptedRun::failure(1, "disk full").removing("app-holding"))
                .collect(),
        );
        let reporter = RecordingReporter::new();
        let manager = StageManager::new(&runner, &reporter);
        let command = spec();

        let mut state = manager.stage(&app).expect("stage");
        let err = manager
            .unpack(&mut state, &unpack_request(temp.path(), &zip, &app, &command))
            .unwrap_err();

        match &err {
            DeployError::UnpackExhausted { rollback, .. } => {
                assert!(matches!(rollback, RollbackStatus::Failed { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.left_in_holding());
        assert!(state.has_holding());
        assert!(reporter.contains("rollback failed"));
    }

    #[test]
    fn commit_failure_leaves_new_app_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = temp.path().join("app");
        write_app(&app, "v1").expect("write app");
        let runner = ScriptedRunner::new(vec![]);
        let reporter = RecordingReporter::new();
        let manager = StageManager::new(&runner, &reporter);

        let mut state = manager.stage(&app).expect("stage");
        write_app(&app, "v2").expect("write new app");
        // A plain file where the holding directory should be makes removal fail.
        fs::remove_dir_all(holding_path_for(&app)).expect("remove holding");
        fs::write(holding_path_for(&app), b"not a directory").expect("write file");

        let warning = manager.commit(&mut state).unwrap_err();
        assert!(matches!(warning, DeployWarning::Commit { .. }));
        assert_eq!(read_marker(&app).expect("marker"), "v2");
        assert!(reporter.contains("failed to remove previous version"));
    }

    #[test]
    fn commit_tolerates_already_removed_holding() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = temp.path().join("app");
        write_app(&app, "v1").expect("write app");
        let runner = ScriptedRunner::new(vec![]);
        let reporter = RecordingReporter::new();
        let manager = StageManager::new(&runner, &reporter);

        let mut state = manager.stage(&app).expect("stage");
        fs::remove_dir_all(holding_path_for(&app)).expect("remove holding");
        manager.commit(&mut state).expect("commit");
        assert_eq!(state.phase(), StagePhase::Committed);
    }
}

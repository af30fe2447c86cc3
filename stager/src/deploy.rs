//! Orchestration for a single deployment attempt.
//!
//! Steps run strictly in order and short-circuit on the first fatal error:
//! resolve pointer, stage the previous app, download, unpack (with retry and
//! rollback), commit, archive cleanup, best-effort dependency install.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::staging::StagingState;
use crate::core::types::{DeploymentTarget, ObjectLocation};
use crate::error::{DeployError, DeployWarning, RollbackStatus};
use crate::io::command::{CommandRequest, CommandRunner, CommandSpec, run_to_completion};
use crate::io::config::StagerConfig;
use crate::io::pointer::resolve_pointer;
use crate::io::report::Reporter;
use crate::io::stage::{StageManager, UnpackRequest};
use crate::io::storage::StorageClient;

/// Immutable inputs for one deployment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    /// Location of the pointer document.
    pub pointer: ObjectLocation,
    /// Directory that holds the app, its holding sibling and the archive.
    pub workdir: PathBuf,
    pub unpack: CommandSpec,
    /// Dependency install command run inside the app directory.
    pub install: Option<CommandSpec>,
    pub output_limit_bytes: usize,
    /// Restore the previous app when the download fails.
    pub rollback_on_download_failure: bool,
    /// Keep the archive after a successful unpack.
    pub keep_archive: bool,
}

impl DeploymentRequest {
    pub fn from_config(cfg: &StagerConfig) -> Self {
        let install = if cfg.install.command.trim().is_empty() {
            None
        } else {
            Some(CommandSpec::new(
                cfg.install.command.clone(),
                Duration::from_secs(cfg.install.timeout_secs),
            ))
        };
        Self {
            pointer: cfg.pointer.location(),
            workdir: cfg.workdir.clone(),
            unpack: CommandSpec::new(
                cfg.unpack.command.clone(),
                Duration::from_secs(cfg.unpack.timeout_secs),
            ),
            install,
            output_limit_bytes: cfg.output_limit_bytes,
            rollback_on_download_failure: cfg.rollback_on_download_failure,
            keep_archive: cfg.keep_archive,
        }
    }
}

/// Result of a successful deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    /// App directory name relative to the working directory.
    pub output_path: String,
    /// `workdir` joined with `output_path`.
    pub output_dir: PathBuf,
    /// Attempt on which the unpack succeeded (1-indexed).
    pub unpack_attempts: u32,
    /// Non-fatal problems that were reported along the way.
    pub warnings: Vec<DeployWarning>,
}

/// Run one deployment attempt end to end.
///
/// Returns the deployed output path, or the first fatal error. Warnings never
/// turn a deployment into a failure.
#[instrument(skip_all, fields(pointer = %request.pointer, workdir = %request.workdir.display()))]
pub fn run_deploy<S, C, R>(
    request: &DeploymentRequest,
    storage: &S,
    runner: &C,
    reporter: &R,
) -> Result<DeployOutcome, DeployError>
where
    S: StorageClient + ?Sized,
    C: CommandRunner + ?Sized,
    R: Reporter + ?Sized,
{
    let target = resolve_pointer(storage, reporter, &request.pointer)?;
    let output_dir = request.workdir.join(&target.output_path);
    let zip_path = request.workdir.join(&target.zip_file_name);
    let manager = StageManager::new(runner, reporter);

    let mut state = manager.stage(&output_dir)?;

    download_artifact(
        storage,
        reporter,
        &manager,
        &mut state,
        request,
        &target,
        &zip_path,
    )?;

    let unpack_attempts = manager.unpack(
        &mut state,
        &UnpackRequest {
            zip_path: &zip_path,
            output_dir: &output_dir,
            workdir: &request.workdir,
            command: &request.unpack,
            output_limit_bytes: request.output_limit_bytes,
        },
    )?;

    let mut warnings = Vec::new();
    if let Err(warning) = manager.commit(&mut state) {
        warnings.push(warning);
    }

    if !request.keep_archive
        && let Err(warning) = remove_archive(reporter, &zip_path)
    {
        warnings.push(warning);
    }

    if let Some(install) = &request.install
        && let Err(warning) = install_dependencies(
            runner,
            reporter,
            install,
            &output_dir,
            request.output_limit_bytes,
        )
    {
        warnings.push(warning);
    }

    info!(
        output_path = %target.output_path,
        unpack_attempts,
        warnings = warnings.len(),
        "deployment complete"
    );
    reporter.info(&format!("deployed {}", target.output_path));
    Ok(DeployOutcome {
        output_path: target.output_path,
        output_dir,
        unpack_attempts,
        warnings,
    })
}

fn download_artifact<S, C, R>(
    storage: &S,
    reporter: &R,
    manager: &StageManager<'_, C, R>,
    state: &mut StagingState,
    request: &DeploymentRequest,
    target: &DeploymentTarget,
    zip_path: &Path,
) -> Result<(), DeployError>
where
    S: StorageClient + ?Sized,
    C: CommandRunner + ?Sized,
    R: Reporter + ?Sized,
{
    reporter.info(&format!(
        "downloading {} to {}",
        target.artifact,
        zip_path.display()
    ));
    match storage.download_object(&target.artifact, zip_path) {
        Ok(bytes) => {
            debug!(bytes, "artifact downloaded");
            reporter.info(&format!("downloaded {bytes} bytes"));
            Ok(())
        }
        Err(source) => {
            warn!(err = %source, "artifact download failed");
            reporter.error(&format!("download of {} failed: {source}", target.artifact));
            discard_partial_archive(zip_path);

            let rollback = if request.rollback_on_download_failure {
                manager.rollback(state)
            } else {
                match state.holding_path() {
                    Some(holding) => {
                        reporter.warn(&format!(
                            "previous version left in {} (rollback on download failure disabled)",
                            holding.display()
                        ));
                        RollbackStatus::Skipped {
                            holding: holding.to_path_buf(),
                        }
                    }
                    None => RollbackStatus::NotNeeded,
                }
            };
            Err(DeployError::ArtifactDownload {
                location: target.artifact.clone(),
                source,
                rollback,
            })
        }
    }
}

fn discard_partial_archive(zip_path: &Path) {
    match fs::remove_file(zip_path) {
        Ok(()) => debug!(zip = %zip_path.display(), "removed partial archive"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(zip = %zip_path.display(), err = %err, "failed to remove partial archive"),
    }
}

fn remove_archive<R: Reporter + ?Sized>(reporter: &R, zip_path: &Path) -> Result<(), DeployWarning> {
    match fs::remove_file(zip_path) {
        Ok(()) => {
            debug!(zip = %zip_path.display(), "archive removed");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            reporter.warn(&format!(
                "failed to remove archive {}: {err}",
                zip_path.display()
            ));
            Err(DeployWarning::ArchiveCleanup {
                path: zip_path.to_path_buf(),
                reason: err.to_string(),
            })
        }
    }
}

fn install_dependencies<C, R>(
    runner: &C,
    reporter: &R,
    install: &CommandSpec,
    output_dir: &Path,
    output_limit_bytes: usize,
) -> Result<(), DeployWarning>
where
    C: CommandRunner + ?Sized,
    R: Reporter + ?Sized,
{
    reporter.info(&format!(
        "installing dependencies in {}",
        output_dir.display()
    ));
    let request = CommandRequest {
        command: install.render(Path::new(""), output_dir),
        workdir: output_dir.to_path_buf(),
        timeout: install.timeout,
        output_limit_bytes,
    };
    match run_to_completion(runner, &request) {
        Ok(_) => {
            reporter.info("dependencies installed");
            Ok(())
        }
        Err(reason) => {
            warn!(reason = %reason, "dependency install failed");
            reporter.warn(&format!("dependency install failed: {reason}"));
            Err(DeployWarning::DependencyInstall {
                dir: output_dir.to_path_buf(),
                reason,
            })
        }
    }
}

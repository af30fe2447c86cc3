//! Staged application deployment from object storage.
//!
//! Reads a pointer object naming the current artifact, swaps the previously
//! deployed app for the new one, and rolls back when the new archive cannot be
//! unpacked.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use stager::deploy::{DeploymentRequest, run_deploy};
use stager::error::DeployError;
use stager::exit_codes;
use stager::io::command::ShellRunner;
use stager::io::config::{DEFAULT_CONFIG_FILE, StagerConfig, load_config, write_config};
use stager::io::pointer::resolve_pointer;
use stager::io::report::{ConsoleReporter, Reporter};
use stager::io::storage::ObjectStoreClient;
use stager::logging;

#[derive(Parser)]
#[command(
    name = "stager",
    version,
    about = "Stage an application from object storage with rollback"
)]
struct Cli {
    /// Emit debug diagnostics on stderr (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    /// Path to the TOML config file (defaults apply when it is missing).
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Override the pointer bucket.
    #[arg(long)]
    bucket: Option<String>,
    /// Override the pointer key.
    #[arg(long)]
    key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Resolve the pointer and print the artifact location and output path as JSON.
    Resolve {
        #[command(flatten)]
        args: ConfigArgs,
    },
    /// Deploy the artifact the pointer currently names.
    Deploy {
        #[command(flatten)]
        args: ConfigArgs,
        /// Override the working directory.
        #[arg(long)]
        workdir: Option<PathBuf>,
        /// Only print the deployed output path and problems.
        #[arg(short, long)]
        quiet: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { config, force } => cmd_init(&config, force),
        Command::Resolve { args } => cmd_resolve(&args),
        Command::Deploy {
            args,
            workdir,
            quiet,
        } => cmd_deploy(&args, workdir, quiet),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    write_config(path, &StagerConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_resolve(args: &ConfigArgs) -> Result<i32> {
    let cfg = load_with_overrides(args, None)?;
    let storage = ObjectStoreClient::new(&cfg.storage)?;
    let reporter = ConsoleReporter::new(true);

    match resolve_pointer(&storage, &reporter, &cfg.pointer.location()) {
        Ok(target) => {
            print_json(&target)?;
            Ok(exit_codes::OK)
        }
        Err(err) => {
            reporter.error(&err.to_string());
            Ok(exit_code_for(&err))
        }
    }
}

fn cmd_deploy(args: &ConfigArgs, workdir: Option<PathBuf>, quiet: bool) -> Result<i32> {
    let cfg = load_with_overrides(args, workdir)?;
    let storage = ObjectStoreClient::new(&cfg.storage)?;
    let reporter = ConsoleReporter::new(quiet);
    let request = DeploymentRequest::from_config(&cfg);

    match run_deploy(&request, &storage, &ShellRunner, &reporter) {
        Ok(outcome) => {
            if quiet {
                println!("{}", outcome.output_path);
            }
            Ok(exit_codes::OK)
        }
        Err(err) => {
            reporter.error(&format!("deployment failed: {err}"));
            Ok(exit_code_for(&err))
        }
    }
}

fn load_with_overrides(args: &ConfigArgs, workdir: Option<PathBuf>) -> Result<StagerConfig> {
    let mut cfg = load_config(&args.config)?;
    if let Some(bucket) = &args.bucket {
        cfg.pointer.bucket = bucket.clone();
    }
    if let Some(key) = &args.key {
        cfg.pointer.key = key.clone();
    }
    if let Some(workdir) = workdir {
        cfg.workdir = workdir;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn exit_code_for(err: &DeployError) -> i32 {
    match err {
        DeployError::Configuration(_) => exit_codes::INVALID,
        err if err.left_in_holding() => exit_codes::NEEDS_ATTENTION,
        _ => exit_codes::FAILED,
    }
}

/// Print `value` as pretty JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stager::error::RollbackStatus;

    #[test]
    fn parse_deploy_with_overrides() {
        let cli = Cli::parse_from([
            "stager",
            "deploy",
            "--bucket",
            "b",
            "--key",
            "k.json",
            "--workdir",
            "/srv/apps",
            "-q",
        ]);
        match cli.command {
            Command::Deploy {
                args,
                workdir,
                quiet,
            } => {
                assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_FILE));
                assert_eq!(args.bucket.as_deref(), Some("b"));
                assert_eq!(args.key.as_deref(), Some("k.json"));
                assert_eq!(workdir, Some(PathBuf::from("/srv/apps")));
                assert!(quiet);
            }
            _ => panic!("expected deploy"),
        }
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["stager", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true, .. }));
    }

    #[test]
    fn exit_codes_follow_rollback_outcome() {
        let config = DeployError::Configuration("missing".to_string());
        assert_eq!(exit_code_for(&config), exit_codes::INVALID);

        let restored = DeployError::UnpackExhausted {
            attempts: 5,
            last_failure: "corrupt".to_string(),
            rollback: RollbackStatus::Restored,
        };
        assert_eq!(exit_code_for(&restored), exit_codes::FAILED);

        let stuck = DeployError::UnpackExhausted {
            attempts: 5,
            last_failure: "corrupt".to_string(),
            rollback: RollbackStatus::Failed {
                holding: PathBuf::from("app-holding"),
                reason: "busy".to_string(),
            },
        };
        assert_eq!(exit_code_for(&stuck), exit_codes::NEEDS_ATTENTION);
    }

    #[test]
    fn overrides_replace_file_values() {
        let temp = tempfile::tempdir().expect("tempdir");
        let args = ConfigArgs {
            config: temp.path().join("missing.toml"),
            bucket: Some("b".to_string()),
            key: Some("k.json".to_string()),
        };
        let cfg = load_with_overrides(&args, Some(temp.path().to_path_buf())).expect("load");
        assert_eq!(cfg.pointer.bucket, "b");
        assert_eq!(cfg.pointer.key, "k.json");
        assert_eq!(cfg.workdir, temp.path());
    }
}

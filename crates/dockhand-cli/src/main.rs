use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::SecondsFormat;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;
use serde_json::json;

use dockhand::artifact::{ArtifactRegistry, FsArtifactValidator, parse_artifact_filename};
use dockhand::backup::FsBackupStore;
use dockhand::build::{self, BuildRequest};
use dockhand::build_tool::CommandBuildTool;
use dockhand::check::has_blocking_failure;
use dockhand::config::{CONFIG_FILE, CliOverrides, DockhandConfig, RuntimeOptions};
use dockhand::consistency::{JourneyTrace, health_table_parity, validate_counts};
use dockhand::events::{EventLog, events_path};
use dockhand::gate::{CommandPublisher, QualityGate};
use dockhand::health::{HealthCheck, HealthChecker};
use dockhand::index::IndexClient;
use dockhand::install::{self, InstallPorts, InstallRequest};
use dockhand::package_manager::PipxPackageManager;
use dockhand::ports::{BackupPort, BuildPort, find_installed};
use dockhand::preflight;
use dockhand::render::{Mark, render_blocking_report, render_checks, render_health};
use dockhand::repair::repair_all;
use dockhand::report::Reporter;
use dockhand::rollback;
use dockhand::state;
use dockhand::types::{
    BackupInfo, BuildResult, EventType, InstallResult, OutputMode, RollbackResult,
};

mod progress;

#[derive(Parser, Debug)]
#[command(name = "dockhand", version)]
#[command(about = "Build, install and roll back versioned package artifacts")]
struct Cli {
    /// Path to the config file (default: ./dockhand.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Application config directory holding backups, history and the install manifest.
    ///
    /// Defaults to $DOCKHAND_HOME, then the platform config directory.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Package name, overriding [package].name
    #[arg(long, global = true)]
    package: Option<String>,

    /// Answer yes to every confirmation prompt.
    #[arg(short = 'y', long = "yes", global = true)]
    yes: bool,

    /// Age after which a held lock is considered stale (e.g. 30m)
    #[arg(long, global = true)]
    lock_timeout: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Args, Debug, Default)]
struct BuildArgs {
    /// Release the next version is computed from (default: the latest git tag)
    #[arg(long)]
    current_version: Option<String>,

    /// Pre-release suffix appended to the computed version (e.g. rc1)
    #[arg(long = "pre")]
    prerelease: Option<String>,

    /// Directory the artifact is written to (default: build.output_dir)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Fail when the artifact's version differs from the computed one.
    #[arg(long)]
    require_version_match: bool,
}

#[derive(Args, Debug, Default)]
struct InstallArgs {
    /// Pass --force to the package manager even for a fresh install.
    #[arg(long)]
    force: bool,

    /// Leave a failed install as it is instead of rolling back.
    #[arg(long)]
    no_rollback: bool,

    /// Backups to retain after this install (default: backup.keep)
    #[arg(long)]
    keep_backups: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute the next version, build the artifact and validate it.
    Build(BuildArgs),
    /// Install an artifact (default: the newest one in the output directory).
    Install {
        /// Artifact to install
        artifact: Option<PathBuf>,

        #[command(flatten)]
        install: InstallArgs,
    },
    /// Back up the config directory and uninstall the package.
    Uninstall,
    /// Build, then install the fresh artifact in one run.
    Update {
        #[command(flatten)]
        build: BuildArgs,

        #[command(flatten)]
        install: InstallArgs,
    },
    /// Restore a backup of the config directory (default: the newest).
    Rollback {
        /// Backup directory to restore
        #[arg(long, conflicts_with = "list")]
        to: Option<PathBuf>,

        /// List backups instead of restoring one.
        #[arg(long)]
        list: bool,
    },
    /// Manage config-directory backups.
    Backups {
        #[command(subcommand)]
        cmd: BackupsCommand,
    },
    /// Run every pre-flight check and the health battery.
    Doctor {
        /// Offer to run the fix command of each repairable failure.
        #[arg(long)]
        fix: bool,
    },
    /// Run the CI quality gate against the newest built artifact.
    Gate,
    /// Print the tool version and what is installed.
    Version,
    /// Create or validate dockhand.toml.
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum BackupsCommand {
    /// List backups, newest first.
    List,
    /// Delete all but the newest backups.
    Cleanup {
        /// Backups to keep (default: backup.keep)
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write a commented default dockhand.toml.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Parse and validate the config file.
    Validate,
}

struct CliReporter {
    mode: OutputMode,
}

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        if self.mode != OutputMode::Json {
            eprintln!("[info] {msg}");
        }
    }

    fn warn(&mut self, msg: &str) {
        if self.mode != OutputMode::Json {
            eprintln!("[warn] {msg}");
        }
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

/// Install result plus the rollback it triggered, if any.
#[derive(Serialize)]
struct InstallReport {
    install: InstallResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    rollback: Option<RollbackResult>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mode = OutputMode::from_env();
    let mut reporter = CliReporter { mode };

    match &cli.cmd {
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "dockhand", &mut io::stdout());
            return Ok(());
        }
        Commands::Config { cmd } => return run_config(cmd, cli.config.as_deref()),
        _ => {}
    }

    let project_root = env::current_dir().context("failed to determine current directory")?;
    let config = load_config(cli.config.as_deref(), &project_root)?;
    let opts = config.build_runtime_options(&project_root, overrides(&cli)?);

    match cli.cmd {
        Commands::Build(_) => {
            let mut registry = ArtifactRegistry::new();
            let result = run_build(&opts, &mut registry, &mut reporter)?;
            if mode == OutputMode::Json {
                print_json(&result)?;
            } else {
                print_build(&result, mode);
            }
            ensure(result.success, "build failed")
        }
        Commands::Install { artifact, .. } => {
            let report = run_install(&opts, mode, &ArtifactRegistry::new(), artifact, &mut reporter)?;
            if mode == OutputMode::Json {
                print_json(&report)?;
            } else {
                print_install(&report, mode);
            }
            ensure(report.install.success, "install failed")
        }
        Commands::Uninstall => run_uninstall(&opts, mode, &mut reporter),
        Commands::Update { .. } => run_update(&opts, mode, &mut reporter),
        Commands::Rollback { to, list } => run_rollback(&opts, mode, to, list, &mut reporter),
        Commands::Backups { cmd } => run_backups(&opts, mode, cmd),
        Commands::Doctor { fix } => run_doctor(&opts, mode, fix, &mut reporter),
        Commands::Gate => run_gate(&opts, mode),
        Commands::Version => run_version(&opts, mode),
        Commands::Config { .. } | Commands::Completions { .. } => Ok(()),
    }
}

fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}

fn load_config(path: Option<&Path>, project_root: &Path) -> Result<DockhandConfig> {
    let config = match path {
        Some(p) => DockhandConfig::load_from_file(p)?,
        None => DockhandConfig::load_from_project(project_root)?.unwrap_or_default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn overrides(cli: &Cli) -> Result<CliOverrides> {
    let mut o = CliOverrides {
        package_name: cli.package.clone(),
        config_dir: cli.config_dir.clone(),
        lock_timeout: cli.lock_timeout.as_deref().map(parse_duration).transpose()?,
        assume_yes: cli.yes,
        ..CliOverrides::default()
    };

    let (build, install) = match &cli.cmd {
        Commands::Build(b) => (Some(b), None),
        Commands::Install { install, .. } => (None, Some(install)),
        Commands::Update { build, install } => (Some(build), Some(install)),
        _ => (None, None),
    };
    if let Some(b) = build {
        o.current_version = b.current_version.clone();
        o.prerelease = b.prerelease.clone();
        o.output_dir = b.output_dir.clone();
        o.require_version_match = b.require_version_match;
    }
    if let Some(i) = install {
        o.force = i.force;
        o.no_rollback = i.no_rollback;
        o.backup_keep = i.keep_backups;
    }
    Ok(o)
}

fn ensure(ok: bool, message: &str) -> Result<()> {
    if !ok {
        bail!("{message}");
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to serialize output to JSON")?;
    println!("{out}");
    Ok(())
}

fn package_manager(opts: &RuntimeOptions) -> PipxPackageManager {
    PipxPackageManager::from_config(
        &opts.package_manager,
        &opts.build.artifact_extensions,
        &opts.project_root,
    )
}

fn backup_store(opts: &RuntimeOptions) -> FsBackupStore {
    FsBackupStore::new(
        opts.backups_dir(),
        opts.backup.prefix.clone(),
        opts.backup.include.clone(),
    )
}

fn package_from_artifact(path: &Path, extensions: &[String]) -> Option<String> {
    path.file_name()
        .and_then(|n| parse_artifact_filename(&n.to_string_lossy(), extensions))
        .map(|a| a.package_name)
}

/// `--package`/`[package].name`, then the install manifest.
fn known_package(opts: &RuntimeOptions) -> Option<String> {
    opts.package_name.clone().or_else(|| {
        state::load_manifest(&opts.config_dir)
            .ok()
            .flatten()
            .map(|m| m.package)
    })
}

fn unattended(opts: &RuntimeOptions, mode: OutputMode) -> bool {
    opts.assume_yes || mode.is_unattended()
}

fn run_build(
    opts: &RuntimeOptions,
    registry: &mut ArtifactRegistry,
    reporter: &mut dyn Reporter,
) -> Result<BuildResult> {
    let build_tool = CommandBuildTool::from_config(&opts.build, &opts.project_root);
    let validator = FsArtifactValidator::new(
        opts.build.artifact_extensions.clone(),
        opts.package_name.clone(),
    );
    let checks = preflight::build_registry(opts)?;
    let (current_version, commit_messages) =
        build::collect_version_inputs(&opts.project_root, opts.current_version.as_deref())?;

    let request = BuildRequest {
        current_version,
        commit_messages,
        prerelease: opts.prerelease.clone(),
        output_dir: opts.output_dir.clone(),
        clean_first: true,
        require_version_match: opts.build.require_version_match,
    };
    let result = build::run_build(&checks, &build_tool, &validator, &request, registry, reporter)?;

    let label = match (&opts.package_name, &result.version) {
        (Some(name), Some(version)) => format!("{name}@{version}"),
        (Some(name), None) => name.clone(),
        (None, _) => "all".to_string(),
    };
    let mut events = EventLog::new();
    events.emit(
        &label,
        EventType::BuildFinished {
            success: result.success,
            artifact: result.artifact_path.clone(),
        },
    );
    events.write_to_file(&events_path(&opts.config_dir))?;

    Ok(result)
}

fn print_build(result: &BuildResult, mode: OutputMode) {
    print!("{}", render_checks(&result.pre_flight_results, mode));
    print!("{}", render_blocking_report(&result.pre_flight_results, mode));
    if let Some(c) = &result.candidate {
        println!("version: {} -> {} ({})", c.current_version, c.next_version, c.bump_type);
    }
    if let Some(path) = &result.artifact_path {
        println!("artifact: {}", path.display());
    }
    if let Some(err) = &result.error_message {
        println!("error: {err}");
    }
}

fn run_install(
    opts: &RuntimeOptions,
    mode: OutputMode,
    registry: &ArtifactRegistry,
    artifact: Option<PathBuf>,
    reporter: &mut dyn Reporter,
) -> Result<InstallReport> {
    let extensions = &opts.build.artifact_extensions;
    let pm = package_manager(opts);
    let validator = FsArtifactValidator::new(extensions.clone(), None);
    let backups = backup_store(opts);

    let artifact = match artifact {
        Some(path) => Some(path),
        None if registry.artifact_path().is_some() => None,
        None => CommandBuildTool::from_config(&opts.build, &opts.project_root)
            .locate_artifact(&opts.output_dir),
    };
    let target = artifact.clone().or_else(|| registry.artifact_path());
    let package = opts.package_name.clone().or_else(|| {
        target
            .as_deref()
            .and_then(|p| package_from_artifact(p, extensions))
    });

    let checker = package
        .as_deref()
        .map(|name| HealthChecker::new(&pm, name, &opts.config_dir, opts.health.clone()));
    let ports = InstallPorts {
        package_manager: &pm,
        validator: &validator,
        backups: &backups,
        health: checker.as_ref().map(|c| c as &dyn HealthCheck),
    };
    let checks = preflight::install_registry(opts, &pm)?;
    let request = InstallRequest {
        artifact,
        expected_package: opts.package_name.clone(),
        config_dir: opts.config_dir.clone(),
        lock_timeout: opts.lock_timeout,
        force: opts.force,
        backup_keep: Some(opts.backup.keep),
    };

    let result = install::run_install(&checks, &ports, registry, &request, reporter)?;
    let rollback = if result.success {
        None
    } else {
        let health = checker.as_ref().map(|c| c as &dyn HealthCheck);
        roll_back_failed_install(opts, mode, &backups, health, &result, reporter)?
    };

    Ok(InstallReport {
        install: result,
        rollback,
    })
}

/// Auto-rollback after a failed install: always when partial-install markers
/// were left behind, and after confirmation when a backup exists.
fn roll_back_failed_install(
    opts: &RuntimeOptions,
    mode: OutputMode,
    backups: &FsBackupStore,
    health: Option<&dyn HealthCheck>,
    result: &InstallResult,
    reporter: &mut dyn Reporter,
) -> Result<Option<RollbackResult>> {
    let partial = state::has_partial_install(&opts.config_dir);
    if opts.no_rollback || (result.backup.is_none() && !partial) {
        return Ok(None);
    }

    if result.backup.is_some()
        && !unattended(opts, mode)
        && !progress::confirm("Roll back to the backup taken before this install? [Y/n]", true)
    {
        reporter.warn("rollback declined; run `dockhand rollback` to restore it later");
        return Ok(None);
    }

    let error = result.error_message.as_deref().unwrap_or("install failed");
    rollback::auto_rollback(backups, health, &opts.config_dir, error, opts.lock_timeout, reporter)
        .map(Some)
}

fn print_install(report: &InstallReport, mode: OutputMode) {
    let result = &report.install;
    print!("{}", render_checks(&result.pre_flight_results, mode));
    print!("{}", render_blocking_report(&result.pre_flight_results, mode));

    if let Some(package) = &result.package {
        println!("package: {package}");
    }
    if let Some(version) = &result.version {
        println!("version: {version}");
    }
    if let Some(path) = result.upgrade_path {
        println!("upgrade: {path}");
    }
    let phases: Vec<&str> = result.phases_completed.iter().map(|p| p.as_str()).collect();
    println!("phases: {}", phases.join(" -> "));
    if let Some(backup) = &result.backup {
        println!("backup: {}", backup.path.display());
    }
    if !result.health_results.is_empty() {
        print!("{}", render_health(&result.health_results, mode));
    }
    for warning in &result.verification_warnings {
        println!("warning: {warning}");
    }
    if let Some(err) = &result.error_message {
        match result.phase_reached() {
            Some(phase) => println!("error: install failed during {phase}: {err}"),
            None => println!("error: {err}"),
        }
    }
    if let Some(rollback) = &report.rollback {
        print_rollback(rollback);
    }
}

fn print_rollback(result: &RollbackResult) {
    match (&result.backup_path, result.success) {
        (Some(path), true) => println!("rollback: restored {}", path.display()),
        _ => println!(
            "rollback: failed: {}",
            result.error_message.as_deref().unwrap_or("unknown error")
        ),
    }
    for path in &result.cleaned_paths {
        println!("removed: {}", path.display());
    }
    if let Some(status) = result.health_status {
        println!("health: {status}");
    }
}

fn run_uninstall(opts: &RuntimeOptions, mode: OutputMode, reporter: &mut dyn Reporter) -> Result<()> {
    let Some(package) = known_package(opts) else {
        bail!("no package to uninstall; set [package].name in {CONFIG_FILE} or pass --package");
    };
    if !unattended(opts, mode) && !progress::confirm(&format!("Uninstall {package}? [y/N]"), false) {
        bail!("uninstall of {package} declined");
    }

    let pm = package_manager(opts);
    let backups = backup_store(opts);
    let result = install::run_uninstall(
        &pm,
        &backups,
        &package,
        &opts.config_dir,
        opts.lock_timeout,
        reporter,
    )?;

    if mode == OutputMode::Json {
        print_json(&result)?;
    } else {
        println!("package: {}", result.package);
        if let Some(backup) = &result.backup {
            println!("backup: {}", backup.path.display());
        }
        match &result.error_message {
            Some(err) => println!("error: {err}"),
            None => println!("uninstalled"),
        }
    }
    ensure(result.success, "uninstall failed")
}

fn run_update(opts: &RuntimeOptions, mode: OutputMode, reporter: &mut dyn Reporter) -> Result<()> {
    let mut registry = ArtifactRegistry::new();
    let build_result = run_build(opts, &mut registry, reporter)?;
    if !build_result.success {
        if mode == OutputMode::Json {
            print_json(&json!({ "build": build_result }))?;
        } else {
            print_build(&build_result, mode);
        }
        bail!("build failed");
    }

    let report = run_install(opts, mode, &registry, None, reporter)?;
    let manifest = if report.install.success {
        state::load_manifest(&opts.config_dir)?
    } else {
        None
    };
    let drift = JourneyTrace::collect(
        Some(&build_result),
        &registry,
        Some(&report.install),
        manifest.as_ref(),
    )
    .drift();
    for stage in &drift {
        reporter.warn(&format!("version or artifact drift at stage {stage}"));
    }
    warn_on_health_disparity(opts, &report.install, reporter);

    if mode == OutputMode::Json {
        print_json(&json!({
            "build": build_result,
            "install": report.install,
            "rollback": report.rollback,
            "drift": drift,
        }))?;
    } else {
        print_build(&build_result, mode);
        println!();
        print_install(&report, mode);
    }
    ensure(report.install.success, "install failed")
}

/// Re-run the health battery the way `doctor` would and require the same
/// table the install verification produced.
fn warn_on_health_disparity(opts: &RuntimeOptions, install: &InstallResult, reporter: &mut dyn Reporter) {
    if !install.success || install.health_results.is_empty() {
        return;
    }
    let Some(package) = &install.package else {
        return;
    };
    let pm = package_manager(opts);
    let recheck = HealthChecker::new(&pm, package.as_str(), &opts.config_dir, opts.health.clone())
        .check_health(install.version.as_deref());
    let parity = health_table_parity(
        &[
            ("install".to_string(), install.health_results.clone()),
            ("doctor".to_string(), recheck),
        ],
        OutputMode::Plain,
    );
    if !parity.consistent {
        reporter.warn("`dockhand doctor` reports different health than the install verification");
    }
}

fn run_rollback(
    opts: &RuntimeOptions,
    mode: OutputMode,
    to: Option<PathBuf>,
    list: bool,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let backups = backup_store(opts);
    if list {
        return print_backups(&backups.list_backups()?, mode);
    }

    let target = match to {
        Some(path) => path,
        None => match rollback::newest_backup(&backups)? {
            Some(backup) => backup.path,
            None => bail!("{}", rollback::NO_BACKUPS),
        },
    };

    let pm = package_manager(opts);
    let checker = known_package(opts)
        .map(|name| HealthChecker::new(&pm, name, &opts.config_dir, opts.health.clone()));
    let result = rollback::manual_rollback(
        &backups,
        checker.as_ref().map(|c| c as &dyn HealthCheck),
        &target,
        &opts.config_dir,
        opts.lock_timeout,
        reporter,
    )?;

    if mode == OutputMode::Json {
        print_json(&result)?;
    } else {
        print_rollback(&result);
    }
    ensure(result.success, "rollback failed")
}

fn print_backups(backups: &[BackupInfo], mode: OutputMode) -> Result<()> {
    if mode == OutputMode::Json {
        return print_json(&backups);
    }
    if backups.is_empty() {
        println!("{}", rollback::NO_BACKUPS);
    }
    for b in backups {
        println!(
            "{}  {:>10} bytes  {}",
            b.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            b.size_bytes,
            b.path.display()
        );
    }
    Ok(())
}

fn run_backups(opts: &RuntimeOptions, mode: OutputMode, cmd: BackupsCommand) -> Result<()> {
    let backups = backup_store(opts);
    match cmd {
        BackupsCommand::List => print_backups(&backups.list_backups()?, mode),
        BackupsCommand::Cleanup { keep } => {
            let report = backups.cleanup_old_backups(keep.unwrap_or(opts.backup.keep))?;
            if mode == OutputMode::Json {
                print_json(&report)
            } else {
                println!("removed {} backup(s), kept {}", report.removed, report.kept);
                Ok(())
            }
        }
    }
}

fn run_doctor(
    opts: &RuntimeOptions,
    mode: OutputMode,
    fix: bool,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let pm = package_manager(opts);
    let index = IndexClient::new(&opts.index.api_base, opts.index.timeout)?;
    let checks = preflight::doctor_registry(opts, &pm, &index)?;
    let mut results = checks.run_all_guarded();

    let mut repairs = Vec::new();
    if fix {
        let mut io = progress::TerminalIo::new(mode);
        repairs = repair_all(
            &results,
            unattended(opts, mode),
            &mut io,
            &opts.project_root,
            Some(opts.package_manager.timeout),
        );
        if repairs.is_empty() {
            reporter.info("nothing to repair");
        }
        for (id, repair) in &repairs {
            if repair.success {
                reporter.info(&repair.message);
            } else {
                reporter.warn(&format!("{id}: {}", repair.message));
            }
        }
        if repairs.iter().any(|(_, r)| r.success) {
            reporter.info("re-running checks after repair...");
            results = checks.run_all_guarded();
        }
    }

    let manifest = state::load_manifest(&opts.config_dir)?;
    let package = opts
        .package_name
        .clone()
        .or_else(|| manifest.as_ref().map(|m| m.package.clone()));
    let checker = package
        .as_deref()
        .map(|name| HealthChecker::new(&pm, name, &opts.config_dir, opts.health.clone()));
    let health = checker
        .as_ref()
        .map(|c| c.check_health(manifest.as_ref().map(|m| m.version.as_str())));
    if let (Some(checker), Some(recorded)) = (
        &checker,
        manifest.as_ref().and_then(|m| m.component_counts),
    ) && let Some(current) = checker.component_counts()
    {
        let report = validate_counts(&[
            ("install".to_string(), recorded),
            ("doctor".to_string(), current),
        ]);
        if !report.consistent {
            reporter.warn(&format!(
                "installed components changed since install: {recorded} then, {current} now"
            ));
        }
    }

    if mode == OutputMode::Json {
        let repairs: Vec<_> = repairs
            .iter()
            .map(|(id, r)| json!({ "id": id, "result": r }))
            .collect();
        print_json(&json!({
            "checks": results,
            "repairs": repairs,
            "health": health,
        }))?;
    } else {
        print!("{}", render_checks(&results, mode));
        print!("{}", render_blocking_report(&results, mode));
        println!();
        match &health {
            Some(h) => print!("{}", render_health(h, mode)),
            None => println!("health: skipped (no package configured or installed)"),
        }
    }
    ensure(!has_blocking_failure(&results), "doctor found blocking problems")
}

fn run_gate(opts: &RuntimeOptions, mode: OutputMode) -> Result<()> {
    let build_tool = CommandBuildTool::from_config(&opts.build, &opts.project_root);
    let pm = package_manager(opts);
    let publisher = CommandPublisher {
        check_command: opts.gate.check_command.clone(),
        upload_command: opts.gate.upload_command.clone(),
        working_dir: opts.project_root.clone(),
        timeout: Some(opts.build.timeout),
    };

    let package = opts.package_name.clone().or_else(|| {
        build_tool
            .locate_artifact(&opts.output_dir)
            .and_then(|p| package_from_artifact(&p, &opts.build.artifact_extensions))
    });
    let checker = package
        .as_deref()
        .map(|name| HealthChecker::new(&pm, name, &opts.config_dir, opts.health.clone()));

    let mut gate = QualityGate::new(
        &build_tool,
        &publisher,
        &pm,
        checker.as_ref().map(|c| c as &dyn HealthCheck),
        opts.output_dir.clone(),
        opts.build.artifact_extensions.clone(),
        opts.index.staging_index_url.clone(),
    );
    let spinner = progress::Spinner::start(mode, "running quality gates");
    let result = gate.validate_all();
    spinner.finish(result.passed);

    if mode == OutputMode::Json {
        print_json(&json!({
            "result": result,
            "diagnostics": gate.get_failure_diagnostics(),
        }))?;
    } else {
        for g in &result.gate_results {
            let mark = if g.passed { Mark::Pass } else { Mark::Fail };
            println!("{} {}: {}", mark.icon(mode), g.check_name, g.message);
        }
        println!("{}", result.summary);
        if !result.passed {
            println!();
            println!("{}", gate.get_failure_diagnostics());
        }
    }
    ensure(result.passed, "quality gate failed")
}

fn run_version(opts: &RuntimeOptions, mode: OutputMode) -> Result<()> {
    let manifest = state::load_manifest(&opts.config_dir)?;
    let package = opts
        .package_name
        .clone()
        .or_else(|| manifest.as_ref().map(|m| m.package.clone()));
    let pm = package_manager(opts);
    let installed = package
        .as_deref()
        .and_then(|name| find_installed(&pm, name).ok().flatten())
        .map(|p| p.version);

    if mode == OutputMode::Json {
        return print_json(&json!({
            "dockhand": env!("CARGO_PKG_VERSION"),
            "package": package,
            "installed_version": installed,
            "manifest": manifest,
        }));
    }

    println!("dockhand {}", env!("CARGO_PKG_VERSION"));
    match &package {
        Some(name) => println!(
            "{name}: {}",
            installed.as_deref().unwrap_or("not installed")
        ),
        None => println!("package: not configured"),
    }
    if let Some(m) = &manifest {
        println!(
            "manifest: {} {} ({}, installed {})",
            m.package,
            m.version,
            m.upgrade_path,
            m.installed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        println!("artifact: {}", m.artifact_path.display());
        if let Some(sum) = &m.checksum {
            println!("sha256: {sum}");
        }
    }
    Ok(())
}

fn run_config(cmd: &ConfigCommand, path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => env::current_dir()
            .context("failed to determine current directory")?
            .join(CONFIG_FILE),
    };

    match cmd {
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists; pass --force to overwrite", path.display());
            }
            fs::write(&path, DockhandConfig::default_toml_template())
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("wrote {}", path.display());
        }
        ConfigCommand::Validate => {
            let config = DockhandConfig::load_from_file(&path)?;
            config
                .validate()
                .with_context(|| format!("{} is invalid", path.display()))?;
            println!("{} is valid", path.display());
        }
    }
    Ok(())
}

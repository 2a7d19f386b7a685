//! Install pipeline: PREFLIGHT → READINESS → BACKUP → INSTALL → VERIFICATION.
//!
//! Every phase that runs is appended to `phases_completed`, so the list is
//! always a prefix of [`InstallPhase::ORDER`] and its last entry is the phase
//! reached when the pipeline stopped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::artifact::{ArtifactRegistry, normalize_package_name};
use crate::build::report_checks;
use crate::check::{CheckRegistry, has_blocking_failure, summarize_blocking};
use crate::environment::collect_environment_fingerprint;
use crate::events::{EventLog, events_path};
use crate::health::{HealthCheck, degraded_messages, overall_status};
use crate::lock::LockFile;
use crate::ports::{
    ArtifactValidationPort, BackupPort, PackageManagerPort, find_installed,
};
use crate::report::Reporter;
use crate::state::{self, InProgressMarker, InstallManifest};
use crate::types::{
    BackupInfo, EventType, HealthStatus, InstallPhase, InstallResult, PhaseOutcome, PhaseRecord,
    UpgradePath,
};
use crate::version::{compare_versions, detect_upgrade_path, should_create_backup};

/// Ports the install pipeline talks to.
pub struct InstallPorts<'a> {
    pub package_manager: &'a dyn PackageManagerPort,
    pub validator: &'a dyn ArtifactValidationPort,
    pub backups: &'a dyn BackupPort,
    /// VERIFICATION only runs when a checker is supplied.
    pub health: Option<&'a dyn HealthCheck>,
}

#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Explicit artifact; otherwise the registry's ARTIFACT_PATH is used.
    pub artifact: Option<PathBuf>,
    /// Package the artifact must belong to, when known.
    pub expected_package: Option<String>,
    pub config_dir: PathBuf,
    pub lock_timeout: Duration,
    /// Always pass `--force` to the package manager.
    pub force: bool,
    /// Retention applied after a successful backup.
    pub backup_keep: Option<usize>,
}

/// Appends phases in canonical order and mirrors them into the event log.
struct PhaseLog {
    completed: Vec<InstallPhase>,
    outcomes: Vec<PhaseRecord>,
}

impl PhaseLog {
    fn new() -> Self {
        Self {
            completed: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    fn finish(&mut self, phase: InstallPhase, outcome: PhaseOutcome, events: &mut EventLog, package: &str) {
        debug_assert!(
            self.completed.last().is_none_or(|last| *last < phase),
            "phase {phase} recorded out of order"
        );
        events.emit(
            package,
            EventType::PhaseFinished {
                phase,
                outcome: outcome.clone(),
            },
        );
        self.completed.push(phase);
        self.outcomes.push(PhaseRecord { phase, outcome });
    }

    fn apply(self, result: &mut InstallResult) {
        result.phases_completed = self.completed;
        result.phase_outcomes = self.outcomes;
    }
}

/// Run the install pipeline.
///
/// Pipeline failures come back as `InstallResult { success: false, .. }`,
/// including marker and manifest writes that fail once INSTALL has begun.
/// `Err` is reserved for the install lock, taken before anything changes.
/// History-log write failures are warnings.
pub fn run_install(
    preflight: &CheckRegistry<'_>,
    ports: &InstallPorts<'_>,
    registry: &ArtifactRegistry,
    request: &InstallRequest,
    reporter: &mut dyn Reporter,
) -> Result<InstallResult> {
    let mut result = InstallResult::default();
    let mut phases = PhaseLog::new();
    let mut events = EventLog::new();
    let config_dir = request.config_dir.as_path();

    // PREFLIGHT
    reporter.info("running install pre-flight checks...");
    result.pre_flight_results = preflight.run_all_guarded();
    report_checks(&result.pre_flight_results, reporter);
    if has_blocking_failure(&result.pre_flight_results) {
        phases.finish(
            InstallPhase::Preflight,
            PhaseOutcome::FailedFatal {
                message: summarize_blocking(&result.pre_flight_results),
            },
            &mut events,
            "all",
        );
        phases.apply(&mut result);
        let msg = format!("[PREFLIGHT] {}", summarize_blocking(&result.pre_flight_results));
        reporter.error(&msg);
        result.error_message = Some(msg);
        return Ok(result);
    }

    let _lock = LockFile::acquire_with_timeout(config_dir, "install", request.lock_timeout)
        .context("failed to acquire install lock")?;
    phases.finish(InstallPhase::Preflight, PhaseOutcome::Completed, &mut events, "all");

    // READINESS
    let ready = match check_readiness(ports.validator, registry, request) {
        Ok(ready) => ready,
        Err(message) => {
            phases.finish(
                InstallPhase::Readiness,
                PhaseOutcome::FailedFatal {
                    message: message.clone(),
                },
                &mut events,
                "all",
            );
            return fail(result, phases, events, config_dir, "all", format!("[READINESS] {message}"), reporter);
        }
    };
    let event_package = format!("{}@{}", ready.package, ready.version);
    result.package = Some(ready.package.clone());
    result.version = Some(ready.version.clone());
    result.artifact_path = Some(ready.artifact.clone());
    phases.finish(InstallPhase::Readiness, PhaseOutcome::Completed, &mut events, &event_package);

    let installed_version = installed_version(ports.package_manager, &ready.package, config_dir, reporter);
    let upgrade_path = detect_upgrade_path(installed_version.as_deref(), &ready.version);
    result.upgrade_path = Some(upgrade_path);
    reporter.info(&format!(
        "{}: {upgrade_path} ({} -> {})",
        ready.package,
        installed_version.as_deref().unwrap_or("none"),
        ready.version
    ));
    events.emit(
        &event_package,
        EventType::InstallStarted {
            upgrade_path: Some(upgrade_path),
        },
    );

    // BACKUP
    let backup_outcome = if should_create_backup(upgrade_path) {
        match ports.backups.create_backup(config_dir) {
            Ok(info) => {
                reporter.info(&format!("backup created: {}", info.path.display()));
                events.emit(&event_package, EventType::BackupCreated { path: info.path.clone() });
                apply_retention(ports.backups, request.backup_keep, reporter);
                result.backup = Some(info);
                PhaseOutcome::Completed
            }
            Err(e) => {
                let message = format!("{e:#}");
                reporter.warn(&format!("backup failed, continuing without one: {message}"));
                events.emit(&event_package, EventType::BackupFailed { message: message.clone() });
                PhaseOutcome::FailedNonFatal { message }
            }
        }
    } else {
        PhaseOutcome::Skipped {
            reason: "fresh install".to_string(),
        }
    };
    phases.finish(InstallPhase::Backup, backup_outcome, &mut events, &event_package);

    // INSTALL
    let marker = InProgressMarker {
        package: ready.package.clone(),
        version: ready.version.clone(),
        started_at: Utc::now(),
    };
    if let Err(e) = state::mark_install_started(config_dir, &marker) {
        let message = format!("failed to record install start: {e:#}");
        phases.finish(
            InstallPhase::Install,
            PhaseOutcome::FailedFatal {
                message: message.clone(),
            },
            &mut events,
            &event_package,
        );
        return fail(result, phases, events, config_dir, &event_package, message, reporter);
    }
    let force = request.force || upgrade_path != UpgradePath::FreshInstall;
    reporter.info(&format!(
        "installing {} with {}...",
        ready.artifact.display(),
        ports.package_manager.name()
    ));
    let outcome = ports.package_manager.install(&ready.artifact, force);
    if !outcome.success {
        let message = outcome
            .error_message
            .unwrap_or_else(|| format!("{} install failed", ports.package_manager.name()));
        phases.finish(
            InstallPhase::Install,
            PhaseOutcome::FailedFatal {
                message: message.clone(),
            },
            &mut events,
            &event_package,
        );
        return fail(result, phases, events, config_dir, &event_package, message, reporter);
    }
    result.install_path = outcome.install_path.clone();

    let manifest = InstallManifest {
        manifest_version: state::CURRENT_MANIFEST_VERSION.to_string(),
        package: ready.package.clone(),
        version: ready.version.clone(),
        artifact_path: ready.artifact.clone(),
        checksum: ready.checksum,
        install_path: result.install_path.clone(),
        upgrade_path,
        installed_at: Utc::now(),
        environment: collect_environment_fingerprint(ports.package_manager.name()),
        component_counts: ports.health.and_then(|h| h.component_counts()),
    };
    if let Err(e) = state::save_manifest(config_dir, &manifest) {
        // Markers stay so a rollback knows the install is incomplete.
        let message = format!(
            "{} installed {} but the install manifest could not be written: {e:#}",
            ports.package_manager.name(),
            ready.package
        );
        phases.finish(
            InstallPhase::Install,
            PhaseOutcome::FailedFatal {
                message: message.clone(),
            },
            &mut events,
            &event_package,
        );
        return fail(result, phases, events, config_dir, &event_package, message, reporter);
    }
    if let Err(e) = state::clear_partial_install(config_dir) {
        reporter.warn(&format!("could not clear install markers: {e:#}"));
    }
    phases.finish(InstallPhase::Install, PhaseOutcome::Completed, &mut events, &event_package);

    // VERIFICATION
    if let Some(health) = ports.health {
        reporter.info("verifying installation...");
        let results = health.check_health(Some(&ready.version));
        let status = overall_status(&results);
        result.verification_warnings = degraded_messages(&results);
        for w in &result.verification_warnings {
            reporter.warn(w);
        }
        result.health_status = Some(status);
        result.health_results = results;

        if status == HealthStatus::Unhealthy {
            let failing = result
                .health_results
                .iter()
                .filter(|r| r.status == HealthStatus::Unhealthy)
                .map(|r| format!("{}: {}", r.component, r.message))
                .collect::<Vec<_>>()
                .join("; ");
            let message = format!("installation is UNHEALTHY: {failing}");
            phases.finish(
                InstallPhase::Verification,
                PhaseOutcome::FailedFatal {
                    message: message.clone(),
                },
                &mut events,
                &event_package,
            );
            return fail(
                result,
                phases,
                events,
                config_dir,
                &event_package,
                format!("[VERIFICATION] {message}"),
                reporter,
            );
        }
        phases.finish(InstallPhase::Verification, PhaseOutcome::Completed, &mut events, &event_package);
    }

    result.success = true;
    phases.apply(&mut result);
    events.emit(
        &event_package,
        EventType::InstallFinished {
            success: true,
            health: result.health_status,
        },
    );
    write_history(&events, config_dir, reporter);
    reporter.info(&format!("installed {} {}", ready.package, ready.version));
    Ok(result)
}

struct Ready {
    artifact: PathBuf,
    package: String,
    version: String,
    checksum: Option<String>,
}

fn check_readiness(
    validator: &dyn ArtifactValidationPort,
    registry: &ArtifactRegistry,
    request: &InstallRequest,
) -> std::result::Result<Ready, String> {
    let from_registry = request.artifact.is_none();
    let artifact = request
        .artifact
        .clone()
        .or_else(|| registry.artifact_path())
        .ok_or_else(|| "no artifact to install; build one first or pass a path".to_string())?;

    let validation = validator.validate(&artifact);
    if !validation.is_valid {
        return Err(format!(
            "artifact {} is not ready for distribution: {}",
            artifact.display(),
            validation.errors.join("; ")
        ));
    }

    let package = match (&validation.package_name, &request.expected_package) {
        (Some(found), Some(expected))
            if normalize_package_name(found) != normalize_package_name(expected) =>
        {
            return Err(format!(
                "artifact belongs to package {found}, expected {expected}"
            ));
        }
        (Some(found), _) => found.clone(),
        (None, Some(expected)) => expected.clone(),
        (None, None) => {
            return Err(format!(
                "cannot determine package name of {}",
                artifact.display()
            ));
        }
    };

    let registry_version = from_registry.then(|| registry.version()).flatten();
    let version = match (validation.version, registry_version) {
        (Some(found), Some(recorded)) if !compare_versions(&found, recorded).is_eq() => {
            return Err(format!(
                "version drift: build recorded {recorded} but artifact reports {found}"
            ));
        }
        (Some(found), _) => found,
        (None, Some(recorded)) => recorded.to_string(),
        (None, None) => {
            return Err(format!(
                "cannot determine version of {}",
                artifact.display()
            ));
        }
    };

    let checksum = from_registry
        .then(|| registry.get(crate::artifact::ArtifactKey::Checksum))
        .flatten()
        .map(str::to_string)
        .or_else(|| crate::artifact::sha256_file(&artifact).ok());

    Ok(Ready {
        artifact,
        package,
        version,
        checksum,
    })
}

/// Installed version per the package manager, falling back to the manifest
/// when the package manager cannot list.
fn installed_version(
    pm: &dyn PackageManagerPort,
    package: &str,
    config_dir: &Path,
    reporter: &mut dyn Reporter,
) -> Option<String> {
    match find_installed(pm, package) {
        Ok(found) => found.map(|p| p.version),
        Err(e) => {
            reporter.warn(&format!(
                "could not list installed packages ({e}); using install manifest"
            ));
            state::load_manifest(config_dir)
                .ok()
                .flatten()
                .filter(|m| normalize_package_name(&m.package) == normalize_package_name(package))
                .map(|m| m.version)
        }
    }
}

fn apply_retention(backups: &dyn BackupPort, keep: Option<usize>, reporter: &mut dyn Reporter) {
    let Some(keep) = keep else {
        return;
    };
    match backups.cleanup_old_backups(keep) {
        Ok(report) if report.removed > 0 => {
            reporter.info(&format!("removed {} old backup(s)", report.removed));
        }
        Ok(_) => {}
        Err(e) => reporter.warn(&format!("backup cleanup failed: {e:#}")),
    }
}

fn fail(
    mut result: InstallResult,
    phases: PhaseLog,
    mut events: EventLog,
    config_dir: &Path,
    package: &str,
    message: String,
    reporter: &mut dyn Reporter,
) -> Result<InstallResult> {
    phases.apply(&mut result);
    let reached = result
        .phase_reached()
        .map(InstallPhase::as_str)
        .unwrap_or("PREFLIGHT");
    reporter.error(&format!("install failed during {reached}: {message}"));
    if let Some(backup) = &result.backup {
        reporter.info(&format!(
            "a backup from before this install is available; roll back with `dockhand rollback` ({})",
            backup.path.display()
        ));
    }

    events.emit(
        package,
        EventType::InstallFinished {
            success: false,
            health: result.health_status,
        },
    );
    write_history(&events, config_dir, reporter);
    result.error_message = Some(message);
    Ok(result)
}

fn write_history(events: &EventLog, config_dir: &Path, reporter: &mut dyn Reporter) {
    if let Err(e) = events.write_to_file(&events_path(config_dir)) {
        reporter.warn(&format!("failed to record install history: {e:#}"));
    }
}

/// Outcome of `uninstall`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UninstallResult {
    pub success: bool,
    pub package: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Back up the config directory, uninstall through the package manager and
/// clear the install manifest.
pub fn run_uninstall(
    package_manager: &dyn PackageManagerPort,
    backups: &dyn BackupPort,
    package: &str,
    config_dir: &Path,
    lock_timeout: Duration,
    reporter: &mut dyn Reporter,
) -> Result<UninstallResult> {
    let _lock = LockFile::acquire_with_timeout(config_dir, "uninstall", lock_timeout)
        .context("failed to acquire uninstall lock")?;
    let mut events = EventLog::new();

    let backup = match backups.create_backup(config_dir) {
        Ok(info) => {
            reporter.info(&format!("backup created: {}", info.path.display()));
            events.emit(package, EventType::BackupCreated { path: info.path.clone() });
            Some(info)
        }
        Err(e) => {
            reporter.warn(&format!("backup failed, continuing without one: {e:#}"));
            events.emit(package, EventType::BackupFailed { message: format!("{e:#}") });
            None
        }
    };

    reporter.info(&format!("uninstalling {package}..."));
    let outcome = package_manager.uninstall(package);
    if outcome.success {
        state::clear_manifest(config_dir)?;
        reporter.info(&format!("uninstalled {package}"));
    } else if let Some(msg) = &outcome.error_message {
        reporter.error(msg);
    }

    events.emit(package, EventType::Uninstalled { success: outcome.success });
    events.write_to_file(&events_path(config_dir))?;

    Ok(UninstallResult {
        success: outcome.success,
        package: package.to_string(),
        backup,
        error_message: outcome.error_message,
    })
}

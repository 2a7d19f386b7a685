//! Automatic and manual rollback to a retained backup.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::events::{EventLog, events_path};
use crate::health::{HealthCheck, overall_status};
use crate::lock::LockFile;
use crate::ports::BackupPort;
use crate::report::Reporter;
use crate::state;
use crate::types::{BackupInfo, EventType, HealthStatus, RollbackResult};

pub const NO_BACKUPS: &str = "No backups available";

/// Undo a failed install: clear partial-install markers, restore the newest
/// backup into `config_dir` and re-verify health when a checker is given.
pub fn auto_rollback(
    backups: &dyn BackupPort,
    health: Option<&dyn HealthCheck>,
    config_dir: &Path,
    install_error: &str,
    lock_timeout: Duration,
    reporter: &mut dyn Reporter,
) -> Result<RollbackResult> {
    let _lock = LockFile::acquire_with_timeout(config_dir, "rollback", lock_timeout)
        .context("failed to acquire rollback lock")?;
    reporter.info(&format!("rolling back after install failure: {install_error}"));

    let cleaned = state::clear_partial_install(config_dir)?;
    for path in &cleaned {
        reporter.info(&format!("removed {}", path.display()));
    }

    let newest = match backups.list_backups() {
        Ok(list) => list.into_iter().next(),
        Err(e) => {
            let result = RollbackResult::failed(format!("failed to list backups: {e:#}"), cleaned);
            return finish(result, config_dir, reporter);
        }
    };
    let Some(backup) = newest else {
        return finish(RollbackResult::failed(NO_BACKUPS, cleaned), config_dir, reporter);
    };

    let mut result = restore(backups, &backup, config_dir, cleaned, reporter);
    if result.success
        && let Some(health) = health
    {
        result.health_status = Some(verify_health(health, config_dir, reporter));
    }
    finish(result, config_dir, reporter)
}

/// Restore a specific backup and report the resulting health. An UNHEALTHY
/// installation after restore is reported, not treated as a failed rollback.
pub fn manual_rollback(
    backups: &dyn BackupPort,
    health: Option<&dyn HealthCheck>,
    backup_path: &Path,
    config_dir: &Path,
    lock_timeout: Duration,
    reporter: &mut dyn Reporter,
) -> Result<RollbackResult> {
    let _lock = LockFile::acquire_with_timeout(config_dir, "rollback", lock_timeout)
        .context("failed to acquire rollback lock")?;

    let known = backups
        .list_backups()?
        .into_iter()
        .find(|b| same_path(&b.path, backup_path));
    let Some(backup) = known else {
        let result = RollbackResult::failed(
            format!("backup not found: {}", backup_path.display()),
            Vec::new(),
        );
        return finish(result, config_dir, reporter);
    };

    let mut result = restore(backups, &backup, config_dir, Vec::new(), reporter);
    if result.success
        && let Some(health) = health
    {
        result.health_status = Some(verify_health(health, config_dir, reporter));
    }
    finish(result, config_dir, reporter)
}

/// Health against the version the restored manifest records.
fn verify_health(
    health: &dyn HealthCheck,
    config_dir: &Path,
    reporter: &mut dyn Reporter,
) -> HealthStatus {
    let expected = state::load_manifest(config_dir)
        .ok()
        .flatten()
        .map(|m| m.version);
    let status = overall_status(&health.check_health(expected.as_deref()));
    match status {
        HealthStatus::Healthy => reporter.info("installation is HEALTHY after rollback"),
        HealthStatus::Degraded => reporter.warn("installation is DEGRADED after rollback"),
        HealthStatus::Unhealthy => reporter.warn(
            "installation is UNHEALTHY after rollback; the package itself may need reinstalling",
        ),
    }
    status
}

/// The newest backup, if any. Used by `rollback` without `--to`.
pub fn newest_backup(backups: &dyn BackupPort) -> Result<Option<BackupInfo>> {
    Ok(backups.list_backups()?.into_iter().next())
}

fn restore(
    backups: &dyn BackupPort,
    backup: &BackupInfo,
    config_dir: &Path,
    cleaned_paths: Vec<std::path::PathBuf>,
    reporter: &mut dyn Reporter,
) -> RollbackResult {
    reporter.info(&format!("restoring {}...", backup.path.display()));
    match backups.restore_backup(&backup.path, config_dir) {
        Ok(()) => RollbackResult {
            success: true,
            backup_path: Some(backup.path.clone()),
            backup_timestamp: Some(backup.timestamp),
            health_status: None,
            error_message: None,
            cleaned_paths,
        },
        Err(e) => RollbackResult {
            backup_path: Some(backup.path.clone()),
            ..RollbackResult::failed(format!("restore failed: {e:#}"), cleaned_paths)
        },
    }
}

fn finish(
    result: RollbackResult,
    config_dir: &Path,
    reporter: &mut dyn Reporter,
) -> Result<RollbackResult> {
    match (&result.error_message, &result.backup_timestamp) {
        (Some(msg), _) => reporter.error(&format!("rollback failed: {msg}")),
        (None, Some(ts)) => reporter.info(&format!("rolled back to backup from {ts}")),
        (None, None) => {}
    }

    let mut events = EventLog::new();
    events.emit(
        "all",
        EventType::RollbackPerformed {
            success: result.success,
            backup: result.backup_path.clone(),
        },
    );
    events.write_to_file(&events_path(config_dir))?;
    Ok(result)
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

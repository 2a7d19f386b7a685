//! Narrow interfaces to everything outside the orchestrators: the build tool,
//! the package manager, artifact validation, the package index, publishing
//! and backup storage.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ArtifactValidation, BackupInfo, CheckResult};

/// A failed build, with whatever the tool printed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct BuildError {
    pub message: String,
    pub return_code: Option<i32>,
    pub captured_output: Option<String>,
}

impl BuildError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            return_code: None,
            captured_output: None,
        }
    }

    /// Message with the return code appended when known.
    pub fn describe(&self) -> String {
        match self.return_code {
            Some(code) => format!("{} (exit code {code})", self.message),
            None => self.message.clone(),
        }
    }
}

pub trait BuildPort {
    /// Build one artifact for `version` into `output_dir`.
    fn build_artifact(&self, output_dir: &Path, version: &str) -> Result<PathBuf, BuildError>;

    /// Remove previously built artifacts from `output_dir`.
    fn clean_artifacts(&self, output_dir: &Path) -> Result<(), BuildError>;

    /// Newest artifact in `dir`, if any.
    fn locate_artifact(&self, dir: &Path) -> Option<PathBuf>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl InstallOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UninstallOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum PackageManagerError {
    #[error("package manager '{0}' is not available")]
    Unavailable(String),
    #[error("package manager command failed: {0}")]
    CommandFailed(String),
    #[error("could not parse package manager output: {0}")]
    Parse(String),
}

pub trait PackageManagerPort {
    /// Program name used in messages.
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    fn install(&self, artifact: &Path, force: bool) -> InstallOutcome;

    fn uninstall(&self, name: &str) -> UninstallOutcome;

    fn list_installed(&self) -> Result<Vec<InstalledPackage>, PackageManagerError>;

    /// Install a published version from a package index (quality gate).
    fn install_from_index(&self, name: &str, version: &str, index_url: &str) -> InstallOutcome;
}

/// Currently installed entry for `name`, if any.
pub fn find_installed(
    pm: &dyn PackageManagerPort,
    name: &str,
) -> Result<Option<InstalledPackage>, PackageManagerError> {
    let wanted = crate::artifact::normalize_package_name(name);
    Ok(pm
        .list_installed()?
        .into_iter()
        .find(|p| crate::artifact::normalize_package_name(&p.name) == wanted))
}

pub trait ArtifactValidationPort {
    fn validate(&self, artifact: &Path) -> ArtifactValidation;
}

/// Read-only probes against a package index. Failures are data.
pub trait RegistryCheckPort {
    fn check_connectivity(&self) -> CheckResult;
    fn check_package_exists(&self, name: &str) -> CheckResult;
    fn check_version_exists(&self, name: &str, version: &str) -> CheckResult;
    fn check_tls(&self) -> CheckResult;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct PublishError {
    pub message: String,
    pub output: Option<String>,
}

/// Packaging metadata check and staging upload used by the quality gate.
pub trait PublishPort {
    /// Returns the tool's output on success.
    fn check_metadata(&self, artifact: &Path) -> Result<String, PublishError>;
    fn upload_staging(&self, artifact: &Path) -> Result<String, PublishError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: usize,
    pub kept: usize,
}

pub trait BackupPort {
    /// Snapshot the allow-listed contents of `source`.
    fn create_backup(&self, source: &Path) -> Result<BackupInfo>;

    /// Copy a backup's contents over `target`.
    fn restore_backup(&self, backup: &Path, target: &Path) -> Result<()>;

    /// Newest first.
    fn list_backups(&self) -> Result<Vec<BackupInfo>>;

    /// Delete all but the newest `keep` backups.
    fn cleanup_old_backups(&self, keep: usize) -> Result<CleanupReport>;
}

//! Project configuration (`dockhand.toml`).
//!
//! The file lives in the project root. Every section is optional; missing
//! values fall back to defaults suited to a Python project installed
//! through pipx.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::types::{deserialize_duration, serialize_duration};

pub const CONFIG_FILE: &str = "dockhand.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageConfig {
    /// Package name as known to the package manager. Required for install.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_build_program")]
    pub program: String,
    /// Arguments; `{output_dir}` and `{version}` are substituted.
    #[serde(default = "default_build_args")]
    pub args: Vec<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_artifact_extensions")]
    pub artifact_extensions: Vec<String>,
    /// Fail the build when the artifact's version differs from the candidate.
    #[serde(default)]
    pub require_version_match: bool,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_build_timeout")]
    pub timeout: Duration,
    #[serde(default = "default_build_fix_command")]
    pub fix_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManagerConfig {
    #[serde(default = "default_pm_program")]
    pub program: String,
    /// Extra arguments appended to every `install`.
    #[serde(default)]
    pub install_args: Vec<String>,
    #[serde(default = "default_pm_fix_command")]
    pub fix_command: Option<String>,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_pm_timeout")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// JSON API of the staging index used by the quality gate.
    #[serde(default = "default_staging_api_base")]
    pub staging_api_base: String,
    /// Package index URL the gate installs from.
    #[serde(default = "default_staging_index_url")]
    pub staging_index_url: String,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_index_timeout")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_prefix")]
    pub prefix: String,
    /// Paths relative to the config directory that are backed up. Anything
    /// not listed (history, sessions, the backups themselves) is never copied.
    #[serde(default = "default_backup_include")]
    pub include: Vec<String>,
    #[serde(default = "default_backup_keep")]
    pub keep: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Files that must exist under the install root.
    #[serde(default)]
    pub core_files: Vec<String>,
    /// Files that must exist under the config directory.
    #[serde(default)]
    pub sub_files: Vec<String>,
    /// TOML file under the config directory that must parse.
    #[serde(default = "default_health_config_file")]
    pub config_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Locks older than this are considered stale.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_lock_timeout")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Metadata check; `{artifact}` is substituted.
    #[serde(default = "default_gate_check_command")]
    pub check_command: String,
    /// Upload to the staging index; `{artifact}` is substituted.
    #[serde(default = "default_gate_upload_command")]
    pub upload_command: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockhandConfig {
    #[serde(default)]
    pub package: PackageConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub package_manager: PackageManagerConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub gate: GateConfig,
    /// Application config directory. `DOCKHAND_HOME` and `--config-dir` win.
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            program: default_build_program(),
            args: default_build_args(),
            output_dir: default_output_dir(),
            artifact_extensions: default_artifact_extensions(),
            require_version_match: false,
            timeout: default_build_timeout(),
            fix_command: default_build_fix_command(),
        }
    }
}

impl Default for PackageManagerConfig {
    fn default() -> Self {
        Self {
            program: default_pm_program(),
            install_args: Vec::new(),
            fix_command: default_pm_fix_command(),
            timeout: default_pm_timeout(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            staging_api_base: default_staging_api_base(),
            staging_index_url: default_staging_index_url(),
            timeout: default_index_timeout(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            prefix: default_backup_prefix(),
            include: default_backup_include(),
            keep: default_backup_keep(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            core_files: Vec::new(),
            sub_files: Vec::new(),
            config_file: default_health_config_file(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: default_lock_timeout(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            check_command: default_gate_check_command(),
            upload_command: default_gate_upload_command(),
        }
    }
}

fn default_build_program() -> String {
    "python3".to_string()
}

fn default_build_args() -> Vec<String> {
    ["-m", "build", "--wheel", "--outdir", "{output_dir}"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_artifact_extensions() -> Vec<String> {
    vec!["whl".to_string(), "tar.gz".to_string()]
}

fn default_build_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_build_fix_command() -> Option<String> {
    Some("python3 -m pip install --user build".to_string())
}

fn default_pm_program() -> String {
    "pipx".to_string()
}

fn default_pm_fix_command() -> Option<String> {
    Some("python3 -m pip install --user pipx".to_string())
}

fn default_pm_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_api_base() -> String {
    "https://pypi.org".to_string()
}

fn default_staging_api_base() -> String {
    "https://test.pypi.org".to_string()
}

fn default_staging_index_url() -> String {
    "https://test.pypi.org/simple/".to_string()
}

fn default_index_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_backup_prefix() -> String {
    "backup".to_string()
}

fn default_backup_include() -> Vec<String> {
    ["config.toml", "install-manifest.json", "profiles", "plugins"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_backup_keep() -> usize {
    5
}

fn default_health_config_file() -> Option<String> {
    Some("config.toml".to_string())
}

fn default_lock_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_gate_check_command() -> String {
    "python3 -m twine check {artifact}".to_string()
}

fn default_gate_upload_command() -> String {
    "python3 -m twine upload --repository testpypi {artifact}".to_string()
}

/// Application config directory: `DOCKHAND_HOME`, else the platform config
/// directory joined with `dockhand`.
pub fn default_config_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("DOCKHAND_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    dirs::config_dir()
        .map(|d| d.join("dockhand"))
        .unwrap_or_else(|| PathBuf::from(".dockhand"))
}

/// Values from the command line that override the config file.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub package_name: Option<String>,
    pub config_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub current_version: Option<String>,
    pub prerelease: Option<String>,
    pub backup_keep: Option<usize>,
    pub lock_timeout: Option<Duration>,
    pub assume_yes: bool,
    pub force: bool,
    pub no_rollback: bool,
    pub require_version_match: bool,
}

/// Effective settings for one CLI invocation.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub package_name: Option<String>,
    pub project_root: PathBuf,
    pub config_dir: PathBuf,
    pub output_dir: PathBuf,
    pub current_version: Option<String>,
    pub prerelease: Option<String>,
    pub build: BuildConfig,
    pub package_manager: PackageManagerConfig,
    pub index: IndexConfig,
    pub backup: BackupConfig,
    pub health: HealthConfig,
    pub gate: GateConfig,
    pub lock_timeout: Duration,
    pub assume_yes: bool,
    pub force: bool,
    pub no_rollback: bool,
}

impl RuntimeOptions {
    pub fn backups_dir(&self) -> PathBuf {
        self.config_dir.join("backups")
    }
}

impl DockhandConfig {
    /// Load `dockhand.toml` from `project_root`. `Ok(None)` when absent.
    pub fn load_from_project(project_root: &Path) -> Result<Option<Self>> {
        let config_path = project_root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(None);
        }
        Self::load_from_file(&config_path).map(Some)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.package.name
            && name.trim().is_empty()
        {
            bail!("package.name cannot be empty");
        }

        if self.build.program.trim().is_empty() {
            bail!("build.program cannot be empty");
        }

        if self.build.artifact_extensions.is_empty() {
            bail!("build.artifact_extensions must list at least one extension");
        }

        if let Some(ext) = self
            .build
            .artifact_extensions
            .iter()
            .find(|e| e.is_empty() || e.starts_with('.'))
        {
            bail!("build.artifact_extensions entry '{ext}' must be non-empty and without a leading dot");
        }

        if self.build.timeout.is_zero() {
            bail!("build.timeout must be greater than 0");
        }

        if self.package_manager.program.trim().is_empty() {
            bail!("package_manager.program cannot be empty");
        }

        if self.index.timeout.is_zero() {
            bail!("index.timeout must be greater than 0");
        }

        for (field, url) in [
            ("index.api_base", &self.index.api_base),
            ("index.staging_api_base", &self.index.staging_api_base),
            ("index.staging_index_url", &self.index.staging_index_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("{field} must be an http(s) URL, got '{url}'");
            }
        }

        if self.backup.prefix.is_empty()
            || !self
                .backup
                .prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            bail!("backup.prefix must be non-empty and contain only letters, digits, '_' or '.'");
        }

        if let Some(bad) = self
            .backup
            .include
            .iter()
            .find(|p| Path::new(p).is_absolute() || p.split(['/', '\\']).any(|seg| seg == ".."))
        {
            bail!("backup.include entry '{bad}' must be a relative path inside the config directory");
        }

        if self.backup.keep == 0 {
            bail!("backup.keep must be greater than 0");
        }

        if self.lock.timeout.is_zero() {
            bail!("lock.timeout must be greater than 0");
        }

        Ok(())
    }

    /// Merge CLI overrides over file values.
    ///
    /// `Option` fields: the CLI value wins. `bool` flags: enabled if either
    /// side enables them.
    pub fn build_runtime_options(&self, project_root: &Path, cli: CliOverrides) -> RuntimeOptions {
        let mut build = self.build.clone();
        build.require_version_match |= cli.require_version_match;

        let mut backup = self.backup.clone();
        if let Some(keep) = cli.backup_keep {
            backup.keep = keep;
        }

        let output_dir = cli.output_dir.unwrap_or_else(|| self.build.output_dir.clone());
        let output_dir = if output_dir.is_absolute() {
            output_dir
        } else {
            project_root.join(output_dir)
        };

        RuntimeOptions {
            package_name: cli.package_name.or_else(|| self.package.name.clone()),
            project_root: project_root.to_path_buf(),
            config_dir: cli
                .config_dir
                .or_else(|| {
                    std::env::var_os("DOCKHAND_HOME")
                        .filter(|v| !v.is_empty())
                        .map(PathBuf::from)
                })
                .or_else(|| self.config_dir.clone())
                .unwrap_or_else(default_config_dir),
            output_dir,
            current_version: cli.current_version,
            prerelease: cli.prerelease,
            build,
            package_manager: self.package_manager.clone(),
            index: self.index.clone(),
            backup,
            health: self.health.clone(),
            gate: self.gate.clone(),
            lock_timeout: cli.lock_timeout.unwrap_or(self.lock.timeout),
            assume_yes: cli.assume_yes,
            force: cli.force,
            no_rollback: cli.no_rollback,
        }
    }

    /// Commented template written by `dockhand config init`.
    pub fn default_toml_template() -> String {
        r#"# dockhand configuration file
# Place this file in your project root as dockhand.toml

[package]
# Name of the package as the package manager knows it
# name = "my-tool"

[build]
# Build command; {output_dir} and {version} are substituted in args
program = "python3"
args = ["-m", "build", "--wheel", "--outdir", "{output_dir}"]
output_dir = "dist"
artifact_extensions = ["whl", "tar.gz"]
# Fail when the built artifact's version differs from the computed one
require_version_match = false
timeout = "10m"
# Offered by `dockhand doctor --fix` when the build tool is missing
fix_command = "python3 -m pip install --user build"

[package_manager]
program = "pipx"
install_args = []
fix_command = "python3 -m pip install --user pipx"
timeout = "5m"

[index]
api_base = "https://pypi.org"
staging_api_base = "https://test.pypi.org"
staging_index_url = "https://test.pypi.org/simple/"
timeout = "10s"

[backup]
prefix = "backup"
# Paths under the config directory to back up. History is never included.
include = ["config.toml", "install-manifest.json", "profiles", "plugins"]
keep = 5

[health]
# Files that must exist under the install root
core_files = []
# Files that must exist under the config directory
sub_files = []
config_file = "config.toml"

[lock]
# Locks older than this are considered stale
timeout = "1h"

[gate]
check_command = "python3 -m twine check {artifact}"
upload_command = "python3 -m twine upload --repository testpypi {artifact}"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DockhandConfig::default();
        assert_eq!(config.build.output_dir, PathBuf::from("dist"));
        assert_eq!(config.package_manager.program, "pipx");
        assert_eq!(config.index.timeout, Duration::from_secs(10));
        assert_eq!(config.backup.keep, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn template_parses_and_validates() {
        let config: DockhandConfig =
            toml::from_str(&DockhandConfig::default_toml_template()).expect("parse template");
        config.validate().expect("valid");
        assert_eq!(config.build.timeout, Duration::from_secs(600));
        assert_eq!(config.lock.timeout, Duration::from_secs(3600));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: DockhandConfig = toml::from_str(
            r#"
[package]
name = "demo"

[backup]
keep = 2

[index]
timeout = "3s"
"#,
        )
        .expect("parse");
        assert_eq!(config.package.name.as_deref(), Some("demo"));
        assert_eq!(config.backup.keep, 2);
        assert_eq!(config.backup.prefix, "backup");
        assert_eq!(config.index.timeout, Duration::from_secs(3));
        assert_eq!(config.build.program, "python3");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = DockhandConfig::default();
        config.backup.keep = 0;
        assert!(config.validate().is_err());

        let mut config = DockhandConfig::default();
        config.backup.include.push("../secrets".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("backup.include"));

        let mut config = DockhandConfig::default();
        config.build.artifact_extensions = vec![".whl".to_string()];
        assert!(config.validate().is_err());

        let mut config = DockhandConfig::default();
        config.index.api_base = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = DockhandConfig::default();
        config.backup.prefix = "my-backup".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_project_absent_is_none() {
        let td = tempdir().expect("tempdir");
        assert!(DockhandConfig::load_from_project(td.path()).expect("load").is_none());
    }

    #[test]
    fn load_from_project_reports_parse_errors() {
        let td = tempdir().expect("tempdir");
        std::fs::write(td.path().join(CONFIG_FILE), "[build\n").expect("write");
        let err = DockhandConfig::load_from_project(td.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    #[serial]
    fn cli_overrides_win_and_flags_are_ored() {
        temp_env::with_var("DOCKHAND_HOME", None::<&str>, || {
            let mut config = DockhandConfig::default();
            config.package.name = Some("from-file".to_string());
            config.build.require_version_match = true;
            config.config_dir = Some(PathBuf::from("/from/file"));

            let opts = config.build_runtime_options(
                Path::new("/proj"),
                CliOverrides {
                    package_name: Some("from-cli".to_string()),
                    backup_keep: Some(9),
                    ..Default::default()
                },
            );
            assert_eq!(opts.package_name.as_deref(), Some("from-cli"));
            assert!(opts.build.require_version_match);
            assert_eq!(opts.backup.keep, 9);
            assert_eq!(opts.config_dir, PathBuf::from("/from/file"));
            assert_eq!(opts.output_dir, PathBuf::from("/proj").join("dist"));
            assert_eq!(opts.backups_dir(), PathBuf::from("/from/file").join("backups"));
        });
    }

    #[test]
    #[serial]
    fn config_dir_precedence() {
        let config = DockhandConfig {
            config_dir: Some(PathBuf::from("/from/file")),
            ..Default::default()
        };
        temp_env::with_var("DOCKHAND_HOME", Some("/from/env"), || {
            let opts = config.build_runtime_options(Path::new("/proj"), CliOverrides::default());
            assert_eq!(opts.config_dir, PathBuf::from("/from/env"));

            let opts = config.build_runtime_options(
                Path::new("/proj"),
                CliOverrides {
                    config_dir: Some(PathBuf::from("/from/cli")),
                    ..Default::default()
                },
            );
            assert_eq!(opts.config_dir, PathBuf::from("/from/cli"));
            assert_eq!(default_config_dir(), PathBuf::from("/from/env"));
        });
    }
}

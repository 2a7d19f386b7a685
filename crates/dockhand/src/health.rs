//! Post-install health battery.
//!
//! The checks always run in the same order (core files, sub-files,
//! configuration, permissions, version) so that two runs over the same state
//! render identical tables.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::config::HealthConfig;
use crate::consistency::ComponentCounts;
use crate::ports::{InstalledPackage, PackageManagerError, PackageManagerPort, find_installed};
use crate::state::probe_writable;
use crate::types::{HealthResult, HealthStatus};

pub const COMPONENT_CORE: &str = "core files";
pub const COMPONENT_SUB_FILES: &str = "sub-files";
pub const COMPONENT_CONFIG: &str = "configuration";
pub const COMPONENT_PERMISSIONS: &str = "permissions";
pub const COMPONENT_VERSION: &str = "version";

/// Anything that can judge an installation.
pub trait HealthCheck {
    /// Run the battery. `expected_version` is the version that should be
    /// installed, when known.
    fn check_health(&self, expected_version: Option<&str>) -> Vec<HealthResult>;

    /// Present core files and sub-files plus the size of the battery, for
    /// comparing installations over time.
    fn component_counts(&self) -> Option<ComponentCounts> {
        None
    }
}

pub struct HealthChecker<'a> {
    package_manager: &'a dyn PackageManagerPort,
    package_name: String,
    config_dir: PathBuf,
    config: HealthConfig,
}

impl<'a> HealthChecker<'a> {
    pub fn new(
        package_manager: &'a dyn PackageManagerPort,
        package_name: impl Into<String>,
        config_dir: impl Into<PathBuf>,
        config: HealthConfig,
    ) -> Self {
        Self {
            package_manager,
            package_name: package_name.into(),
            config_dir: config_dir.into(),
            config,
        }
    }

    fn check_core_files(
        &self,
        installed: &Result<Option<InstalledPackage>, PackageManagerError>,
    ) -> HealthResult {
        let root = match installed {
            Ok(Some(pkg)) => pkg.path.clone(),
            _ => None,
        };

        match root {
            None if self.config.core_files.is_empty() => result(
                COMPONENT_CORE,
                HealthStatus::Healthy,
                "no core files configured",
                None,
            ),
            None => result(
                COMPONENT_CORE,
                HealthStatus::Unhealthy,
                "install location unknown",
                Some(format!("{} did not report an install path", self.package_manager.name())),
            ),
            Some(root) if !root.is_dir() => result(
                COMPONENT_CORE,
                HealthStatus::Unhealthy,
                "install root missing",
                Some(root.display().to_string()),
            ),
            Some(root) => {
                let missing = missing_files(&root, &self.config.core_files);
                if missing.is_empty() {
                    result(COMPONENT_CORE, HealthStatus::Healthy, "all core files present", None)
                } else {
                    result(
                        COMPONENT_CORE,
                        HealthStatus::Unhealthy,
                        format!("{} core file(s) missing", missing.len()),
                        Some(missing.join(", ")),
                    )
                }
            }
        }
    }

    fn check_sub_files(&self) -> HealthResult {
        let missing = missing_files(&self.config_dir, &self.config.sub_files);
        if missing.is_empty() {
            result(
                COMPONENT_SUB_FILES,
                HealthStatus::Healthy,
                "all required sub-files present",
                None,
            )
        } else {
            result(
                COMPONENT_SUB_FILES,
                HealthStatus::Degraded,
                format!("{} sub-file(s) missing", missing.len()),
                Some(missing.join(", ")),
            )
        }
    }

    fn check_configuration(&self) -> HealthResult {
        let Some(file) = &self.config.config_file else {
            return result(
                COMPONENT_CONFIG,
                HealthStatus::Healthy,
                "no configuration file configured",
                None,
            );
        };
        let path = self.config_dir.join(file);
        match fs::read_to_string(&path) {
            Err(_) if !path.exists() => result(
                COMPONENT_CONFIG,
                HealthStatus::Degraded,
                format!("{file} not found, defaults in use"),
                None,
            ),
            Err(e) => result(
                COMPONENT_CONFIG,
                HealthStatus::Unhealthy,
                format!("{file} is unreadable"),
                Some(e.to_string()),
            ),
            Ok(content) => match content.parse::<toml::Table>() {
                Ok(_) => result(
                    COMPONENT_CONFIG,
                    HealthStatus::Healthy,
                    format!("{file} is valid"),
                    None,
                ),
                Err(e) => result(
                    COMPONENT_CONFIG,
                    HealthStatus::Unhealthy,
                    format!("{file} is not valid TOML"),
                    Some(e.message().to_string()),
                ),
            },
        }
    }

    fn check_permissions(&self) -> HealthResult {
        if !self.config_dir.is_dir() {
            return result(
                COMPONENT_PERMISSIONS,
                HealthStatus::Degraded,
                "config directory missing",
                Some(self.config_dir.display().to_string()),
            );
        }
        match probe_writable(&self.config_dir) {
            Ok(()) => result(
                COMPONENT_PERMISSIONS,
                HealthStatus::Healthy,
                "config directory writable",
                None,
            ),
            Err(e) => result(
                COMPONENT_PERMISSIONS,
                HealthStatus::Degraded,
                "config directory not writable",
                Some(e.to_string()),
            ),
        }
    }

    fn check_version(
        &self,
        installed: &Result<Option<InstalledPackage>, PackageManagerError>,
        expected: Option<&str>,
    ) -> HealthResult {
        match installed {
            Err(e) => result(
                COMPONENT_VERSION,
                HealthStatus::Unhealthy,
                "could not query installed packages",
                Some(e.to_string()),
            ),
            Ok(None) => result(
                COMPONENT_VERSION,
                HealthStatus::Unhealthy,
                format!("{} is not installed", self.package_name),
                None,
            ),
            Ok(Some(pkg)) => match expected {
                None => result(
                    COMPONENT_VERSION,
                    HealthStatus::Healthy,
                    format!("{} {} installed", pkg.name, pkg.version),
                    None,
                ),
                Some(expected) if crate::version::compare_versions(&pkg.version, expected).is_eq() => {
                    result(
                        COMPONENT_VERSION,
                        HealthStatus::Healthy,
                        format!("{expected} installed"),
                        None,
                    )
                }
                Some(expected) => result(
                    COMPONENT_VERSION,
                    HealthStatus::Degraded,
                    format!("installed {} but expected {expected}", pkg.version),
                    None,
                ),
            },
        }
    }
}

const BATTERY_SIZE: usize = 5;

impl HealthCheck for HealthChecker<'_> {
    fn check_health(&self, expected_version: Option<&str>) -> Vec<HealthResult> {
        let installed = find_installed(self.package_manager, &self.package_name);
        vec![
            self.check_core_files(&installed),
            self.check_sub_files(),
            self.check_configuration(),
            self.check_permissions(),
            self.check_version(&installed, expected_version),
        ]
    }

    fn component_counts(&self) -> Option<ComponentCounts> {
        let root = match find_installed(self.package_manager, &self.package_name) {
            Ok(Some(pkg)) => pkg.path,
            _ => None,
        };
        let core_files = root.map_or(0, |root| {
            self.config.core_files.len() - missing_files(&root, &self.config.core_files).len()
        });
        let sub_files =
            self.config.sub_files.len() - missing_files(&self.config_dir, &self.config.sub_files).len();
        Some(ComponentCounts {
            core_files,
            sub_files,
            checks: BATTERY_SIZE,
        })
    }
}

/// Worst status across results; an empty battery is HEALTHY.
pub fn overall_status(results: &[HealthResult]) -> HealthStatus {
    results
        .iter()
        .map(|r| r.status)
        .max()
        .unwrap_or(HealthStatus::Healthy)
}

/// Messages of DEGRADED components, formatted `component: message`.
pub fn degraded_messages(results: &[HealthResult]) -> Vec<String> {
    results
        .iter()
        .filter(|r| r.status == HealthStatus::Degraded)
        .map(|r| format!("{}: {}", r.component, r.message))
        .collect()
}

fn result(
    component: &str,
    status: HealthStatus,
    message: impl Into<String>,
    details: Option<String>,
) -> HealthResult {
    HealthResult {
        component: component.to_string(),
        status,
        message: message.into(),
        details,
        timestamp: Utc::now(),
    }
}

fn missing_files(root: &Path, files: &[String]) -> Vec<String> {
    files
        .iter()
        .filter(|f| !root.join(f).exists())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::test_support::FakePackageManager;

    fn config(core: &[&str], sub: &[&str]) -> HealthConfig {
        HealthConfig {
            core_files: core.iter().map(|s| s.to_string()).collect(),
            sub_files: sub.iter().map(|s| s.to_string()).collect(),
            config_file: Some("config.toml".to_string()),
        }
    }

    fn healthy_layout(root: &Path) -> (PathBuf, PathBuf) {
        let install = root.join("venv");
        let config_dir = root.join("config");
        fs::create_dir_all(install.join("bin")).expect("mkdir");
        fs::write(install.join("bin").join("demo"), "#!/bin/sh\n").expect("write");
        fs::create_dir_all(config_dir.join("profiles")).expect("mkdir");
        fs::write(config_dir.join("config.toml"), "theme = \"dark\"\n").expect("write");
        (install, config_dir)
    }

    fn pm_with(install: &Path, version: &str) -> FakePackageManager {
        FakePackageManager {
            install_path: Some(install.to_path_buf()),
            ..FakePackageManager::new()
        }
        .with_installed("demo", version)
    }

    #[test]
    fn healthy_installation() {
        let td = tempdir().expect("tempdir");
        let (install, config_dir) = healthy_layout(td.path());
        let pm = pm_with(&install, "1.2.0");
        let checker = HealthChecker::new(&pm, "demo", &config_dir, config(&["bin/demo"], &["profiles"]));

        let results = checker.check_health(Some("1.2.0"));
        let components: Vec<&str> = results.iter().map(|r| r.component.as_str()).collect();
        assert_eq!(
            components,
            vec![
                COMPONENT_CORE,
                COMPONENT_SUB_FILES,
                COMPONENT_CONFIG,
                COMPONENT_PERMISSIONS,
                COMPONENT_VERSION
            ]
        );
        assert_eq!(overall_status(&results), HealthStatus::Healthy, "{results:#?}");
    }

    #[test]
    fn missing_core_file_is_unhealthy() {
        let td = tempdir().expect("tempdir");
        let (install, config_dir) = healthy_layout(td.path());
        let pm = pm_with(&install, "1.2.0");
        let checker =
            HealthChecker::new(&pm, "demo", &config_dir, config(&["bin/demo", "lib/core.py"], &[]));

        let results = checker.check_health(Some("1.2.0"));
        assert_eq!(results[0].status, HealthStatus::Unhealthy);
        assert_eq!(results[0].details.as_deref(), Some("lib/core.py"));
        assert_eq!(overall_status(&results), HealthStatus::Unhealthy);
    }

    #[test]
    fn version_mismatch_and_missing_sub_file_are_degraded() {
        let td = tempdir().expect("tempdir");
        let (install, config_dir) = healthy_layout(td.path());
        let pm = pm_with(&install, "1.1.0");
        let checker = HealthChecker::new(&pm, "demo", &config_dir, config(&[], &["plugins"]));

        let results = checker.check_health(Some("1.2.0"));
        assert_eq!(overall_status(&results), HealthStatus::Degraded);
        assert_eq!(
            degraded_messages(&results),
            vec![
                "sub-files: 1 sub-file(s) missing".to_string(),
                "version: installed 1.1.0 but expected 1.2.0".to_string(),
            ]
        );
    }

    #[test]
    fn invalid_config_is_unhealthy_and_missing_config_is_degraded() {
        let td = tempdir().expect("tempdir");
        let (install, config_dir) = healthy_layout(td.path());
        let pm = pm_with(&install, "1.2.0");
        let checker = HealthChecker::new(&pm, "demo", &config_dir, config(&[], &[]));

        fs::write(config_dir.join("config.toml"), "broken = [").expect("write");
        let results = checker.check_health(Some("1.2.0"));
        assert_eq!(results[2].status, HealthStatus::Unhealthy);
        assert!(results[2].details.is_some());

        fs::remove_file(config_dir.join("config.toml")).expect("rm");
        let results = checker.check_health(Some("1.2.0"));
        assert_eq!(results[2].status, HealthStatus::Degraded);
    }

    #[test]
    fn pep440_report_matches_semver_expectation() {
        let td = tempdir().expect("tempdir");
        let (install, config_dir) = healthy_layout(td.path());
        let pm = pm_with(&install, "1.3.0rc1");
        let checker = HealthChecker::new(&pm, "demo", &config_dir, config(&[], &[]));

        let results = checker.check_health(Some("1.3.0-rc.1"));
        assert_eq!(results[4].status, HealthStatus::Healthy, "{:?}", results[4]);
    }

    #[test]
    fn component_counts_track_present_files() {
        let td = tempdir().expect("tempdir");
        let (install, config_dir) = healthy_layout(td.path());
        let pm = pm_with(&install, "1.2.0");
        let checker = HealthChecker::new(
            &pm,
            "demo",
            &config_dir,
            config(&["bin/demo", "lib/core.py"], &["profiles", "plugins"]),
        );
        assert_eq!(
            checker.component_counts(),
            Some(ComponentCounts {
                core_files: 1,
                sub_files: 1,
                checks: 5,
            })
        );

        fs::remove_dir_all(config_dir.join("profiles")).expect("rm");
        assert_eq!(checker.component_counts().map(|c| c.sub_files), Some(0));
    }

    #[test]
    fn not_installed_is_unhealthy() {
        let td = tempdir().expect("tempdir");
        let (_, config_dir) = healthy_layout(td.path());
        let pm = FakePackageManager::new();
        let checker = HealthChecker::new(&pm, "demo", &config_dir, config(&[], &[]));

        let results = checker.check_health(Some("1.0.0"));
        assert_eq!(results[4].status, HealthStatus::Unhealthy);
        assert_eq!(results[4].message, "demo is not installed");
    }

    #[test]
    fn list_failure_is_unhealthy() {
        let td = tempdir().expect("tempdir");
        let (_, config_dir) = healthy_layout(td.path());
        let pm = FakePackageManager {
            fail_list: true,
            ..FakePackageManager::new()
        };
        let checker = HealthChecker::new(&pm, "demo", &config_dir, config(&[], &[]));
        let results = checker.check_health(None);
        assert_eq!(results[4].status, HealthStatus::Unhealthy);
        assert!(results[4].details.as_deref().unwrap_or("").contains("list exploded"));
    }

    #[test]
    fn empty_battery_is_healthy() {
        assert_eq!(overall_status(&[]), HealthStatus::Healthy);
    }
}

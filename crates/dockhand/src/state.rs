//! On-disk install state under the application config directory.
//!
//! - `install-manifest.json`: what was last installed successfully
//! - `install.inprogress` + `partial-install/`: markers for an INSTALL phase
//!   that has started but not finished

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consistency::ComponentCounts;
use crate::environment::EnvironmentFingerprint;
use crate::types::UpgradePath;

pub const MANIFEST_FILE: &str = "install-manifest.json";
pub const INPROGRESS_FILE: &str = "install.inprogress";
pub const PARTIAL_DIR: &str = "partial-install";

pub const CURRENT_MANIFEST_VERSION: &str = "dockhand.manifest.v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallManifest {
    #[serde(default = "default_manifest_version")]
    pub manifest_version: String,
    pub package: String,
    pub version: String,
    pub artifact_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_path: Option<PathBuf>,
    pub upgrade_path: UpgradePath,
    pub installed_at: DateTime<Utc>,
    pub environment: EnvironmentFingerprint,
    /// Health component counts right after the package manager finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_counts: Option<ComponentCounts>,
}

fn default_manifest_version() -> String {
    CURRENT_MANIFEST_VERSION.to_string()
}

/// Contents of the in-progress marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InProgressMarker {
    pub package: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
}

pub fn manifest_path(config_dir: &Path) -> PathBuf {
    config_dir.join(MANIFEST_FILE)
}

pub fn inprogress_path(config_dir: &Path) -> PathBuf {
    config_dir.join(INPROGRESS_FILE)
}

pub fn partial_dir(config_dir: &Path) -> PathBuf {
    config_dir.join(PARTIAL_DIR)
}

pub fn load_manifest(config_dir: &Path) -> Result<Option<InstallManifest>> {
    let path = manifest_path(config_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read install manifest {}", path.display()))?;
    let manifest = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse install manifest JSON {}", path.display()))?;
    Ok(Some(manifest))
}

pub fn save_manifest(config_dir: &Path, manifest: &InstallManifest) -> Result<()> {
    fs::create_dir_all(config_dir)
        .with_context(|| format!("failed to create config dir {}", config_dir.display()))?;
    atomic_write_json(&manifest_path(config_dir), manifest)
}

pub fn clear_manifest(config_dir: &Path) -> Result<()> {
    let path = manifest_path(config_dir);
    if path.exists() {
        fs::remove_file(&path)
            .with_context(|| format!("failed to remove install manifest {}", path.display()))?;
    }
    Ok(())
}

/// Write both partial-install markers. Called right before the package
/// manager runs.
pub fn mark_install_started(config_dir: &Path, marker: &InProgressMarker) -> Result<()> {
    let partial = partial_dir(config_dir);
    fs::create_dir_all(&partial)
        .with_context(|| format!("failed to create {}", partial.display()))?;
    atomic_write_json(&inprogress_path(config_dir), marker)
}

pub fn read_inprogress(config_dir: &Path) -> Result<Option<InProgressMarker>> {
    let path = inprogress_path(config_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let marker = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(marker))
}

pub fn has_partial_install(config_dir: &Path) -> bool {
    inprogress_path(config_dir).exists() || partial_dir(config_dir).exists()
}

/// Remove both markers, returning the paths that were actually removed.
pub fn clear_partial_install(config_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    let marker = inprogress_path(config_dir);
    if marker.exists() {
        fs::remove_file(&marker)
            .with_context(|| format!("failed to remove {}", marker.display()))?;
        removed.push(marker);
    }

    let partial = partial_dir(config_dir);
    if partial.exists() {
        fs::remove_dir_all(&partial)
            .with_context(|| format!("failed to remove {}", partial.display()))?;
        removed.push(partial);
    }

    Ok(removed)
}

/// Create and remove a probe file in `dir`.
pub(crate) fn probe_writable(dir: &Path) -> std::io::Result<()> {
    let probe = dir.join(format!(".dockhand-probe-{}", std::process::id()));
    fs::write(&probe, b"")?;
    fs::remove_file(&probe)
}

pub(crate) fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = fs::File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

pub(crate) fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(value).context("failed to serialize JSON")?;

    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("failed to create tmp file {}", tmp.display()))?;
        f.write_all(&data)
            .with_context(|| format!("failed to write tmp file {}", tmp.display()))?;
        f.sync_all().ok();
    }

    fs::rename(&tmp, path).with_context(|| {
        format!(
            "failed to rename tmp file {} to {}",
            tmp.display(),
            path.display()
        )
    })?;

    fsync_parent_dir(path);

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn sample_manifest() -> InstallManifest {
        InstallManifest {
            manifest_version: CURRENT_MANIFEST_VERSION.to_string(),
            package: "demo".to_string(),
            version: "1.2.0".to_string(),
            artifact_path: PathBuf::from("dist/demo-1.2.0-py3-none-any.whl"),
            checksum: Some("abc123".to_string()),
            install_path: None,
            upgrade_path: UpgradePath::Upgrade,
            installed_at: Utc::now(),
            environment: EnvironmentFingerprint {
                dockhand_version: "0.4.0".to_string(),
                package_manager_version: Some("1.4.3".to_string()),
                os: "linux".to_string(),
                arch: "x86_64".to_string(),
                hostname: "host".to_string(),
            },
            component_counts: Some(ComponentCounts {
                core_files: 2,
                sub_files: 1,
                checks: 5,
            }),
        }
    }

    #[test]
    fn missing_manifest_loads_as_none() {
        let td = tempdir().expect("tempdir");
        assert!(load_manifest(td.path()).expect("load").is_none());
    }

    #[test]
    fn manifest_save_load_clear() {
        let td = tempdir().expect("tempdir");
        let m = sample_manifest();
        save_manifest(td.path(), &m).expect("save");
        assert!(!td.path().join("install-manifest.tmp").exists());

        let loaded = load_manifest(td.path()).expect("load").expect("present");
        assert_eq!(loaded, m);

        clear_manifest(td.path()).expect("clear");
        assert!(load_manifest(td.path()).expect("load").is_none());
    }

    #[test]
    fn manifest_without_schema_version_gets_default() {
        let td = tempdir().expect("tempdir");
        let mut value = serde_json::to_value(sample_manifest()).expect("to value");
        value
            .as_object_mut()
            .expect("object")
            .remove("manifest_version");
        fs::write(manifest_path(td.path()), value.to_string()).expect("write");

        let loaded = load_manifest(td.path()).expect("load").expect("present");
        assert_eq!(loaded.manifest_version, CURRENT_MANIFEST_VERSION);
    }

    #[test]
    fn partial_install_markers_roundtrip() {
        let td = tempdir().expect("tempdir");
        assert!(!has_partial_install(td.path()));

        let marker = InProgressMarker {
            package: "demo".to_string(),
            version: "1.2.0".to_string(),
            started_at: Utc::now(),
        };
        mark_install_started(td.path(), &marker).expect("mark");
        assert!(has_partial_install(td.path()));
        assert_eq!(read_inprogress(td.path()).expect("read"), Some(marker));

        let removed = clear_partial_install(td.path()).expect("clear");
        assert_eq!(removed.len(), 2);
        assert!(!has_partial_install(td.path()));
        assert!(clear_partial_install(td.path()).expect("clear again").is_empty());
    }
}

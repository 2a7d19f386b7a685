//! Build artifacts: the write-once fact registry that bridges build and
//! install, filename parsing, and the filesystem artifact validator.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::ports::ArtifactValidationPort;
use crate::types::ArtifactValidation;
use crate::version::parse_lenient;

/// Keys of facts published by the build stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactKey {
    ArtifactPath,
    Version,
    PackageName,
    Checksum,
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactKey::ArtifactPath => "ARTIFACT_PATH",
            ArtifactKey::Version => "VERSION",
            ArtifactKey::PackageName => "PACKAGE_NAME",
            ArtifactKey::Checksum => "CHECKSUM",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("artifact registry key {key} already written (existing value: {existing})")]
    AlreadyWritten { key: ArtifactKey, existing: String },
}

/// Write-once store of build facts for one process run.
///
/// Passed by reference through the orchestrators; a second write to the same
/// key is rejected and leaves the first value in place.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ArtifactRegistry {
    entries: BTreeMap<ArtifactKey, String>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: ArtifactKey, value: impl Into<String>) -> Result<(), RegistryError> {
        if let Some(existing) = self.entries.get(&key) {
            return Err(RegistryError::AlreadyWritten {
                key,
                existing: existing.clone(),
            });
        }
        self.entries.insert(key, value.into());
        Ok(())
    }

    pub fn get(&self, key: ArtifactKey) -> Option<&str> {
        self.entries.get(&key).map(String::as_str)
    }

    pub fn artifact_path(&self) -> Option<PathBuf> {
        self.get(ArtifactKey::ArtifactPath).map(PathBuf::from)
    }

    pub fn version(&self) -> Option<&str> {
        self.get(ArtifactKey::Version)
    }

    pub fn contains(&self, key: ArtifactKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Name and version encoded in an artifact file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub package_name: String,
    pub version: String,
    pub extension: String,
}

/// Parse `name-version[-tags].ext`.
///
/// The package name is every dash-separated segment before the first one that
/// parses as a version, so `my-tool-1.2.0.crate` and
/// `my_tool-1.2.0-py3-none-any.whl` both work. Segments after the version
/// that extend it into a valid prerelease (`demo-1.3.0-rc.1-py3-none-any.whl`)
/// belong to the version; platform and interpreter tags do not.
pub fn parse_artifact_filename(file_name: &str, extensions: &[String]) -> Option<ArtifactName> {
    let mut exts: Vec<&String> = extensions.iter().collect();
    // Longest first so `tar.gz` wins over `gz`.
    exts.sort_by_key(|e| std::cmp::Reverse(e.len()));
    let (stem, extension) = exts.iter().find_map(|ext| {
        file_name
            .strip_suffix(ext.as_str())
            .and_then(|s| s.strip_suffix('.'))
            .map(|stem| (stem, ext.to_string()))
    })?;

    let segments: Vec<&str> = stem.split('-').collect();
    let idx = segments
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, seg)| {
            seg.starts_with(|c: char| c.is_ascii_digit()) && parse_lenient(seg).is_ok()
        })
        .map(|(idx, _)| idx)?;

    let mut end = idx + 1;
    while let Some(seg) = segments.get(end) {
        let extended = segments[idx..=end].join("-");
        if is_compatibility_tag(seg) || parse_lenient(&extended).is_err() {
            break;
        }
        end += 1;
    }

    Some(ArtifactName {
        package_name: segments[..idx].join("-"),
        version: segments[idx..end].join("-"),
        extension,
    })
}

/// Wheel interpreter/ABI/platform tags and common binary target names.
fn is_compatibility_tag(segment: &str) -> bool {
    const PREFIXES: &[&str] = &[
        "py", "cp", "pp", "ip", "jy", "abi3", "none", "any", "manylinux", "musllinux", "macosx",
        "win", "linux", "darwin", "x86", "amd64", "arm", "aarch64", "i686", "universal",
    ];
    let lower = segment.to_ascii_lowercase();
    !segment.starts_with(|c: char| c.is_ascii_alphabetic())
        || PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Package names compare equal across `-`, `_` and `.` spellings.
pub fn normalize_package_name(name: &str) -> String {
    name.to_ascii_lowercase().replace(['_', '.'], "-")
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open artifact {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("failed to read artifact {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Validates that an artifact is acceptable for distribution: it exists, is a
/// non-empty file, has an accepted extension and a `name-version` file name,
/// and (optionally) carries the expected package name.
#[derive(Debug, Clone)]
pub struct FsArtifactValidator {
    pub extensions: Vec<String>,
    pub expected_package: Option<String>,
}

impl FsArtifactValidator {
    pub fn new(extensions: Vec<String>, expected_package: Option<String>) -> Self {
        Self {
            extensions,
            expected_package,
        }
    }
}

impl ArtifactValidationPort for FsArtifactValidator {
    fn validate(&self, artifact_path: &Path) -> ArtifactValidation {
        let mut errors = Vec::new();

        match std::fs::metadata(artifact_path) {
            Ok(meta) if !meta.is_file() => {
                errors.push(format!("{} is not a file", artifact_path.display()));
            }
            Ok(meta) if meta.len() == 0 => {
                errors.push(format!("{} is empty", artifact_path.display()));
            }
            Ok(_) => {}
            Err(_) => {
                errors.push(format!("artifact not found: {}", artifact_path.display()));
            }
        }

        let file_name = artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let parsed = parse_artifact_filename(&file_name, &self.extensions);
        match &parsed {
            None => errors.push(format!(
                "artifact name '{file_name}' does not match <name>-<version>.<ext> with ext in [{}]",
                self.extensions.join(", ")
            )),
            Some(name) => {
                if let Some(expected) = &self.expected_package
                    && normalize_package_name(expected) != normalize_package_name(&name.package_name)
                {
                    errors.push(format!(
                        "artifact package '{}' does not match expected package '{expected}'",
                        name.package_name
                    ));
                }
            }
        }

        ArtifactValidation {
            is_valid: errors.is_empty(),
            version: parsed.as_ref().map(|n| n.version.clone()),
            package_name: parsed.map(|n| n.package_name),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn exts() -> Vec<String> {
        vec!["whl".to_string(), "tar.gz".to_string(), "crate".to_string()]
    }

    #[test]
    fn registry_read_before_write_is_absent() {
        let reg = ArtifactRegistry::new();
        assert!(reg.get(ArtifactKey::Version).is_none());
        assert!(reg.artifact_path().is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn registry_rejects_second_write_and_keeps_first_value() {
        let mut reg = ArtifactRegistry::new();
        reg.set(ArtifactKey::Version, "1.0.0").expect("first write");
        let err = reg.set(ArtifactKey::Version, "2.0.0").unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadyWritten {
                key: ArtifactKey::Version,
                existing: "1.0.0".to_string()
            }
        );
        assert_eq!(reg.version(), Some("1.0.0"));
        assert!(err.to_string().contains("VERSION already written"));
    }

    #[test]
    fn parses_wheel_and_crate_names() {
        let wheel = parse_artifact_filename("my_tool-1.2.0-py3-none-any.whl", &exts()).expect("wheel");
        assert_eq!(wheel.package_name, "my_tool");
        assert_eq!(wheel.version, "1.2.0");
        assert_eq!(wheel.extension, "whl");

        let krate = parse_artifact_filename("my-tool-0.3.1.crate", &exts()).expect("crate");
        assert_eq!(krate.package_name, "my-tool");
        assert_eq!(krate.version, "0.3.1");

        let sdist = parse_artifact_filename("demo-2.0.0.tar.gz", &exts()).expect("sdist");
        assert_eq!(sdist.extension, "tar.gz");
        assert_eq!(sdist.version, "2.0.0");
    }

    #[test]
    fn prerelease_segments_stay_with_the_version() {
        let rc = parse_artifact_filename("demo-1.3.0-rc.1-py3-none-any.whl", &exts()).expect("rc");
        assert_eq!(rc.package_name, "demo");
        assert_eq!(rc.version, "1.3.0-rc.1");

        let beta = parse_artifact_filename("my-tool-2.0.0-beta.crate", &exts()).expect("beta");
        assert_eq!(beta.package_name, "my-tool");
        assert_eq!(beta.version, "2.0.0-beta");

        let pep = parse_artifact_filename("demo-1.3.0rc1-py3-none-any.whl", &exts()).expect("pep");
        assert_eq!(pep.version, "1.3.0rc1");

        let binary = parse_artifact_filename("tool-1.0.0-linux-amd64.tar.gz", &exts()).expect("bin");
        assert_eq!(binary.version, "1.0.0");
    }

    #[test]
    fn rejects_names_without_version_or_extension() {
        assert!(parse_artifact_filename("demo.whl", &exts()).is_none());
        assert!(parse_artifact_filename("demo-x.whl", &exts()).is_none());
        assert!(parse_artifact_filename("demo-1.0.0.zip", &exts()).is_none());
        assert!(parse_artifact_filename("1.0.0.whl", &exts()).is_none());
    }

    #[test]
    fn validator_accepts_well_formed_artifact() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("demo_app-1.4.0-py3-none-any.whl");
        fs::write(&path, b"payload").expect("write");

        let v = FsArtifactValidator::new(exts(), Some("demo-app".to_string())).validate(&path);
        assert!(v.is_valid, "errors: {:?}", v.errors);
        assert_eq!(v.version.as_deref(), Some("1.4.0"));
        assert_eq!(v.package_name.as_deref(), Some("demo_app"));
    }

    #[test]
    fn validator_collects_every_error() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("other-1.0.0.whl");
        fs::write(&path, b"").expect("write");

        let v = FsArtifactValidator::new(exts(), Some("demo".to_string())).validate(&path);
        assert!(!v.is_valid);
        assert_eq!(v.errors.len(), 2);
        assert!(v.errors[0].contains("is empty"));
        assert!(v.errors[1].contains("does not match expected package"));
    }

    #[test]
    fn validator_reports_missing_artifact() {
        let td = tempdir().expect("tempdir");
        let v = FsArtifactValidator::new(exts(), None).validate(&td.path().join("demo-1.0.0.whl"));
        assert!(!v.is_valid);
        assert!(v.errors[0].contains("artifact not found"));
    }

    #[test]
    fn sha256_matches_known_digest() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("a.bin");
        fs::write(&path, b"abc").expect("write");
        assert_eq!(
            sha256_file(&path).expect("hash"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

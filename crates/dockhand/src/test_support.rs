//! In-memory port fakes shared by the orchestrator tests.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ports::{
    ArtifactValidationPort, BuildError, BuildPort, InstallOutcome, InstalledPackage,
    PackageManagerError, PackageManagerPort, PublishError, PublishPort, UninstallOutcome,
};
use crate::types::ArtifactValidation;

/// Package manager whose installed set is a mutable list.
#[derive(Debug, Default)]
pub struct FakePackageManager {
    pub available: bool,
    pub installed: RefCell<Vec<InstalledPackage>>,
    /// When set, `install` fails with this message.
    pub fail_install: Option<String>,
    pub fail_list: bool,
    pub install_calls: RefCell<Vec<(PathBuf, bool)>>,
    pub uninstall_calls: RefCell<Vec<String>>,
    pub index_installs: RefCell<Vec<(String, String, String)>>,
    pub install_path: Option<PathBuf>,
    /// Turned into non-empty directories after a successful install so that
    /// later writes to these paths fail.
    pub occupy_after_install: Vec<PathBuf>,
}

impl FakePackageManager {
    pub fn new() -> Self {
        Self {
            available: true,
            ..Default::default()
        }
    }

    pub fn with_installed(self, name: &str, version: &str) -> Self {
        self.installed.borrow_mut().push(InstalledPackage {
            name: name.to_string(),
            version: version.to_string(),
            path: self.install_path.clone(),
        });
        self
    }

    pub fn installed_version(&self, name: &str) -> Option<String> {
        self.installed
            .borrow()
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.version.clone())
    }
}

impl PackageManagerPort for FakePackageManager {
    fn name(&self) -> &str {
        "fakepm"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn install(&self, artifact: &Path, force: bool) -> InstallOutcome {
        self.install_calls
            .borrow_mut()
            .push((artifact.to_path_buf(), force));
        if let Some(msg) = &self.fail_install {
            return InstallOutcome::failed(msg.clone());
        }

        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let parsed = crate::artifact::parse_artifact_filename(
            &file_name,
            &["whl".to_string(), "tar.gz".to_string()],
        );
        let Some(parsed) = parsed else {
            return InstallOutcome::failed(format!("cannot install {file_name}"));
        };

        let mut installed = self.installed.borrow_mut();
        installed.retain(|p| p.name != parsed.package_name);
        installed.push(InstalledPackage {
            name: parsed.package_name,
            version: parsed.version.clone(),
            path: self.install_path.clone(),
        });
        for path in &self.occupy_after_install {
            if fs::create_dir_all(path).is_err() || fs::write(path.join("occupied"), b"").is_err() {
                return InstallOutcome::failed(format!("cannot occupy {}", path.display()));
            }
        }
        InstallOutcome {
            success: true,
            version: Some(parsed.version),
            install_path: self.install_path.clone(),
            error_message: None,
        }
    }

    fn uninstall(&self, name: &str) -> UninstallOutcome {
        self.uninstall_calls.borrow_mut().push(name.to_string());
        let mut installed = self.installed.borrow_mut();
        let before = installed.len();
        installed.retain(|p| p.name != name);
        if installed.len() == before {
            UninstallOutcome {
                success: false,
                error_message: Some(format!("{name} is not installed")),
            }
        } else {
            UninstallOutcome {
                success: true,
                error_message: None,
            }
        }
    }

    fn list_installed(&self) -> Result<Vec<InstalledPackage>, PackageManagerError> {
        if self.fail_list {
            return Err(PackageManagerError::CommandFailed("list exploded".to_string()));
        }
        Ok(self.installed.borrow().clone())
    }

    fn install_from_index(&self, name: &str, version: &str, index_url: &str) -> InstallOutcome {
        self.index_installs.borrow_mut().push((
            name.to_string(),
            version.to_string(),
            index_url.to_string(),
        ));
        if let Some(msg) = &self.fail_install {
            return InstallOutcome::failed(msg.clone());
        }
        InstallOutcome {
            success: true,
            version: Some(version.to_string()),
            install_path: self.install_path.clone(),
            error_message: None,
        }
    }
}

/// Build tool that writes `<name>-<version>-py3-none-any.whl`.
#[derive(Debug)]
pub struct FakeBuildTool {
    pub package: String,
    /// Overrides the version written into the file name.
    pub artifact_version: Option<String>,
    pub fail: Option<BuildError>,
    pub calls: RefCell<usize>,
}

impl FakeBuildTool {
    pub fn new(package: &str) -> Self {
        Self {
            package: package.to_string(),
            artifact_version: None,
            fail: None,
            calls: RefCell::new(0),
        }
    }
}

impl BuildPort for FakeBuildTool {
    fn build_artifact(&self, output_dir: &Path, version: &str) -> Result<PathBuf, BuildError> {
        *self.calls.borrow_mut() += 1;
        if let Some(err) = &self.fail {
            return Err(err.clone());
        }
        fs::create_dir_all(output_dir).map_err(|e| BuildError::new(e.to_string()))?;
        let version = self.artifact_version.as_deref().unwrap_or(version);
        let path = output_dir.join(format!("{}-{version}-py3-none-any.whl", self.package));
        fs::write(&path, b"wheel").map_err(|e| BuildError::new(e.to_string()))?;
        Ok(path)
    }

    fn clean_artifacts(&self, _output_dir: &Path) -> Result<(), BuildError> {
        Ok(())
    }

    fn locate_artifact(&self, dir: &Path) -> Option<PathBuf> {
        fs::read_dir(dir)
            .ok()?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .find(|p| p.extension().is_some_and(|ext| ext == "whl"))
    }
}

/// Validator returning a fixed verdict.
#[derive(Debug, Clone)]
pub struct FixedValidator(pub ArtifactValidation);

impl FixedValidator {
    pub fn valid(name: &str, version: &str) -> Self {
        Self(ArtifactValidation {
            is_valid: true,
            version: Some(version.to_string()),
            package_name: Some(name.to_string()),
            errors: Vec::new(),
        })
    }

    pub fn invalid(errors: &[&str]) -> Self {
        Self(ArtifactValidation {
            is_valid: false,
            version: None,
            package_name: None,
            errors: errors.iter().map(|e| e.to_string()).collect(),
        })
    }
}

impl ArtifactValidationPort for FixedValidator {
    fn validate(&self, _artifact: &Path) -> ArtifactValidation {
        self.0.clone()
    }
}

#[derive(Debug, Default)]
pub struct FakePublisher {
    pub fail_check: bool,
    pub fail_upload: bool,
}

impl PublishPort for FakePublisher {
    fn check_metadata(&self, _artifact: &Path) -> Result<String, PublishError> {
        if self.fail_check {
            return Err(PublishError {
                message: "long_description has syntax errors".to_string(),
                output: None,
            });
        }
        Ok("PASSED".to_string())
    }

    fn upload_staging(&self, _artifact: &Path) -> Result<String, PublishError> {
        if self.fail_upload {
            return Err(PublishError {
                message: "403 Forbidden".to_string(),
                output: Some("invalid or non-existent authentication".to_string()),
            });
        }
        Ok("uploaded".to_string())
    }
}

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::artifact::parse_artifact_filename;
use crate::config::PackageManagerConfig;
use crate::ports::{
    InstallOutcome, InstalledPackage, PackageManagerError, PackageManagerPort, UninstallOutcome,
};
use crate::process::{CommandOutput, program_available, run_command};

const OUTPUT_TAIL_LINES: usize = 20;

/// [`PackageManagerPort`] over `pipx`.
#[derive(Debug, Clone)]
pub struct PipxPackageManager {
    program: String,
    install_args: Vec<String>,
    extensions: Vec<String>,
    working_dir: PathBuf,
    timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct PipxList {
    #[serde(default)]
    venvs: BTreeMap<String, PipxVenv>,
}

#[derive(Debug, Deserialize)]
struct PipxVenv {
    metadata: PipxMetadata,
}

#[derive(Debug, Deserialize)]
struct PipxMetadata {
    main_package: PipxPackage,
}

#[derive(Debug, Deserialize)]
struct PipxPackage {
    package: String,
    package_version: String,
}

impl PipxPackageManager {
    pub fn new(
        program: impl Into<String>,
        install_args: Vec<String>,
        extensions: Vec<String>,
        working_dir: impl Into<PathBuf>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            program: program.into(),
            install_args,
            extensions,
            working_dir: working_dir.into(),
            timeout,
        }
    }

    pub fn from_config(config: &PackageManagerConfig, extensions: &[String], working_dir: &Path) -> Self {
        Self::new(
            pm_program(&config.program),
            config.install_args.clone(),
            extensions.to_vec(),
            working_dir,
            Some(config.timeout),
        )
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput, String> {
        run_command(&self.program, args, &self.working_dir, self.timeout).map_err(|e| format!("{e:#}"))
    }

    /// Root of pipx's virtualenvs, when pipx can tell us.
    fn venvs_root(&self) -> Option<PathBuf> {
        let out = self.run(&["environment", "--value", "PIPX_LOCAL_VENVS"]).ok()?;
        let value = out.stdout.trim();
        (out.success() && !value.is_empty()).then(|| PathBuf::from(value))
    }

    fn install_with(&self, target: &str, force: bool, extra: &[&str]) -> InstallOutcome {
        let mut args = vec!["install"];
        if force {
            args.push("--force");
        }
        args.push(target);
        args.extend_from_slice(extra);
        args.extend(self.install_args.iter().map(String::as_str));

        match self.run(&args) {
            Err(e) => InstallOutcome::failed(e),
            Ok(out) if out.success() => InstallOutcome {
                success: true,
                version: None,
                install_path: None,
                error_message: None,
            },
            Ok(out) => InstallOutcome::failed(failure_message(&self.program, "install", &out)),
        }
    }
}

impl PackageManagerPort for PipxPackageManager {
    fn name(&self) -> &str {
        &self.program
    }

    fn is_available(&self) -> bool {
        program_available(&self.program)
    }

    fn install(&self, artifact: &Path, force: bool) -> InstallOutcome {
        let mut outcome = self.install_with(&artifact.to_string_lossy(), force, &[]);
        if outcome.success {
            let parsed = artifact
                .file_name()
                .and_then(|n| parse_artifact_filename(&n.to_string_lossy(), &self.extensions));
            if let Some(parsed) = parsed {
                outcome.install_path = self.venvs_root().map(|root| root.join(&parsed.package_name));
                outcome.version = Some(parsed.version);
            }
        }
        outcome
    }

    fn uninstall(&self, name: &str) -> UninstallOutcome {
        match self.run(&["uninstall", name]) {
            Err(e) => UninstallOutcome {
                success: false,
                error_message: Some(e),
            },
            Ok(out) if out.success() => UninstallOutcome {
                success: true,
                error_message: None,
            },
            Ok(out) => UninstallOutcome {
                success: false,
                error_message: Some(failure_message(&self.program, "uninstall", &out)),
            },
        }
    }

    fn list_installed(&self) -> Result<Vec<InstalledPackage>, PackageManagerError> {
        if !self.is_available() {
            return Err(PackageManagerError::Unavailable(self.program.clone()));
        }
        let out = self
            .run(&["list", "--json"])
            .map_err(PackageManagerError::CommandFailed)?;
        if !out.success() {
            return Err(PackageManagerError::CommandFailed(failure_message(
                &self.program,
                "list",
                &out,
            )));
        }
        let root = self.venvs_root();
        parse_pipx_list(&out.stdout, root.as_deref())
    }

    fn install_from_index(&self, name: &str, version: &str, index_url: &str) -> InstallOutcome {
        let requirement = format!("{name}=={version}");
        let mut outcome = self.install_with(&requirement, true, &["--index-url", index_url]);
        if outcome.success {
            outcome.version = Some(version.to_string());
        }
        outcome
    }
}

fn parse_pipx_list(json: &str, venvs_root: Option<&Path>) -> Result<Vec<InstalledPackage>, PackageManagerError> {
    let list: PipxList =
        serde_json::from_str(json).map_err(|e| PackageManagerError::Parse(e.to_string()))?;
    Ok(list
        .venvs
        .into_iter()
        .map(|(venv, v)| InstalledPackage {
            name: v.metadata.main_package.package,
            version: v.metadata.main_package.package_version,
            path: venvs_root.map(|root| root.join(venv)),
        })
        .collect())
}

fn failure_message(program: &str, action: &str, out: &CommandOutput) -> String {
    let tail = out.tail(OUTPUT_TAIL_LINES);
    let head = if out.timed_out {
        format!("{program} {action} timed out")
    } else {
        format!("{program} {action} failed (exit code {})", out.exit_code)
    };
    if tail.is_empty() { head } else { format!("{head}: {tail}") }
}

fn pm_program(configured: &str) -> String {
    env::var("DOCKHAND_PM_BIN").unwrap_or_else(|_| configured.to_string())
}

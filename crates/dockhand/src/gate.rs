//! CI quality gate: five ordered acceptance checks over the release chain.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::artifact::parse_artifact_filename;
use crate::health::{HealthCheck, overall_status};
use crate::ports::{BuildPort, PackageManagerPort, PublishError, PublishPort};
use crate::process::run_shell;
use crate::types::{GateResult, HealthStatus, QualityGateResult};

pub const GATE_ARTIFACT_EXISTS: &str = "artifact-exists";
pub const GATE_METADATA_CHECK: &str = "metadata-check";
pub const GATE_STAGING_UPLOAD: &str = "staging-upload";
pub const GATE_STAGING_INSTALL: &str = "staging-install";
pub const GATE_POST_INSTALL_HEALTH: &str = "post-install-health";

pub const GATE_COUNT: usize = 5;

/// Located build artifact with the name and version from its file name.
#[derive(Debug, Clone)]
struct GateArtifact {
    path: PathBuf,
    package: String,
    version: String,
}

pub struct QualityGate<'a> {
    build: &'a dyn BuildPort,
    publisher: &'a dyn PublishPort,
    package_manager: &'a dyn PackageManagerPort,
    health: Option<&'a dyn HealthCheck>,
    artifact_dir: PathBuf,
    extensions: Vec<String>,
    staging_index_url: String,
    last_run: Option<QualityGateResult>,
}

impl<'a> QualityGate<'a> {
    pub fn new(
        build: &'a dyn BuildPort,
        publisher: &'a dyn PublishPort,
        package_manager: &'a dyn PackageManagerPort,
        health: Option<&'a dyn HealthCheck>,
        artifact_dir: impl Into<PathBuf>,
        extensions: Vec<String>,
        staging_index_url: impl Into<String>,
    ) -> Self {
        Self {
            build,
            publisher,
            package_manager,
            health,
            artifact_dir: artifact_dir.into(),
            extensions,
            staging_index_url: staging_index_url.into(),
            last_run: None,
        }
    }

    /// Run every gate in order. A failed gate never stops the later ones;
    /// gates that depend on an artifact fail with a pointer to the first gate
    /// when none was found, and the health gate fails when the staging install
    /// did not succeed.
    pub fn validate_all(&mut self) -> QualityGateResult {
        let located = self.locate();
        let artifact = located.as_ref().ok();

        let staging_install = self.gate_staging_install(artifact);
        let staged = staging_install.passed;
        let gate_results = vec![
            self.gate_artifact_exists(&located),
            self.gate_metadata(artifact),
            self.gate_staging_upload(artifact),
            staging_install,
            self.gate_post_install_health(artifact, staged),
        ];

        let passed_count = gate_results.iter().filter(|g| g.passed).count();
        let failed: Vec<&str> = gate_results
            .iter()
            .filter(|g| !g.passed)
            .map(|g| g.check_name.as_str())
            .collect();
        let summary = if failed.is_empty() {
            format!("{passed_count}/{GATE_COUNT} gates passed")
        } else {
            format!(
                "{passed_count}/{GATE_COUNT} gates passed; failed: {}",
                failed.join(", ")
            )
        };

        let result = QualityGateResult {
            passed: failed.is_empty(),
            gate_results,
            summary,
        };
        self.last_run = Some(result.clone());
        result
    }

    pub fn last_run(&self) -> Option<&QualityGateResult> {
        self.last_run.as_ref()
    }

    /// Markdown report of the failed gates from the last run.
    pub fn get_failure_diagnostics(&self) -> String {
        let Some(run) = &self.last_run else {
            return "No quality gate results yet; run validate_all first.".to_string();
        };
        if run.passed {
            return format!("All {GATE_COUNT} quality gates passed.");
        }

        let mut out = String::from("# Quality gate failures\n\n");
        let _ = writeln!(out, "{}\n", run.summary);
        for gate in run.gate_results.iter().filter(|g| !g.passed) {
            let _ = writeln!(out, "## {}\n", gate.check_name);
            let _ = writeln!(out, "{}\n", gate.message);
            if let Some(fix) = &gate.suggested_fix {
                let _ = writeln!(out, "**Suggested fix:** {fix}\n");
            }
        }
        out
    }

    fn locate(&self) -> Result<GateArtifact, String> {
        let path = self.build.locate_artifact(&self.artifact_dir).ok_or_else(|| {
            format!("no build artifact found in {}", self.artifact_dir.display())
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let parsed = parse_artifact_filename(&file_name, &self.extensions).ok_or_else(|| {
            format!("artifact {file_name} does not follow <name>-<version>.<ext>")
        })?;
        Ok(GateArtifact {
            path,
            package: parsed.package_name,
            version: parsed.version,
        })
    }

    fn gate_artifact_exists(&self, located: &Result<GateArtifact, String>) -> GateResult {
        match located {
            Ok(a) => pass(GATE_ARTIFACT_EXISTS, format!("found {}", a.path.display())),
            Err(msg) => fail(GATE_ARTIFACT_EXISTS, msg.clone(), "run `dockhand build` first"),
        }
    }

    fn gate_metadata(&self, artifact: Option<&GateArtifact>) -> GateResult {
        let Some(a) = artifact else {
            return missing_artifact(GATE_METADATA_CHECK);
        };
        match self.publisher.check_metadata(&a.path) {
            Ok(_) => pass(GATE_METADATA_CHECK, "package metadata is valid"),
            Err(e) => fail(
                GATE_METADATA_CHECK,
                describe(&e),
                "fix the package metadata (README rendering, classifiers, license) and rebuild",
            ),
        }
    }

    fn gate_staging_upload(&self, artifact: Option<&GateArtifact>) -> GateResult {
        let Some(a) = artifact else {
            return missing_artifact(GATE_STAGING_UPLOAD);
        };
        match self.publisher.upload_staging(&a.path) {
            Ok(_) => pass(
                GATE_STAGING_UPLOAD,
                format!("uploaded {} {} to the staging index", a.package, a.version),
            ),
            Err(e) => fail(
                GATE_STAGING_UPLOAD,
                describe(&e),
                "check the staging index credentials and that this version was not already uploaded",
            ),
        }
    }

    fn gate_staging_install(&self, artifact: Option<&GateArtifact>) -> GateResult {
        let Some(a) = artifact else {
            return missing_artifact(GATE_STAGING_INSTALL);
        };
        let outcome = self.package_manager.install_from_index(
            &a.package,
            &a.version,
            &self.staging_index_url,
        );
        if outcome.success {
            pass(
                GATE_STAGING_INSTALL,
                format!("installed {}=={} from {}", a.package, a.version, self.staging_index_url),
            )
        } else {
            fail(
                GATE_STAGING_INSTALL,
                outcome
                    .error_message
                    .unwrap_or_else(|| "install from staging index failed".to_string()),
                "wait for the staging index to publish the upload, then check dependency availability there",
            )
        }
    }

    fn gate_post_install_health(&self, artifact: Option<&GateArtifact>, staged: bool) -> GateResult {
        let Some(a) = artifact else {
            return missing_artifact(GATE_POST_INSTALL_HEALTH);
        };
        if !staged {
            return fail(
                GATE_POST_INSTALL_HEALTH,
                "staging install did not succeed; nothing to check",
                &format!("fix the {GATE_STAGING_INSTALL} gate first"),
            );
        }
        let Some(health) = self.health else {
            return fail(
                GATE_POST_INSTALL_HEALTH,
                "no health checks configured",
                "set [package].name in dockhand.toml so the installed package can be checked",
            );
        };
        let results = health.check_health(Some(&a.version));
        match overall_status(&results) {
            HealthStatus::Unhealthy => {
                let failing = results
                    .iter()
                    .filter(|r| r.status == HealthStatus::Unhealthy)
                    .map(|r| format!("{}: {}", r.component, r.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                fail(
                    GATE_POST_INSTALL_HEALTH,
                    format!("installation is UNHEALTHY: {failing}"),
                    "run `dockhand doctor` against the staging install",
                )
            }
            status => pass(GATE_POST_INSTALL_HEALTH, format!("installation is {status}")),
        }
    }
}

fn pass(name: &str, message: impl Into<String>) -> GateResult {
    GateResult {
        check_name: name.to_string(),
        passed: true,
        message: message.into(),
        suggested_fix: None,
    }
}

fn fail(name: &str, message: impl Into<String>, fix: &str) -> GateResult {
    GateResult {
        check_name: name.to_string(),
        passed: false,
        message: message.into(),
        suggested_fix: Some(fix.to_string()),
    }
}

fn missing_artifact(name: &str) -> GateResult {
    fail(
        name,
        "no artifact to check",
        &format!("fix the {GATE_ARTIFACT_EXISTS} gate first"),
    )
}

fn describe(e: &PublishError) -> String {
    match &e.output {
        Some(out) if !out.trim().is_empty() => format!("{}\n{}", e.message, out.trim_end()),
        _ => e.message.clone(),
    }
}

/// [`PublishPort`] over the configured shell commands. `{artifact}` in a
/// command is replaced with the shell-quoted artifact path.
#[derive(Debug, Clone)]
pub struct CommandPublisher {
    pub check_command: String,
    pub upload_command: String,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl CommandPublisher {
    fn run(&self, template: &str, artifact: &Path) -> Result<String, PublishError> {
        let command_line = template.replace("{artifact}", &shell_quote(&artifact.to_string_lossy()));
        let out = run_shell(&command_line, &self.working_dir, self.timeout).map_err(|e| PublishError {
            message: format!("{e:#}"),
            output: None,
        })?;
        if out.success() {
            return Ok(out.combined());
        }
        let message = if out.timed_out {
            format!("`{command_line}` timed out")
        } else {
            format!("`{command_line}` exited with code {}", out.exit_code)
        };
        Err(PublishError {
            message,
            output: Some(out.tail(20)),
        })
    }
}

impl PublishPort for CommandPublisher {
    fn check_metadata(&self, artifact: &Path) -> Result<String, PublishError> {
        self.run(&self.check_command, artifact)
    }

    fn upload_staging(&self, artifact: &Path) -> Result<String, PublishError> {
        self.run(&self.upload_command, artifact)
    }
}

fn shell_quote(s: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "-_./+=:@".contains(c);
    if !s.is_empty() && s.chars().all(safe) {
        s.to_string()
    } else if cfg!(windows) {
        format!("\"{s}\"")
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

//! Build pipeline: pre-flight, version, build, validate, register.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::artifact::{ArtifactKey, ArtifactRegistry, sha256_file};
use crate::check::{CheckRegistry, has_blocking_failure, summarize_blocking};
use crate::git;
use crate::ports::{ArtifactValidationPort, BuildPort};
use crate::report::Reporter;
use crate::types::{ArtifactValidation, BuildResult, CandidateVersion, CheckResult};
use crate::version::{compare_versions, determine_candidate};

/// Inputs for one build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub current_version: String,
    pub commit_messages: Vec<String>,
    pub prerelease: Option<String>,
    pub output_dir: PathBuf,
    /// Remove old artifacts before building.
    pub clean_first: bool,
    /// Fail instead of warn when the artifact's version differs from the
    /// computed one.
    pub require_version_match: bool,
}

/// Current release version and the commits since it, from git.
///
/// An explicit `current_version` skips tag discovery; commits are then read
/// since the matching tag when one exists. An untagged repository starts
/// from `0.0.0` with its full history.
pub fn collect_version_inputs(
    project_root: &Path,
    current_version: Option<&str>,
) -> Result<(String, Vec<String>)> {
    match current_version {
        Some(v) => {
            let tag = git::tag_for_version(project_root, v);
            let messages = git::commit_messages_since(project_root, tag.as_deref())
                .context("failed to read commit history")?;
            Ok((v.to_string(), messages))
        }
        None => {
            let latest = git::latest_tag_version(project_root)
                .context("failed to determine latest release tag")?;
            let tag = latest
                .as_deref()
                .and_then(|v| git::tag_for_version(project_root, v));
            let messages = git::commit_messages_since(project_root, tag.as_deref())
                .context("failed to read commit history")?;
            Ok((latest.unwrap_or_else(|| "0.0.0".to_string()), messages))
        }
    }
}

/// Run the build pipeline.
///
/// Check failures, build failures and invalid artifacts come back as a
/// failed [`BuildResult`]; only unexpected errors (including a second write
/// to the artifact registry) are returned as `Err`. The registry is written
/// only when every step succeeded.
pub fn run_build(
    preflight: &CheckRegistry<'_>,
    build_port: &dyn BuildPort,
    validator: &dyn ArtifactValidationPort,
    request: &BuildRequest,
    registry: &mut ArtifactRegistry,
    reporter: &mut dyn Reporter,
) -> Result<BuildResult> {
    reporter.info("running build pre-flight checks...");
    let pre_flight_results = preflight.run_all_guarded();
    report_checks(&pre_flight_results, reporter);

    if has_blocking_failure(&pre_flight_results) {
        let msg = format!("pre-flight: {}", summarize_blocking(&pre_flight_results));
        reporter.error(&msg);
        return Ok(failed(pre_flight_results, None, None, msg));
    }

    let candidate = match determine_candidate(
        &request.current_version,
        &request.commit_messages,
        request.prerelease.as_deref(),
    ) {
        Ok(c) => c,
        Err(e) => {
            let msg = format!("version: {e:#}");
            reporter.error(&msg);
            return Ok(failed(pre_flight_results, None, None, msg));
        }
    };
    reporter.info(&format!(
        "{} -> {} ({} from {} commit(s))",
        candidate.current_version,
        candidate.next_version,
        candidate.bump_type,
        candidate.commit_messages.len()
    ));

    if request.clean_first
        && let Err(e) = build_port.clean_artifacts(&request.output_dir)
    {
        let msg = format!("clean failed: {}", e.describe());
        reporter.error(&msg);
        return Ok(failed(pre_flight_results, Some(candidate), None, msg));
    }

    reporter.info(&format!(
        "building {} into {}...",
        candidate.next_version,
        request.output_dir.display()
    ));
    let artifact = match build_port.build_artifact(&request.output_dir, &candidate.next_version) {
        Ok(path) => path,
        Err(e) => {
            if let Some(output) = &e.captured_output {
                reporter.error(output);
            }
            let msg = format!("build failed: {}", e.describe());
            reporter.error(&msg);
            return Ok(failed(pre_flight_results, Some(candidate), None, msg));
        }
    };

    let validation = validator.validate(&artifact);
    if !validation.is_valid {
        let msg = format!("validation failed: {}", validation.errors.join("; "));
        reporter.error(&msg);
        return Ok(failed(pre_flight_results, Some(candidate), Some(validation), msg));
    }

    let version = match validation.version.clone() {
        Some(artifact_version)
            if !compare_versions(&artifact_version, &candidate.next_version).is_eq() =>
        {
            let msg = format!(
                "version mismatch: artifact is {artifact_version} but computed version is {}",
                candidate.next_version
            );
            if request.require_version_match {
                reporter.error(&msg);
                return Ok(failed(pre_flight_results, Some(candidate), Some(validation), msg));
            }
            reporter.warn(&msg);
            artifact_version
        }
        Some(artifact_version) => artifact_version,
        None => candidate.next_version.clone(),
    };

    let checksum = sha256_file(&artifact)?;
    registry.set(ArtifactKey::ArtifactPath, artifact.to_string_lossy())?;
    registry.set(ArtifactKey::Version, version.clone())?;
    if let Some(name) = &validation.package_name {
        registry.set(ArtifactKey::PackageName, name.clone())?;
    }
    registry.set(ArtifactKey::Checksum, checksum)?;

    reporter.info(&format!("built {} ({version})", artifact.display()));
    Ok(BuildResult {
        success: true,
        artifact_path: Some(artifact),
        version: Some(version),
        candidate: Some(candidate),
        pre_flight_results,
        validation_result: Some(validation),
        error_message: None,
    })
}

fn failed(
    pre_flight_results: Vec<CheckResult>,
    candidate: Option<CandidateVersion>,
    validation: Option<ArtifactValidation>,
    message: String,
) -> BuildResult {
    BuildResult {
        success: false,
        artifact_path: None,
        version: None,
        candidate,
        pre_flight_results,
        validation_result: validation,
        error_message: Some(message),
    }
}

pub(crate) fn report_checks(results: &[CheckResult], reporter: &mut dyn Reporter) {
    for r in results.iter().filter(|r| !r.passed) {
        let line = format!("{}: {}", r.name, r.message);
        if r.is_blocking_failure() {
            reporter.error(&line);
        } else {
            reporter.warn(&line);
        }
    }
}

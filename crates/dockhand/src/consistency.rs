//! Cross-stage consistency validators.
//!
//! Each validator takes the value observed at every stage of a journey (or
//! every journey) and compares it with the first observation.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactRegistry;
use crate::render::{render_checks, render_health};
use crate::state::InstallManifest;
use crate::types::{BuildResult, CheckResult, HealthResult, InstallResult, OutputMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport<T> {
    pub consistent: bool,
    /// Value from the first stage.
    pub expected: Option<T>,
    /// Stages whose value differs from `expected`, in observation order.
    pub drift_detected: Vec<String>,
    /// Every stage's actual value.
    pub observed: Vec<(String, T)>,
}

/// Counts that must not change as an installation moves between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentCounts {
    pub core_files: usize,
    pub sub_files: usize,
    pub checks: usize,
}

impl fmt::Display for ComponentCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} core file(s), {} sub-file(s), {} check(s)",
            self.core_files, self.sub_files, self.checks
        )
    }
}

pub fn validate_consistency<T: Clone + PartialEq>(observations: &[(String, T)]) -> ConsistencyReport<T> {
    let expected = observations.first().map(|(_, v)| v.clone());
    let drift_detected: Vec<String> = match &expected {
        Some(first) => observations
            .iter()
            .filter(|(_, v)| v != first)
            .map(|(stage, _)| stage.clone())
            .collect(),
        None => Vec::new(),
    };
    ConsistencyReport {
        consistent: drift_detected.is_empty(),
        expected,
        drift_detected,
        observed: observations.to_vec(),
    }
}

pub fn validate_versions(observations: &[(String, String)]) -> ConsistencyReport<String> {
    validate_consistency(observations)
}

pub fn validate_artifact_paths(observations: &[(String, PathBuf)]) -> ConsistencyReport<PathBuf> {
    validate_consistency(observations)
}

pub fn validate_counts(observations: &[(String, ComponentCounts)]) -> ConsistencyReport<ComponentCounts> {
    validate_consistency(observations)
}

/// Byte-identical rendering across journeys.
pub fn validate_rendered_parity(renders: &[(String, String)]) -> ConsistencyReport<String> {
    validate_consistency(renders)
}

/// Render each journey's pre-flight results and require identical text.
pub fn check_table_parity(
    journeys: &[(String, Vec<CheckResult>)],
    mode: OutputMode,
) -> ConsistencyReport<String> {
    let renders: Vec<(String, String)> = journeys
        .iter()
        .map(|(journey, results)| (journey.clone(), render_checks(results, mode)))
        .collect();
    validate_rendered_parity(&renders)
}

/// Render each journey's health battery and require identical text.
pub fn health_table_parity(
    journeys: &[(String, Vec<HealthResult>)],
    mode: OutputMode,
) -> ConsistencyReport<String> {
    let renders: Vec<(String, String)> = journeys
        .iter()
        .map(|(journey, results)| (journey.clone(), render_health(results, mode)))
        .collect();
    validate_rendered_parity(&renders)
}

/// Version and artifact path recorded at each stage of a build → install
/// journey. Stages that recorded nothing are left out.
#[derive(Debug, Clone, Default)]
pub struct JourneyTrace {
    pub versions: Vec<(String, String)>,
    pub artifact_paths: Vec<(String, PathBuf)>,
}

impl JourneyTrace {
    pub fn collect(
        build: Option<&BuildResult>,
        registry: &ArtifactRegistry,
        install: Option<&InstallResult>,
        manifest: Option<&InstallManifest>,
    ) -> Self {
        let mut trace = Self::default();
        if let Some(b) = build {
            trace.push("build", b.version.clone(), b.artifact_path.clone());
        }
        trace.push(
            "registry",
            registry.version().map(str::to_string),
            registry.artifact_path(),
        );
        if let Some(i) = install {
            trace.push("install", i.version.clone(), i.artifact_path.clone());
        }
        if let Some(m) = manifest {
            trace.push("manifest", Some(m.version.clone()), Some(m.artifact_path.clone()));
        }
        trace
    }

    fn push(&mut self, stage: &str, version: Option<String>, path: Option<PathBuf>) {
        if let Some(v) = version {
            self.versions.push((stage.to_string(), v));
        }
        if let Some(p) = path {
            self.artifact_paths.push((stage.to_string(), p));
        }
    }

    /// Stages whose version or artifact path drifted from the first stage.
    pub fn drift(&self) -> Vec<String> {
        let mut drift = validate_versions(&self.versions).drift_detected;
        for stage in validate_artifact_paths(&self.artifact_paths).drift_detected {
            if !drift.contains(&stage) {
                drift.push(stage);
            }
        }
        drift
    }
}

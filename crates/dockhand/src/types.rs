use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Severity of a pre-flight check. Fixed per check, never data-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// A failure halts the calling pipeline.
    Blocking,
    /// A failure is reported but does not halt.
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Blocking => write!(f, "BLOCKING"),
            Severity::Warning => write!(f, "WARNING"),
        }
    }
}

/// Outcome of one named check.
///
/// Built through [`CheckResult::pass`] / [`CheckResult::fail`] so that a
/// passing result never carries remediation and a fixable result always
/// carries its fix command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: String,
    pub name: String,
    pub passed: bool,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    pub fixable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_command: Option<String>,
}

impl CheckResult {
    pub fn pass(
        id: impl Into<String>,
        name: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            passed: true,
            severity,
            message: message.into(),
            remediation: None,
            fixable: false,
            fix_command: None,
        }
    }

    pub fn fail(
        id: impl Into<String>,
        name: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            passed: false,
            ..Self::pass(id, name, severity, message)
        }
    }

    /// Synthetic BLOCKING failure for a check that errored instead of
    /// returning a result.
    pub fn from_error(id: impl Into<String>, name: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::fail(id, name, Severity::Blocking, format!("{err:#}"))
    }

    /// Attach remediation text. Ignored on passing results.
    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        if !self.passed {
            self.remediation = Some(remediation.into());
        }
        self
    }

    /// Mark the result as auto-repairable with the given shell command.
    pub fn with_fix(mut self, command: impl Into<String>) -> Self {
        self.fixable = true;
        self.fix_command = Some(command.into());
        self
    }

    pub fn is_blocking_failure(&self) -> bool {
        !self.passed && self.severity == Severity::Blocking
    }

    pub fn is_warning_failure(&self) -> bool {
        !self.passed && self.severity == Severity::Warning
    }
}

/// Semantic-version bump classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BumpType {
    Patch,
    Minor,
    Major,
}

impl fmt::Display for BumpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BumpType::Major => write!(f, "MAJOR"),
            BumpType::Minor => write!(f, "MINOR"),
            BumpType::Patch => write!(f, "PATCH"),
        }
    }
}

/// A proposed next release version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateVersion {
    pub current_version: String,
    pub bump_type: BumpType,
    pub next_version: String,
    pub commit_messages: Vec<String>,
    pub is_prerelease: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prerelease_suffix: Option<String>,
}

/// What the artifact validator learned about an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactValidation {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    pub errors: Vec<String>,
}

/// Terminal record of one build attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<CandidateVersion>,
    pub pre_flight_results: Vec<CheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_result: Option<ArtifactValidation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Relationship between the installed version and the install target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradePath {
    FreshInstall,
    Upgrade,
    Reinstall,
    Downgrade,
}

impl fmt::Display for UpgradePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradePath::FreshInstall => write!(f, "fresh install"),
            UpgradePath::Upgrade => write!(f, "upgrade"),
            UpgradePath::Reinstall => write!(f, "reinstall"),
            UpgradePath::Downgrade => write!(f, "downgrade"),
        }
    }
}

/// One retained backup on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Install pipeline phases, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallPhase {
    Preflight,
    Readiness,
    Backup,
    Install,
    Verification,
}

impl InstallPhase {
    pub const ORDER: [InstallPhase; 5] = [
        InstallPhase::Preflight,
        InstallPhase::Readiness,
        InstallPhase::Backup,
        InstallPhase::Install,
        InstallPhase::Verification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InstallPhase::Preflight => "PREFLIGHT",
            InstallPhase::Readiness => "READINESS",
            InstallPhase::Backup => "BACKUP",
            InstallPhase::Install => "INSTALL",
            InstallPhase::Verification => "VERIFICATION",
        }
    }
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a phase ended. Only `FailedFatal` stops the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PhaseOutcome {
    Completed,
    Skipped { reason: String },
    FailedNonFatal { message: String },
    FailedFatal { message: String },
}

impl PhaseOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PhaseOutcome::FailedFatal { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: InstallPhase,
    #[serde(flatten)]
    pub outcome: PhaseOutcome,
}

/// Terminal record of one install attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_path: Option<UpgradePath>,
    pub phases_completed: Vec<InstallPhase>,
    pub phase_outcomes: Vec<PhaseRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_status: Option<HealthStatus>,
    pub health_results: Vec<HealthResult>,
    pub verification_warnings: Vec<String>,
    pub pre_flight_results: Vec<CheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupInfo>,
}

impl InstallResult {
    /// The last phase that ran, if any.
    pub fn phase_reached(&self) -> Option<InstallPhase> {
        self.phases_completed.last().copied()
    }
}

/// Component health. Ordered so that `max` yields the worst status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// DEGRADED still counts as a usable installation.
    pub fn is_usable(self) -> bool {
        self != HealthStatus::Unhealthy
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

/// One post-install component check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResult {
    pub component: String,
    pub status: HealthStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of an automatic or manual rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_status: Option<HealthStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub cleaned_paths: Vec<PathBuf>,
}

impl RollbackResult {
    pub(crate) fn failed(message: impl Into<String>, cleaned_paths: Vec<PathBuf>) -> Self {
        Self {
            success: false,
            backup_path: None,
            backup_timestamp: None,
            health_status: None,
            error_message: Some(message.into()),
            cleaned_paths,
        }
    }
}

/// One CI acceptance gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    pub check_name: String,
    pub passed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

/// Aggregate of every gate. `passed` is the AND of all gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGateResult {
    pub passed: bool,
    pub gate_results: Vec<GateResult>,
    pub summary: String,
}

/// Outcome of an auto-repair attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// How results are presented to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Icons and confirmation prompts.
    #[default]
    Interactive,
    /// Single-line, prefix-tagged text safe for CI logs.
    Plain,
    /// One JSON document per command.
    Json,
}

impl OutputMode {
    /// `DOCKHAND_OUTPUT=json|plain` wins; otherwise a set `CI` selects plain.
    pub fn from_env() -> Self {
        match std::env::var("DOCKHAND_OUTPUT").ok().as_deref() {
            Some("json") => return OutputMode::Json,
            Some("plain") => return OutputMode::Plain,
            Some("interactive") => return OutputMode::Interactive,
            _ => {}
        }
        if std::env::var_os("CI").is_some_and(|v| !v.is_empty()) {
            OutputMode::Plain
        } else {
            OutputMode::Interactive
        }
    }

    pub fn is_unattended(self) -> bool {
        self != OutputMode::Interactive
    }
}

/// Event recorded in the install history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    /// `name@version`, or `all` for events not tied to a package.
    pub package: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    BuildFinished {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        artifact: Option<PathBuf>,
    },
    InstallStarted {
        upgrade_path: Option<UpgradePath>,
    },
    PhaseFinished {
        phase: InstallPhase,
        outcome: PhaseOutcome,
    },
    BackupCreated {
        path: PathBuf,
    },
    BackupFailed {
        message: String,
    },
    InstallFinished {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        health: Option<HealthStatus>,
    },
    RollbackPerformed {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        backup: Option<PathBuf>,
    },
    Uninstalled {
        success: bool,
    },
}

pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passing_result_never_carries_remediation() {
        let r = CheckResult::pass("a", "A", Severity::Blocking, "ok").with_remediation("do x");
        assert!(r.remediation.is_none());

        let r = CheckResult::fail("a", "A", Severity::Blocking, "bad").with_remediation("do x");
        assert_eq!(r.remediation.as_deref(), Some("do x"));
    }

    #[test]
    fn fixable_result_carries_fix_command() {
        let r = CheckResult::fail("pm", "Package manager", Severity::Blocking, "missing")
            .with_fix("python3 -m pip install --user pipx");
        assert!(r.fixable);
        assert_eq!(
            r.fix_command.as_deref(),
            Some("python3 -m pip install --user pipx")
        );
    }

    #[test]
    fn from_error_is_a_blocking_failure_with_error_text() {
        let err = anyhow::anyhow!("disk vanished");
        let r = CheckResult::from_error("x", "X", &err);
        assert!(r.is_blocking_failure());
        assert!(r.message.contains("disk vanished"));
    }

    #[test]
    fn health_status_max_is_worst() {
        let worst = [
            HealthStatus::Healthy,
            HealthStatus::Unhealthy,
            HealthStatus::Degraded,
        ]
        .into_iter()
        .max();
        assert_eq!(worst, Some(HealthStatus::Unhealthy));
        assert!(HealthStatus::Degraded.is_usable());
        assert!(!HealthStatus::Unhealthy.is_usable());
    }

    #[test]
    fn severity_and_upgrade_path_serialize_screaming() {
        assert_eq!(
            serde_json::to_string(&Severity::Blocking).expect("serialize"),
            "\"BLOCKING\""
        );
        assert_eq!(
            serde_json::to_string(&UpgradePath::FreshInstall).expect("serialize"),
            "\"FRESH_INSTALL\""
        );
    }

    #[test]
    fn phase_order_is_canonical() {
        let mut sorted = InstallPhase::ORDER;
        sorted.sort();
        assert_eq!(sorted, InstallPhase::ORDER);
        assert_eq!(InstallPhase::Verification.to_string(), "VERIFICATION");
    }

    #[test]
    fn install_event_roundtrips_json() {
        let ev = InstallEvent {
            timestamp: Utc::now(),
            event_type: EventType::PhaseFinished {
                phase: InstallPhase::Backup,
                outcome: PhaseOutcome::FailedNonFatal {
                    message: "disk full".to_string(),
                },
            },
            package: "demo@1.0.0".to_string(),
        };
        let json = serde_json::to_string(&ev).expect("serialize");
        assert!(json.contains("\"type\":\"phase_finished\""));
        assert!(json.contains("\"outcome\":\"failed_non_fatal\""));
        let parsed: InstallEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.package, "demo@1.0.0");
    }

    #[test]
    #[serial_test::serial]
    fn output_mode_reads_environment() {
        temp_env::with_vars(
            [("DOCKHAND_OUTPUT", Some("json")), ("CI", None::<&str>)],
            || assert_eq!(OutputMode::from_env(), OutputMode::Json),
        );
        temp_env::with_vars(
            [("DOCKHAND_OUTPUT", None::<&str>), ("CI", Some("true"))],
            || assert_eq!(OutputMode::from_env(), OutputMode::Plain),
        );
        temp_env::with_vars(
            [("DOCKHAND_OUTPUT", None::<&str>), ("CI", None::<&str>)],
            || assert_eq!(OutputMode::from_env(), OutputMode::Interactive),
        );
    }
}

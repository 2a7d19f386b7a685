//! Text rendering of check and health tables.
//!
//! Output depends only on the results and the output mode (never on
//! timestamps or the journey that produced it), so identical state renders
//! byte-identical text.

use std::fmt::Write as _;

use crate::health::overall_status;
use crate::types::{CheckResult, HealthResult, HealthStatus, OutputMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Pass,
    Warn,
    Fail,
}

impl Mark {
    pub fn icon(self, mode: OutputMode) -> &'static str {
        match (mode, self) {
            (OutputMode::Interactive, Mark::Pass) => "✓",
            (OutputMode::Interactive, Mark::Warn) => "⚠",
            (OutputMode::Interactive, Mark::Fail) => "✗",
            (_, Mark::Pass) => "[PASS]",
            (_, Mark::Warn) => "[WARN]",
            (_, Mark::Fail) => "[FAIL]",
        }
    }
}

pub fn check_mark(result: &CheckResult) -> Mark {
    if result.passed {
        Mark::Pass
    } else if result.is_blocking_failure() {
        Mark::Fail
    } else {
        Mark::Warn
    }
}

pub fn health_mark(status: HealthStatus) -> Mark {
    match status {
        HealthStatus::Healthy => Mark::Pass,
        HealthStatus::Degraded => Mark::Warn,
        HealthStatus::Unhealthy => Mark::Fail,
    }
}

/// One line per check, `{icon} {name}: {message}`, in the given order.
pub fn render_checks(results: &[CheckResult], mode: OutputMode) -> String {
    let mut out = String::new();
    for r in results {
        let _ = writeln!(out, "{} {}: {}", check_mark(r).icon(mode), r.name, r.message);
    }
    out
}

/// One line per component followed by the overall status.
pub fn render_health(results: &[HealthResult], mode: OutputMode) -> String {
    let mut out = String::new();
    for r in results {
        let _ = writeln!(
            out,
            "{} {}: {}",
            health_mark(r.status).icon(mode),
            r.component,
            r.message
        );
    }
    let overall = overall_status(results);
    let _ = writeln!(out, "{} overall: {overall}", health_mark(overall).icon(mode));
    out
}

/// Detailed report of BLOCKING failures with remediation and a closing
/// banner. Fixable failures are called out as repairable.
pub fn render_blocking_report(results: &[CheckResult], mode: OutputMode) -> String {
    let blocking: Vec<&CheckResult> = results.iter().filter(|r| r.is_blocking_failure()).collect();
    if blocking.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    for r in &blocking {
        if mode == OutputMode::Interactive {
            let _ = writeln!(out, "{} {}", Mark::Fail.icon(mode), r.name);
            let _ = writeln!(out, "  {}", r.message);
            if let Some(fix) = &r.remediation {
                let _ = writeln!(out, "  remediation: {fix}");
            }
            if let (true, Some(cmd)) = (r.fixable, &r.fix_command) {
                let _ = writeln!(out, "  you can fix this now: {cmd}");
            }
        } else {
            let _ = write!(out, "[BLOCKED] {}: {}", r.name, r.message);
            if let Some(fix) = &r.remediation {
                let _ = write!(out, " | remediation: {fix}");
            }
            if let (true, Some(cmd)) = (r.fixable, &r.fix_command) {
                let _ = write!(out, " | fix: {cmd}");
            }
            out.push('\n');
        }
    }
    let _ = writeln!(
        out,
        "blocked: {} blocking check(s) failed",
        blocking.len()
    );
    out
}

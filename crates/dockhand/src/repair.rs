//! Auto-repair of fixable pre-flight failures.

use std::path::Path;
use std::time::Duration;

use crate::process::run_shell;
use crate::types::{CheckResult, RepairResult};

pub const CONFIRM_PROMPT: &str = "Install it now? [Y/n]";

/// Operator interaction used while repairing.
pub trait RepairIo {
    /// Ask a yes/no question; `true` means go ahead.
    fn confirm(&mut self, prompt: &str) -> bool;
    fn start_status(&mut self, message: &str);
    fn finish_status(&mut self, success: bool);
}

/// Answers every prompt the same way and ignores status updates.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedIo {
    pub answer: bool,
}

impl RepairIo for ScriptedIo {
    fn confirm(&mut self, _prompt: &str) -> bool {
        self.answer
    }

    fn start_status(&mut self, _message: &str) {}

    fn finish_status(&mut self, _success: bool) {}
}

pub fn can_repair(result: &CheckResult) -> bool {
    !result.passed && result.fixable && result.fix_command.is_some()
}

/// Run the fix command of a failed check.
///
/// Unattended mode runs immediately; otherwise the operator is asked first.
/// Every outcome, including a command that cannot be spawned, is returned as
/// a [`RepairResult`].
pub fn repair(
    result: &CheckResult,
    unattended: bool,
    io: &mut dyn RepairIo,
    working_dir: &Path,
    timeout: Option<Duration>,
) -> RepairResult {
    let command = match (&result.fix_command, can_repair(result)) {
        (Some(cmd), true) => cmd,
        _ => {
            return RepairResult {
                success: false,
                message: format!("{} cannot be repaired automatically", result.name),
                output: None,
            };
        }
    };

    if !unattended {
        let prompt = format!(
            "{}: {}\n  fix: {command}\n{CONFIRM_PROMPT}",
            result.name, result.message
        );
        if !io.confirm(&prompt) {
            return RepairResult {
                success: false,
                message: format!("repair of {} declined", result.name),
                output: None,
            };
        }
    }

    io.start_status(&format!("running {command}"));
    match run_shell(command, working_dir, timeout) {
        Err(e) => {
            io.finish_status(false);
            RepairResult {
                success: false,
                message: format!("failed to run `{command}`: {e:#}"),
                output: None,
            }
        }
        Ok(out) if out.success() => {
            io.finish_status(true);
            RepairResult {
                success: true,
                message: format!("{} repaired", result.name),
                output: Some(out.combined()),
            }
        }
        Ok(out) => {
            io.finish_status(false);
            let message = if out.timed_out {
                format!("`{command}` timed out")
            } else {
                format!("`{command}` exited with code {}", out.exit_code)
            };
            RepairResult {
                success: false,
                message,
                output: Some(out.combined()),
            }
        }
    }
}

/// Repair every repairable result in order.
pub fn repair_all(
    results: &[CheckResult],
    unattended: bool,
    io: &mut dyn RepairIo,
    working_dir: &Path,
    timeout: Option<Duration>,
) -> Vec<(String, RepairResult)> {
    results
        .iter()
        .filter(|r| can_repair(r))
        .map(|r| (r.id.clone(), repair(r, unattended, io, working_dir, timeout)))
        .collect()
}

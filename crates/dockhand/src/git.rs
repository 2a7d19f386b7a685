use std::env;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};

/// Version of the most recent release tag, with a leading `v` stripped.
/// `None` when the repository has no tags.
pub fn latest_tag_version(repo_root: &Path) -> Result<Option<String>> {
    let out = Command::new(git_program())
        .args(["describe", "--tags", "--abbrev=0"])
        .current_dir(repo_root)
        .output()
        .context("failed to execute git describe; is git installed?")?;

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        if stderr.contains("No names found") || stderr.contains("cannot describe") {
            return Ok(None);
        }
        bail!("git describe failed: {}", stderr.trim());
    }

    let tag = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if tag.is_empty() {
        return Ok(None);
    }
    Ok(Some(tag.trim_start_matches(['v', 'V']).to_string()))
}

/// Full commit messages since `tag` (or the whole history when `None`),
/// oldest first.
pub fn commit_messages_since(repo_root: &Path, tag: Option<&str>) -> Result<Vec<String>> {
    let range = tag.map(|t| format!("{t}..HEAD"));
    let mut cmd = Command::new(git_program());
    cmd.args(["log", "--reverse", "--format=%B%x00"]);
    if let Some(range) = &range {
        cmd.arg(range);
    }
    let out = cmd
        .current_dir(repo_root)
        .output()
        .context("failed to execute git log; is git installed?")?;

    if !out.status.success() {
        bail!(
            "git log failed: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&out.stdout)
        .split('\0')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect())
}

/// Resolve the tag name for a version, trying `v<version>` then `<version>`.
pub fn tag_for_version(repo_root: &Path, version: &str) -> Option<String> {
    [format!("v{version}"), version.to_string()]
        .into_iter()
        .find(|candidate| {
            Command::new(git_program())
                .args(["rev-parse", "--verify", "--quiet"])
                .arg(format!("refs/tags/{candidate}"))
                .current_dir(repo_root)
                .output()
                .is_ok_and(|o| o.status.success())
        })
}

pub fn is_git_clean(repo_root: &Path) -> Result<bool> {
    let out = Command::new(git_program())
        .arg("status")
        .arg("--porcelain")
        .current_dir(repo_root)
        .output()
        .context("failed to execute git status; is git installed?")?;

    if !out.status.success() {
        bail!(
            "git status failed: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&out.stdout).trim().is_empty())
}

pub(crate) fn git_program() -> String {
    env::var("DOCKHAND_GIT_BIN").unwrap_or_else(|_| "git".to_string())
}

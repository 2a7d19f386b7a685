use serde::{Deserialize, Serialize};

use crate::process::run_command;

/// Where an install happened, recorded in the install manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentFingerprint {
    pub dockhand_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_manager_version: Option<String>,
    pub os: String,
    pub arch: String,
    pub hostname: String,
}

pub fn collect_environment_fingerprint(package_manager: &str) -> EnvironmentFingerprint {
    EnvironmentFingerprint {
        dockhand_version: env!("CARGO_PKG_VERSION").to_string(),
        package_manager_version: tool_version(package_manager),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        hostname: gethostname::gethostname().to_string_lossy().to_string(),
    }
}

/// First version-looking token of `<program> --version`.
pub fn tool_version(program: &str) -> Option<String> {
    let cwd = std::env::current_dir().ok()?;
    let out = run_command(program, &["--version"], &cwd, None).ok()?;
    if !out.success() {
        return None;
    }
    parse_version_output(&out.stdout)
}

fn parse_version_output(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .map(|tok| tok.trim_start_matches(['v', 'V']))
        .find(|tok| tok.starts_with(|c: char| c.is_ascii_digit()) && tok.contains('.'))
        .map(str::to_string)
}

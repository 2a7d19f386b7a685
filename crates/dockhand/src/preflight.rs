//! Standard pre-flight registries for the build, install and doctor journeys.

use std::fs;
use std::path::Path;

use anyhow::Result;

use crate::check::{CheckRegistry, check_bool};
use crate::config::RuntimeOptions;
use crate::git;
use crate::lock;
use crate::ports::{PackageManagerPort, RegistryCheckPort};
use crate::process::program_available;
use crate::state::probe_writable;
use crate::types::{CheckResult, Severity};

pub const BUILD_TOOL_AVAILABLE: &str = "build-tool-available";
pub const OUTPUT_DIR_WRITABLE: &str = "output-dir-writable";
pub const GIT_CLEAN: &str = "git-clean";
pub const PACKAGE_MANAGER_AVAILABLE: &str = "package-manager-available";
pub const CONFIG_DIR_WRITABLE: &str = "config-dir-writable";
pub const NO_CONCURRENT_OPERATION: &str = "no-concurrent-operation";
pub const INDEX_CONNECTIVITY: &str = "index-connectivity";
pub const INDEX_TLS: &str = "index-tls";

pub fn build_registry(opts: &RuntimeOptions) -> Result<CheckRegistry<'_>> {
    let mut registry = CheckRegistry::new();
    register_build_checks(&mut registry, opts)?;
    Ok(registry)
}

pub fn install_registry<'a>(
    opts: &'a RuntimeOptions,
    package_manager: &'a dyn PackageManagerPort,
) -> Result<CheckRegistry<'a>> {
    let mut registry = CheckRegistry::new();
    register_install_checks(&mut registry, opts, package_manager)?;
    Ok(registry)
}

/// Every build and install check plus index reachability.
pub fn doctor_registry<'a>(
    opts: &'a RuntimeOptions,
    package_manager: &'a dyn PackageManagerPort,
    index: &'a dyn RegistryCheckPort,
) -> Result<CheckRegistry<'a>> {
    let mut registry = CheckRegistry::new();
    register_build_checks(&mut registry, opts)?;
    register_install_checks(&mut registry, opts, package_manager)?;
    registry.register_fn(INDEX_CONNECTIVITY, "Index connectivity", move || {
        Ok(as_warning(index.check_connectivity()))
    })?;
    registry.register_fn(INDEX_TLS, "Index TLS certificate", move || {
        Ok(as_warning(index.check_tls()))
    })?;
    Ok(registry)
}

fn register_build_checks<'a>(registry: &mut CheckRegistry<'a>, opts: &'a RuntimeOptions) -> Result<()> {
    registry.register_fn(BUILD_TOOL_AVAILABLE, "Build tool", move || {
        let program = &opts.build.program;
        Ok(tool_check(
            BUILD_TOOL_AVAILABLE,
            "Build tool",
            program,
            program_available(program),
            "set build.program in dockhand.toml or install the build tool",
            opts.build.fix_command.as_deref(),
        ))
    })?;

    registry.register_fn(OUTPUT_DIR_WRITABLE, "Output directory", move || {
        Ok(writable_check(OUTPUT_DIR_WRITABLE, "Output directory", &opts.output_dir))
    })?;

    registry.register_fn(GIT_CLEAN, "Git working tree", move || {
        Ok(match git::is_git_clean(&opts.project_root) {
            Ok(clean) => check_bool(
                GIT_CLEAN,
                "Git working tree",
                Severity::Warning,
                clean,
                "working tree clean",
                "working tree has uncommitted changes",
            )
            .with_remediation("commit or stash changes so the build matches a tagged state"),
            Err(e) => CheckResult::fail(
                GIT_CLEAN,
                "Git working tree",
                Severity::Warning,
                format!("could not inspect working tree: {e:#}"),
            ),
        })
    })?;

    Ok(())
}

fn register_install_checks<'a>(
    registry: &mut CheckRegistry<'a>,
    opts: &'a RuntimeOptions,
    package_manager: &'a dyn PackageManagerPort,
) -> Result<()> {
    registry.register_fn(PACKAGE_MANAGER_AVAILABLE, "Package manager", move || {
        Ok(tool_check(
            PACKAGE_MANAGER_AVAILABLE,
            "Package manager",
            package_manager.name(),
            package_manager.is_available(),
            "install the package manager or set package_manager.program in dockhand.toml",
            opts.package_manager.fix_command.as_deref(),
        ))
    })?;

    registry.register_fn(CONFIG_DIR_WRITABLE, "Config directory", move || {
        Ok(writable_check(CONFIG_DIR_WRITABLE, "Config directory", &opts.config_dir))
    })?;

    registry.register_fn(NO_CONCURRENT_OPERATION, "No concurrent operation", move || {
        Ok(match lock::active_lock(&opts.config_dir, opts.lock_timeout) {
            None => CheckResult::pass(
                NO_CONCURRENT_OPERATION,
                "No concurrent operation",
                Severity::Blocking,
                "no other operation in progress",
            ),
            Some(info) => CheckResult::fail(
                NO_CONCURRENT_OPERATION,
                "No concurrent operation",
                Severity::Blocking,
                format!(
                    "{} in progress (pid {} on {} since {})",
                    info.operation, info.pid, info.hostname, info.acquired_at
                ),
            )
            .with_remediation(format!(
                "wait for it to finish or remove {} if the process is gone",
                lock::lock_path(&opts.config_dir).display()
            )),
        })
    })?;

    Ok(())
}

fn tool_check(
    id: &str,
    name: &str,
    program: &str,
    available: bool,
    remediation: &str,
    fix_command: Option<&str>,
) -> CheckResult {
    if available {
        return CheckResult::pass(id, name, Severity::Blocking, format!("{program} found"));
    }
    let failed = CheckResult::fail(id, name, Severity::Blocking, format!("{program} not found"))
        .with_remediation(remediation);
    match fix_command {
        Some(cmd) => failed.with_fix(cmd),
        None => failed,
    }
}

fn writable_check(id: &str, name: &str, dir: &Path) -> CheckResult {
    let outcome = fs::create_dir_all(dir).and_then(|()| probe_writable(dir));
    match outcome {
        Ok(()) => CheckResult::pass(
            id,
            name,
            Severity::Blocking,
            format!("{} is writable", dir.display()),
        ),
        Err(e) => CheckResult::fail(
            id,
            name,
            Severity::Blocking,
            format!("{} is not writable: {e}", dir.display()),
        )
        .with_remediation(format!("check permissions on {}", dir.display())),
    }
}

fn as_warning(mut result: CheckResult) -> CheckResult {
    result.severity = Severity::Warning;
    result
}

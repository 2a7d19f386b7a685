//! Pre-flight check framework.
//!
//! A [`Check`] is a read-only probe identified by a stable id. A
//! [`CheckRegistry`] keeps checks in registration order and runs all of them
//! without short-circuiting, so an operator sees every problem in one pass.
//!
//! Errors returned by a check are not swallowed by the registry. Callers use
//! [`run_guarded`] when they want an error mapped to a synthetic BLOCKING
//! failure instead.

use anyhow::{Result, bail};

use crate::types::{CheckResult, Severity};

pub trait Check {
    /// Stable identifier, unique within a registry.
    fn id(&self) -> &str;

    /// Human-readable name used in reports.
    fn name(&self) -> &str;

    fn run(&self) -> Result<CheckResult>;
}

/// Adapter turning a closure into a [`Check`].
pub struct FnCheck<F> {
    id: String,
    name: String,
    f: F,
}

impl<F> FnCheck<F>
where
    F: Fn() -> Result<CheckResult>,
{
    pub fn new(id: impl Into<String>, name: impl Into<String>, f: F) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            f,
        }
    }
}

impl<F> Check for FnCheck<F>
where
    F: Fn() -> Result<CheckResult>,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> Result<CheckResult> {
        (self.f)()
    }
}

/// Ordered collection of checks for one journey.
#[derive(Default)]
pub struct CheckRegistry<'a> {
    checks: Vec<Box<dyn Check + 'a>>,
}

impl<'a> CheckRegistry<'a> {
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    /// Register a check. Duplicate ids are rejected.
    pub fn register(&mut self, check: impl Check + 'a) -> Result<()> {
        if self.contains(check.id()) {
            bail!("check id '{}' is already registered", check.id());
        }
        self.checks.push(Box::new(check));
        Ok(())
    }

    pub fn register_fn<F>(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        f: F,
    ) -> Result<()>
    where
        F: Fn() -> Result<CheckResult> + 'a,
    {
        self.register(FnCheck::new(id, name, f))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.checks.iter().any(|c| c.id() == id)
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every check in registration order. The first check error is
    /// propagated unchanged.
    pub fn run_all(&self) -> Result<Vec<CheckResult>> {
        self.checks.iter().map(|c| c.run()).collect()
    }

    /// Like [`CheckRegistry::run_all`], but a check that errors becomes a
    /// failed BLOCKING result carrying the error text and the remaining
    /// checks still run.
    pub fn run_all_guarded(&self) -> Vec<CheckResult> {
        self.checks.iter().map(|c| run_guarded(c.as_ref())).collect()
    }
}

/// Run one check, mapping an error to a synthetic BLOCKING failure.
pub fn run_guarded(check: &dyn Check) -> CheckResult {
    match check.run() {
        Ok(result) => result,
        Err(err) => CheckResult::from_error(check.id(), check.name(), &err),
    }
}

pub fn blocking_failures(results: &[CheckResult]) -> Vec<&CheckResult> {
    results.iter().filter(|r| r.is_blocking_failure()).collect()
}

pub fn has_blocking_failure(results: &[CheckResult]) -> bool {
    results.iter().any(CheckResult::is_blocking_failure)
}

/// One-line summary of blocking failures, e.g. `"tool: not found; dir: read-only"`.
pub fn summarize_blocking(results: &[CheckResult]) -> String {
    blocking_failures(results)
        .iter()
        .map(|r| format!("{}: {}", r.name, r.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience for checks whose outcome is a plain boolean.
pub fn check_bool(
    id: &str,
    name: &str,
    severity: Severity,
    ok: bool,
    pass_msg: impl Into<String>,
    fail_msg: impl Into<String>,
) -> CheckResult {
    if ok {
        CheckResult::pass(id, name, severity, pass_msg)
    } else {
        CheckResult::fail(id, name, severity, fail_msg)
    }
}

//! # Dockhand
//!
//! Build a versioned package artifact, gate it, install it through an
//! external package manager, and back out safely when an install goes wrong.
//!
//! ## Pipeline
//!
//! The core flow is **build → install → (verify | roll back)**:
//!
//! 1. [`build::run_build`] runs the build pre-flight checks, derives the next
//!    semantic version from the commit history, invokes the build tool,
//!    validates the artifact and records it in the [`artifact::ArtifactRegistry`].
//! 2. [`install::run_install`] runs PREFLIGHT → READINESS → BACKUP → INSTALL →
//!    VERIFICATION against the registry (or an explicit artifact).
//! 3. [`rollback::auto_rollback`] restores the newest backup after a failed
//!    install; [`rollback::manual_rollback`] restores a chosen one.
//!
//! [`gate::QualityGate`] runs the five CI acceptance gates independently, and
//! [`consistency`] compares what each stage recorded.
//!
//! ## Ports
//!
//! External tools sit behind the traits in [`ports`]: the build tool, the
//! package manager, the artifact validator, the package index, the publisher
//! and backup storage. Concrete adapters live in [`build_tool`],
//! [`package_manager`], [`index`], [`backup`] and [`gate::CommandPublisher`].
//!
//! ## Modules
//!
//! - [`check`]: Check trait and ordered registry
//! - [`preflight`]: Standard build, install and doctor check registries
//! - [`version`]: Commit classification and next-version policy
//! - [`artifact`]: Write-once artifact registry, file-name parsing, validator
//! - [`health`]: Post-install health battery
//! - [`repair`]: Auto-repair of fixable check failures
//! - [`render`]: Check and health tables
//! - [`config`]: `dockhand.toml` loading and CLI merging
//! - [`state`]: Install manifest and partial-install markers
//! - [`events`]: Append-only JSONL install history
//! - [`lock`]: Advisory lock around install, uninstall and rollback

/// Artifact registry, file-name parsing and the filesystem validator.
pub mod artifact;

/// Timestamped config-directory backups.
pub mod backup;

/// Build pipeline.
pub mod build;

/// Build tool adapter.
pub mod build_tool;

/// Check trait and ordered registry.
pub mod check;

/// Configuration file (`dockhand.toml`) loading and merging.
pub mod config;

/// Cross-stage and cross-journey consistency validators.
pub mod consistency;

/// Environment fingerprinting (OS, arch, tool versions).
pub mod environment;

/// Append-only JSONL event log.
pub mod events;

/// CI quality gate.
pub mod gate;

/// Git operations (tags, commit history, cleanliness).
pub mod git;

/// Post-install health battery.
pub mod health;

/// Package index client.
pub mod index;

/// Install and uninstall pipelines.
pub mod install;

/// Advisory lock file.
pub mod lock;

/// `pipx` adapter.
pub mod package_manager;

/// Port traits for external tools.
pub mod ports;

/// Standard pre-flight registries.
pub mod preflight;

/// Subprocess execution with timeouts.
pub mod process;

/// Auto-repair of fixable checks.
pub mod repair;

/// Check and health table rendering.
pub mod render;

/// Operator-facing progress sink.
pub mod report;

/// Automatic and manual rollback.
pub mod rollback;

/// Install manifest and partial-install markers.
pub mod state;

/// Domain types shared by every pipeline.
pub mod types;

/// Semantic-version policy and upgrade-path detection.
pub mod version;


#[cfg(test)]
mod test_support;

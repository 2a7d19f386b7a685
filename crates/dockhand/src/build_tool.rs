use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::config::BuildConfig;
use crate::ports::{BuildError, BuildPort};
use crate::process::run_command_with_env;

const OUTPUT_TAIL_LINES: usize = 50;

/// [`BuildPort`] that shells out to a configured build command.
///
/// `{output_dir}` and `{version}` in the arguments are substituted, and the
/// computed version is exported as `DOCKHAND_VERSION`.
#[derive(Debug, Clone)]
pub struct CommandBuildTool {
    pub program: String,
    pub args: Vec<String>,
    pub project_root: PathBuf,
    pub extensions: Vec<String>,
    pub timeout: Option<Duration>,
}

impl CommandBuildTool {
    pub fn from_config(config: &BuildConfig, project_root: &Path) -> Self {
        Self {
            program: build_program(&config.program),
            args: config.args.clone(),
            project_root: project_root.to_path_buf(),
            extensions: config.artifact_extensions.clone(),
            timeout: Some(config.timeout),
        }
    }

    fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        self.extensions
            .iter()
            .any(|ext| name.len() > ext.len() + 1 && name.ends_with(&format!(".{ext}")))
    }

    fn artifacts_in(&self, dir: &Path) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && self.accepts(p))
            .collect()
    }
}

impl BuildPort for CommandBuildTool {
    fn build_artifact(&self, output_dir: &Path, version: &str) -> Result<PathBuf, BuildError> {
        fs::create_dir_all(output_dir).map_err(|e| {
            BuildError::new(format!(
                "failed to create output dir {}: {e}",
                output_dir.display()
            ))
        })?;

        let output_dir_str = output_dir.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{output_dir}", &output_dir_str).replace("{version}", version))
            .collect();
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let out = run_command_with_env(
            &self.program,
            &arg_refs,
            &self.project_root,
            &[("DOCKHAND_VERSION", version)],
            self.timeout,
        )
        .map_err(|e| BuildError::new(format!("{e:#}")))?;

        if !out.success() {
            let message = if out.timed_out {
                format!("{} timed out", self.program)
            } else {
                format!("{} failed", self.program)
            };
            return Err(BuildError {
                message,
                return_code: (!out.timed_out).then_some(out.exit_code),
                captured_output: Some(out.tail(OUTPUT_TAIL_LINES)),
            });
        }

        self.locate_artifact(output_dir).ok_or_else(|| BuildError {
            message: format!(
                "build finished but produced no .{} artifact in {}",
                self.extensions.join(" / ."),
                output_dir.display()
            ),
            return_code: Some(out.exit_code),
            captured_output: Some(out.tail(OUTPUT_TAIL_LINES)),
        })
    }

    /// Remove previous artifacts; other files in the directory are left alone.
    fn clean_artifacts(&self, output_dir: &Path) -> Result<(), BuildError> {
        for path in self.artifacts_in(output_dir) {
            fs::remove_file(&path).map_err(|e| {
                BuildError::new(format!("failed to remove {}: {e}", path.display()))
            })?;
        }
        Ok(())
    }

    /// Newest accepted artifact by modification time, ties broken by name.
    fn locate_artifact(&self, dir: &Path) -> Option<PathBuf> {
        self.artifacts_in(dir).into_iter().max_by_key(|p| {
            let modified = fs::metadata(p)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, p.clone())
        })
    }
}

fn build_program(configured: &str) -> String {
    env::var("DOCKHAND_BUILD_BIN").unwrap_or_else(|_| configured.to_string())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use tempfile::tempdir;

    use super::*;

    fn tool(root: &Path, script: &str) -> CommandBuildTool {
        CommandBuildTool {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            project_root: root.to_path_buf(),
            extensions: vec!["whl".to_string(), "tar.gz".to_string()],
            timeout: Some(Duration::from_secs(30)),
        }
    }

    #[cfg(unix)]
    #[test]
    fn builds_with_substituted_output_dir_and_version_env() {
        let td = tempdir().expect("tempdir");
        let dist = td.path().join("dist");
        let t = tool(
            td.path(),
            "echo building; touch {output_dir}/demo-$DOCKHAND_VERSION-py3-none-any.whl",
        );

        let artifact = t.build_artifact(&dist, "2.1.0").expect("build");
        assert_eq!(artifact, dist.join("demo-2.1.0-py3-none-any.whl"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_build_carries_exit_code_and_output() {
        let td = tempdir().expect("tempdir");
        let t = tool(td.path(), "echo 'ERROR Missing pyproject.toml' >&2; exit 2");

        let err = t.build_artifact(&td.path().join("dist"), "1.0.0").unwrap_err();
        assert_eq!(err.return_code, Some(2));
        assert_eq!(err.captured_output.as_deref(), Some("ERROR Missing pyproject.toml"));
        assert_eq!(err.describe(), "sh failed (exit code 2)");
    }

    #[cfg(unix)]
    #[test]
    fn successful_build_without_artifact_is_an_error() {
        let td = tempdir().expect("tempdir");
        let t = tool(td.path(), "true");
        let err = t.build_artifact(&td.path().join("dist"), "1.0.0").unwrap_err();
        assert!(err.message.contains("produced no"));
    }

    #[test]
    fn clean_removes_only_artifacts() {
        let td = tempdir().expect("tempdir");
        fs::write(td.path().join("demo-1.0.0.tar.gz"), b"x").expect("write");
        fs::write(td.path().join("demo-1.0.0-py3-none-any.whl"), b"x").expect("write");
        fs::write(td.path().join("notes.txt"), b"x").expect("write");

        let t = tool(td.path(), "true");
        t.clean_artifacts(td.path()).expect("clean");
        assert!(t.locate_artifact(td.path()).is_none());
        assert!(td.path().join("notes.txt").exists());
        t.clean_artifacts(&td.path().join("missing")).expect("clean missing dir");
    }

    #[test]
    fn locate_ignores_bare_extension_and_other_files() {
        let td = tempdir().expect("tempdir");
        fs::write(td.path().join(".whl"), b"x").expect("write");
        fs::write(td.path().join("demo.zip"), b"x").expect("write");
        let t = tool(td.path(), "true");
        assert!(t.locate_artifact(td.path()).is_none());

        fs::write(td.path().join("demo-1.0.0.tar.gz"), b"x").expect("write");
        assert_eq!(
            t.locate_artifact(td.path()),
            Some(td.path().join("demo-1.0.0.tar.gz"))
        );
    }

    #[test]
    #[serial]
    fn program_override_from_env() {
        let cfg = BuildConfig::default();
        let t = temp_env::with_var("DOCKHAND_BUILD_BIN", Some("/opt/fake-build"), || {
            CommandBuildTool::from_config(&cfg, Path::new("."))
        });
        assert_eq!(t.program, "/opt/fake-build");
        let t = temp_env::with_var("DOCKHAND_BUILD_BIN", None::<&str>, || {
            CommandBuildTool::from_config(&cfg, Path::new("."))
        });
        assert_eq!(t.program, cfg.program);
    }
}

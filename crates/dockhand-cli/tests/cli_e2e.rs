#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use insta::assert_snapshot;
use predicates::str::contains;
use tempfile::{TempDir, tempdir};

const FAKE_GIT: &str = r#"#!/usr/bin/env sh
case "$1" in
  describe) echo 'fatal: No names found, cannot describe anything.' >&2; exit 128 ;;
  log) printf 'feat: first release\000'; exit 0 ;;
  rev-parse) exit 1 ;;
  status) exit 0 ;;
esac
exit 0
"#;

const FAKE_BUILD: &str = r#"#!/usr/bin/env sh
mkdir -p "$1"
echo wheel > "$1/demo-$2-py3-none-any.whl"
"#;

const FAKE_PIPX: &str = r#"#!/usr/bin/env sh
here="$(dirname "$0")"
case "$1" in
  install)
    if [ -n "$FAKE_PIPX_FAIL" ]; then echo 'pip failed to build package' >&2; exit 1; fi
    for a in "$@"; do
      case "$a" in *.whl) basename "$a" | cut -d- -f2 > "$here/installed" ;; esac
    done
    mkdir -p "$here/venvs/demo"
    echo 'installed package demo' ;;
  uninstall) rm -f "$here/installed"; echo "uninstalled $2" ;;
  list)
    if [ -f "$here/installed" ]; then
      printf '{"venvs": {"demo": {"metadata": {"main_package": {"package": "demo", "package_version": "%s"}}}}}' "$(cat "$here/installed")"
    else
      printf '{"venvs": {}}'
    fi ;;
  environment) echo "$here/venvs" ;;
  *) exit 2 ;;
esac
"#;

const CONFIG: &str = r#"
[package]
name = "demo"

[build]
program = "@BUILD@"
args = ["{output_dir}", "{version}"]

[package_manager]
program = "@PIPX@"

[index]
api_base = "http://127.0.0.1:9"
timeout = "1s"

[backup]
include = ["config.toml", "install-manifest.json"]
keep = 3
"#;

struct Project {
    _td: TempDir,
    root: PathBuf,
    home: PathBuf,
    bin: PathBuf,
}

fn write_script(path: &Path, content: &str) {
    fs::write(path, content).expect("write script");
    let mut perms = fs::metadata(path).expect("meta").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

fn project() -> Project {
    project_with_pipx(None)
}

/// A project directory with fake git, build and pipx programs and a config
/// directory holding `config.toml`. `pipx` overrides the package manager path.
fn project_with_pipx(pipx: Option<&str>) -> Project {
    let td = tempdir().expect("tempdir");
    let root = td.path().join("project");
    let home = td.path().join("home");
    let bin = td.path().join("bin");
    for dir in [&root, &home, &bin] {
        fs::create_dir_all(dir).expect("mkdir");
    }

    write_script(&bin.join("git"), FAKE_GIT);
    write_script(&bin.join("build"), FAKE_BUILD);
    write_script(&bin.join("pipx"), FAKE_PIPX);
    fs::write(home.join("config.toml"), "theme = \"dark\"\n").expect("write config");

    let pipx_path = pipx
        .map(str::to_string)
        .unwrap_or_else(|| bin.join("pipx").display().to_string());
    let config = CONFIG
        .replace("@BUILD@", &bin.join("build").display().to_string())
        .replace("@PIPX@", &pipx_path);
    fs::write(root.join("dockhand.toml"), config).expect("write dockhand.toml");

    Project {
        _td: td,
        root,
        home,
        bin,
    }
}

fn write_artifact(p: &Project, version: &str) -> PathBuf {
    let path = p.root.join(format!("demo-{version}-py3-none-any.whl"));
    fs::write(&path, b"wheel").expect("write artifact");
    path
}

fn dockhand(p: &Project) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("dockhand"));
    cmd.current_dir(&p.root)
        .env("DOCKHAND_HOME", &p.home)
        .env("DOCKHAND_GIT_BIN", p.bin.join("git"))
        .env("DOCKHAND_OUTPUT", "plain")
        .env_remove("DOCKHAND_BUILD_BIN")
        .env_remove("DOCKHAND_PM_BIN")
        .env_remove("FAKE_PIPX_FAIL");
    cmd
}

fn stdout_of(cmd: &mut Command, success: bool) -> String {
    let assert = cmd.assert();
    let assert = if success { assert.success() } else { assert.failure() };
    String::from_utf8(assert.get_output().stdout.clone()).expect("utf8")
}

fn backup_dirs(p: &Project) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(p.home.join("backups"))
        .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
        .unwrap_or_default();
    dirs.sort();
    dirs
}

#[test]
fn build_then_install_then_reinstall() {
    let p = project();

    let out = stdout_of(dockhand(&p).arg("build"), true);
    assert!(out.contains("version: 0.0.0 -> 0.1.0 (MINOR)"), "{out}");
    let artifact = p.root.join("dist/demo-0.1.0-py3-none-any.whl");
    assert!(artifact.exists());
    assert!(out.contains(&format!("artifact: {}", artifact.display())));

    let out = stdout_of(dockhand(&p).arg("install"), true);
    assert!(out.contains("upgrade: fresh install"), "{out}");
    assert!(out.contains("phases: PREFLIGHT -> READINESS -> BACKUP -> INSTALL -> VERIFICATION"));
    assert!(out.contains("overall: HEALTHY"));
    assert!(p.home.join("install-manifest.json").exists());
    assert!(backup_dirs(&p).is_empty());

    let out = stdout_of(dockhand(&p).arg("install"), true);
    assert!(out.contains("upgrade: reinstall"), "{out}");
    assert_eq!(backup_dirs(&p).len(), 1);

    let out = stdout_of(dockhand(&p).args(["rollback", "--list"]), true);
    assert!(out.contains(&backup_dirs(&p)[0].display().to_string()));

    let history = fs::read_to_string(p.home.join("events.jsonl")).expect("history");
    assert!(history.contains("build_finished"));
    assert!(history.contains("install_finished"));
    assert!(history.contains("backup_created"));
}

#[test]
fn update_builds_and_installs_in_one_run() {
    let p = project();
    let out = stdout_of(dockhand(&p).arg("update"), true);
    assert!(out.contains("version: 0.0.0 -> 0.1.0"), "{out}");
    assert!(out.contains("upgrade: fresh install"));
    assert!(fs::read_to_string(p.bin.join("installed")).expect("installed").contains("0.1.0"));
}

#[test]
fn failed_upgrade_rolls_back_to_the_backup() {
    let p = project();
    let v1 = write_artifact(&p, "1.0.0");
    stdout_of(dockhand(&p).arg("install").arg(&v1), true);

    let v2 = write_artifact(&p, "1.1.0");
    let out = stdout_of(
        dockhand(&p).arg("install").arg(&v2).env("FAKE_PIPX_FAIL", "1"),
        false,
    );
    assert!(out.contains("upgrade: upgrade"), "{out}");
    assert!(out.contains("install failed during INSTALL"));
    assert!(out.contains("pip failed to build package"));
    assert!(out.contains("rollback: restored"));
    let after_rollback = out.split("rollback: restored").nth(1).unwrap_or_default();
    assert!(after_rollback.lines().any(|l| l.starts_with("health: ")), "{out}");
    assert!(!p.home.join("install.inprogress").exists());
    assert!(!p.home.join("partial-install").exists());
    assert_eq!(
        fs::read_to_string(p.home.join("config.toml")).expect("config"),
        "theme = \"dark\"\n"
    );

    let history = fs::read_to_string(p.home.join("events.jsonl")).expect("history");
    assert!(history.contains("rollback_performed"));
}

#[test]
fn failed_fresh_install_has_no_backup_to_restore() {
    let p = project();
    let artifact = write_artifact(&p, "1.0.0");
    let out = stdout_of(
        dockhand(&p).arg("install").arg(&artifact).env("FAKE_PIPX_FAIL", "1"),
        false,
    );
    assert!(out.contains("rollback: failed: No backups available"), "{out}");
    assert!(out.contains("install.inprogress"));
    assert!(!p.home.join("install.inprogress").exists());
    assert!(!p.home.join("partial-install").exists());
}

#[test]
fn no_rollback_leaves_partial_install_markers() {
    let p = project();
    let artifact = write_artifact(&p, "1.0.0");
    let out = stdout_of(
        dockhand(&p)
            .args(["install", "--no-rollback"])
            .arg(&artifact)
            .env("FAKE_PIPX_FAIL", "1"),
        false,
    );
    assert!(!out.contains("rollback:"), "{out}");
    assert!(p.home.join("install.inprogress").exists());
    assert!(p.home.join("partial-install").is_dir());
}

#[test]
fn install_rejects_artifact_for_another_package() {
    let p = project();
    let other = p.root.join("other-1.0.0-py3-none-any.whl");
    fs::write(&other, b"wheel").expect("write");
    let out = stdout_of(dockhand(&p).arg("install").arg(&other), false);
    assert!(out.contains("[READINESS]"), "{out}");
    assert!(out.contains("expected demo"));
    assert!(!p.bin.join("installed").exists());
}

#[test]
fn uninstall_backs_up_and_clears_manifest() {
    let p = project();
    let artifact = write_artifact(&p, "1.0.0");
    stdout_of(dockhand(&p).arg("install").arg(&artifact), true);

    let out = stdout_of(dockhand(&p).args(["-y", "uninstall"]), true);
    assert!(out.contains("uninstalled"), "{out}");
    assert!(!p.home.join("install-manifest.json").exists());
    assert_eq!(backup_dirs(&p).len(), 1);
    assert!(!p.bin.join("installed").exists());
}

#[test]
fn doctor_blocks_on_missing_package_manager() {
    let p = project_with_pipx(Some("/nonexistent/pipx"));
    dockhand(&p)
        .arg("doctor")
        .assert()
        .failure()
        .stdout(contains("[BLOCKED] Package manager"))
        .stdout(contains("[FAIL] Package manager"))
        .stdout(contains("[WARN] Index connectivity"));
}

#[test]
fn doctor_warns_when_components_change_after_install() {
    let p = project();
    let mut config = fs::read_to_string(p.root.join("dockhand.toml")).expect("config");
    config.push_str("\n[health]\nsub_files = [\"profiles\"]\n");
    fs::write(p.root.join("dockhand.toml"), config).expect("write config");
    fs::create_dir_all(p.home.join("profiles")).expect("mkdir");

    let artifact = write_artifact(&p, "1.0.0");
    stdout_of(dockhand(&p).arg("install").arg(&artifact), true);
    let manifest = fs::read_to_string(p.home.join("install-manifest.json")).expect("manifest");
    assert!(manifest.contains("component_counts"), "{manifest}");

    fs::remove_dir_all(p.home.join("profiles")).expect("rm profiles");
    dockhand(&p)
        .arg("doctor")
        .assert()
        .stderr(contains("installed components changed since install"));
}

#[test]
fn rollback_without_backups_fails() {
    let p = project();
    dockhand(&p)
        .arg("rollback")
        .assert()
        .failure()
        .stderr(contains("No backups available"));
}

#[test]
fn backups_cleanup_keeps_the_newest() {
    let p = project();
    for stamp in ["20260101-000000", "20260101-000100", "20260101-000200"] {
        let dir = p.home.join("backups").join(format!("backup-{stamp}"));
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("config.toml"), "x = 1\n").expect("write");
    }

    let out = stdout_of(dockhand(&p).args(["backups", "cleanup", "--keep", "1"]), true);
    assert_snapshot!(out, @"removed 2 backup(s), kept 1");
    assert_eq!(
        backup_dirs(&p),
        vec![p.home.join("backups/backup-20260101-000200")]
    );
}

#[test]
fn json_mode_prints_one_document() {
    let p = project();
    let out = stdout_of(
        dockhand(&p)
            .args(["backups", "list"])
            .env("DOCKHAND_OUTPUT", "json"),
        true,
    );
    let value: serde_json::Value = serde_json::from_str(&out).expect("json");
    assert_eq!(value, serde_json::json!([]));
}

#[test]
fn version_reports_package_state() {
    let p = project();
    let out = stdout_of(dockhand(&p).arg("version"), true);
    assert_snapshot!(
        out.replace(env!("CARGO_PKG_VERSION"), "<VERSION>"),
        @r"
    dockhand <VERSION>
    demo: not installed
    "
    );
}

#[test]
fn config_init_then_validate() {
    let td = tempdir().expect("tempdir");
    let mut init = Command::new(assert_cmd::cargo::cargo_bin!("dockhand"));
    init.current_dir(td.path())
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(contains("dockhand.toml"));
    assert!(td.path().join("dockhand.toml").exists());

    let mut again = Command::new(assert_cmd::cargo::cargo_bin!("dockhand"));
    again
        .current_dir(td.path())
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(contains("already exists"));

    let mut validate = Command::new(assert_cmd::cargo::cargo_bin!("dockhand"));
    validate
        .current_dir(td.path())
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(contains("is valid"));
}

#[test]
fn invalid_config_is_reported() {
    let p = project();
    fs::write(p.root.join("dockhand.toml"), "[backup]\nkeep = 0\n").expect("write");
    dockhand(&p)
        .arg("version")
        .assert()
        .failure()
        .stderr(contains("backup.keep must be greater than 0"));
}

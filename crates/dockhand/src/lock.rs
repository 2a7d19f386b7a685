//! Advisory lock file guarding install, uninstall and rollback.
//!
//! The lock lives at `<config>/lock` and records who holds it (PID,
//! hostname, timestamp, operation).

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const LOCK_FILE: &str = "lock";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
    /// `install`, `uninstall`, `rollback`, ...
    pub operation: String,
}

/// Lock file handle that releases on Drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    released: bool,
}

impl LockFile {
    /// Acquire the lock in `dir`. Fails if a lock file already exists.
    ///
    /// The lock is written to a private tmp file and hard-linked into place,
    /// so exactly one of several racing callers wins and readers never see a
    /// half-written lock.
    pub fn acquire(dir: &Path, operation: &str) -> Result<Self> {
        let lock_path = lock_path(dir);

        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config dir {}", dir.display()))?;

        if lock_path.exists() {
            return Err(held_error(dir));
        }

        let info = LockInfo {
            pid: std::process::id(),
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            acquired_at: Utc::now(),
            operation: operation.to_string(),
        };

        let tmp_path = dir.join(format!(
            "{LOCK_FILE}.{}.{}.tmp",
            info.pid,
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let json = serde_json::to_string_pretty(&info).context("failed to serialize lock info")?;
        {
            let mut file = File::create(&tmp_path).with_context(|| {
                format!("failed to create lock tmp file {}", tmp_path.display())
            })?;
            file.write_all(json.as_bytes())
                .with_context(|| format!("failed to write lock tmp file {}", tmp_path.display()))?;
            file.sync_all().context("failed to sync lock file")?;
        }

        let linked = fs::hard_link(&tmp_path, &lock_path);
        let _ = fs::remove_file(&tmp_path);
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(held_error(dir)),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to create lock file {}", lock_path.display())
                });
            }
        }

        Ok(Self {
            path: lock_path,
            released: false,
        })
    }

    /// Acquire the lock, removing a stale lock older than `timeout` or a
    /// corrupt lock file first.
    pub fn acquire_with_timeout(dir: &Path, operation: &str, timeout: Duration) -> Result<Self> {
        let lock_path = lock_path(dir);

        if lock_path.exists() {
            match read_lock_info(dir) {
                Ok(info) if is_stale(&info, timeout) => {
                    fs::remove_file(&lock_path).with_context(|| {
                        format!("failed to remove stale lock file {}", lock_path.display())
                    })?;
                }
                Ok(info) => {
                    bail!(
                        "lock already held by pid {} on {} since {} ({})",
                        info.pid,
                        info.hostname,
                        info.acquired_at,
                        info.operation
                    );
                }
                Err(_) => {
                    fs::remove_file(&lock_path).with_context(|| {
                        format!("failed to remove corrupt lock file {}", lock_path.display())
                    })?;
                }
            }
        }

        Self::acquire(dir, operation)
    }

    pub fn release(&mut self) -> Result<()> {
        if !self.released && self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove lock file {}", self.path.display()))?;
        }
        self.released = true;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn held_error(dir: &Path) -> anyhow::Error {
    match read_lock_info(dir) {
        Ok(info) => anyhow::anyhow!(
            "lock already held by pid {} on {} since {} ({})",
            info.pid,
            info.hostname,
            info.acquired_at,
            info.operation
        ),
        Err(e) => e.context("lock already held"),
    }
}

pub fn is_stale(info: &LockInfo, timeout: Duration) -> bool {
    let age = Utc::now() - info.acquired_at;
    age.num_seconds().unsigned_abs() > timeout.as_secs()
}

pub fn read_lock_info(dir: &Path) -> Result<LockInfo> {
    let path = lock_path(dir);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read lock file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse lock JSON from {}", path.display()))
}

/// The live lock holder, ignoring stale or corrupt lock files.
pub fn active_lock(dir: &Path, timeout: Duration) -> Option<LockInfo> {
    if !lock_path(dir).exists() {
        return None;
    }
    read_lock_info(dir).ok().filter(|info| !is_stale(info, timeout))
}

pub fn lock_path(dir: &Path) -> PathBuf {
    dir.join(LOCK_FILE)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn acquire_and_release() {
        let td = tempdir().expect("tempdir");
        let mut lock = LockFile::acquire(td.path(), "install").expect("acquire");
        assert!(lock_path(td.path()).exists());
        lock.release().expect("release");
        assert!(!lock_path(td.path()).exists());
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let td = tempdir().expect("tempdir");
        let _lock = LockFile::acquire(td.path(), "install").expect("first acquire");

        let err = LockFile::acquire(td.path(), "rollback").unwrap_err();
        assert!(err.to_string().contains("lock already held"));
        assert!(err.to_string().contains("install"));
    }

    #[test]
    fn drop_releases_lock() {
        let td = tempdir().expect("tempdir");
        {
            let _lock = LockFile::acquire(td.path(), "install").expect("acquire");
            assert!(lock_path(td.path()).exists());
        }
        assert!(!lock_path(td.path()).exists());
    }

    #[test]
    fn lock_info_records_holder() {
        let td = tempdir().expect("tempdir");
        let _lock = LockFile::acquire(td.path(), "uninstall").expect("acquire");

        let info = read_lock_info(td.path()).expect("read info");
        assert_eq!(info.pid, std::process::id());
        assert!(!info.hostname.is_empty());
        assert_eq!(info.operation, "uninstall");
        assert!(active_lock(td.path(), Duration::from_secs(3600)).is_some());
    }

    #[test]
    fn stale_lock_is_replaced() {
        let td = tempdir().expect("tempdir");
        let old = LockInfo {
            pid: 12345,
            hostname: "elsewhere".to_string(),
            acquired_at: Utc::now() - chrono::Duration::hours(2),
            operation: "install".to_string(),
        };
        fs::write(lock_path(td.path()), serde_json::to_string(&old).expect("serialize"))
            .expect("write stale lock");

        assert!(active_lock(td.path(), Duration::from_secs(3600)).is_none());
        let _lock = LockFile::acquire_with_timeout(td.path(), "install", Duration::from_secs(3600))
            .expect("acquire");
        assert_eq!(read_lock_info(td.path()).expect("info").pid, std::process::id());
    }

    #[test]
    fn corrupt_lock_is_replaced() {
        let td = tempdir().expect("tempdir");
        fs::write(lock_path(td.path()), "not json").expect("write");
        let _lock = LockFile::acquire_with_timeout(td.path(), "rollback", Duration::from_secs(60))
            .expect("acquire");
        assert_eq!(read_lock_info(td.path()).expect("info").operation, "rollback");
    }

    #[test]
    fn racing_acquires_have_one_winner() {
        let td = tempdir().expect("tempdir");
        let barrier = std::sync::Barrier::new(8);
        let winners = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        LockFile::acquire(td.path(), "install")
                    })
                })
                .collect();
            let results: Vec<_> = handles
                .into_iter()
                .map(|h| h.join().expect("thread"))
                .collect();
            results.iter().filter(|r| r.is_ok()).count()
        });
        assert_eq!(winners, 1);
        assert!(!lock_path(td.path()).exists());
        let leftovers = fs::read_dir(td.path()).expect("read dir").count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn fresh_lock_blocks_timeout_acquire() {
        let td = tempdir().expect("tempdir");
        let _lock = LockFile::acquire(td.path(), "install").expect("acquire");
        let err = LockFile::acquire_with_timeout(td.path(), "install", Duration::from_secs(3600))
            .unwrap_err();
        assert!(err.to_string().contains("lock already held"));
    }
}

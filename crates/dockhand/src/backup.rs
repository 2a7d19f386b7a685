//! Timestamped backups of the application config directory.
//!
//! Each backup is a directory `<prefix>-YYYYMMDD-HHMMSS` under the backups
//! root. A second backup in the same second gets a `-NN` counter, which also
//! sorts after the unsuffixed name so path order matches creation order.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

use crate::ports::{BackupPort, CleanupReport};
use crate::types::BackupInfo;

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const MAX_SAME_SECOND: u32 = 99;

#[derive(Debug, Clone)]
pub struct FsBackupStore {
    root: PathBuf,
    prefix: String,
    include: Vec<String>,
}

impl FsBackupStore {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>, include: Vec<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
            include,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a backup stamped with `timestamp` instead of the current time.
    pub fn create_backup_at(&self, source: &Path, timestamp: DateTime<Utc>) -> Result<BackupInfo> {
        if !source.is_dir() {
            bail!("source not found: {}", source.display());
        }

        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create backups dir {}", self.root.display()))?;

        let timestamp = timestamp.trunc_subsecs(0);
        let path = self.reserve_dir(timestamp)?;

        for entry in &self.include {
            let from = source.join(entry);
            if !from.exists() {
                continue;
            }
            let to = path.join(entry);
            copy_tree(&from, &to).with_context(|| {
                format!("failed to back up {} into {}", from.display(), path.display())
            })?;
        }

        Ok(BackupInfo {
            size_bytes: dir_size(&path)?,
            path,
            timestamp,
        })
    }

    fn reserve_dir(&self, timestamp: DateTime<Utc>) -> Result<PathBuf> {
        let base = format!("{}-{}", self.prefix, timestamp.format(TIMESTAMP_FORMAT));
        for n in 0..=MAX_SAME_SECOND {
            let name = if n == 0 {
                base.clone()
            } else {
                format!("{base}-{n:02}")
            };
            let candidate = self.root.join(name);
            match fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("failed to create backup dir {}", candidate.display())
                    });
                }
            }
        }
        bail!("too many backups created at {}", timestamp.format(TIMESTAMP_FORMAT))
    }

    /// Parse `<prefix>-YYYYMMDD-HHMMSS[-NN]` into its timestamp.
    pub fn parse_backup_name(&self, name: &str) -> Option<DateTime<Utc>> {
        let rest = name.strip_prefix(&self.prefix)?.strip_prefix('-')?;
        let stamp = rest.get(..15)?;
        let suffix = &rest[15..];
        if !suffix.is_empty() {
            let counter = suffix.strip_prefix('-')?;
            if counter.len() != 2 || !counter.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
        }
        NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn latest_backup(&self) -> Result<Option<BackupInfo>> {
        Ok(self.list_backups()?.into_iter().next())
    }

    pub fn backup_info(&self, path: &Path) -> Result<BackupInfo> {
        if !path.is_dir() {
            bail!("backup not found: {}", path.display());
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let Some(timestamp) = self.parse_backup_name(&name) else {
            bail!("{} is not a {} backup directory", path.display(), self.prefix);
        };
        Ok(BackupInfo {
            path: path.to_path_buf(),
            timestamp,
            size_bytes: dir_size(path)?,
        })
    }
}

impl BackupPort for FsBackupStore {
    fn create_backup(&self, source: &Path) -> Result<BackupInfo> {
        self.create_backup_at(source, Utc::now())
    }

    /// Allow-listed entries present in the backup replace the target's;
    /// allow-listed entries absent from the backup are removed from the
    /// target, so the target ends up matching the snapshot.
    fn restore_backup(&self, backup: &Path, target: &Path) -> Result<()> {
        if !backup.is_dir() {
            bail!("backup not found: {}", backup.display());
        }

        fs::create_dir_all(target)
            .with_context(|| format!("failed to create restore target {}", target.display()))?;

        for entry in &self.include {
            let from = backup.join(entry);
            let to = target.join(entry);
            remove_path(&to)?;
            if from.exists() {
                copy_tree(&from, &to).with_context(|| {
                    format!("failed to restore {} to {}", from.display(), to.display())
                })?;
            }
        }
        Ok(())
    }

    fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("failed to read backups dir {}", self.root.display()))?;
        for entry in entries {
            let entry = entry.context("failed to read backups dir entry")?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(timestamp) = self.parse_backup_name(&name) else {
                continue;
            };
            backups.push(BackupInfo {
                size_bytes: dir_size(&path)?,
                path,
                timestamp,
            });
        }

        sort_newest_first(&mut backups);
        Ok(backups)
    }

    fn cleanup_old_backups(&self, keep: usize) -> Result<CleanupReport> {
        let backups = self.list_backups()?;
        let mut removed = 0;
        for old in backups.iter().skip(keep) {
            fs::remove_dir_all(&old.path)
                .with_context(|| format!("failed to remove backup {}", old.path.display()))?;
            removed += 1;
        }
        Ok(CleanupReport {
            removed,
            kept: backups.len() - removed,
        })
    }
}

/// Newest first; equal timestamps fall back to path order, also descending.
pub fn sort_newest_first(backups: &mut [BackupInfo]) {
    backups.sort_by(|a, b| (b.timestamp, &b.path).cmp(&(a.timestamp, &a.path)));
}

/// Recursively copy a file or directory.
pub fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(from)
        .with_context(|| format!("failed to stat {}", from.display()))?;

    if meta.is_dir() {
        fs::create_dir_all(to).with_context(|| format!("failed to create {}", to.display()))?;
        for entry in
            fs::read_dir(from).with_context(|| format!("failed to read {}", from.display()))?
        {
            let entry = entry.with_context(|| format!("failed to read {}", from.display()))?;
            copy_tree(&entry.path(), &to.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::copy(from, to)
            .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))?;
    }
    Ok(())
}

fn remove_path(path: &Path) -> Result<()> {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return Ok(());
    };
    let removed = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.with_context(|| format!("failed to remove {}", path.display()))
}

fn dir_size(path: &Path) -> Result<u64> {
    let meta =
        fs::symlink_metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    if !meta.is_dir() {
        return Ok(meta.len());
    }
    let mut total = 0;
    for entry in fs::read_dir(path).with_context(|| format!("failed to read {}", path.display()))? {
        let entry = entry.with_context(|| format!("failed to read {}", path.display()))?;
        total += dir_size(&entry.path())?;
    }
    Ok(total)
}

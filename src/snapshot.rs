//! Pre-mutation snapshots of the filter state.
//!
//! Every mutating command dumps the full ruleset to a new, timestamp-named
//! file before touching anything. Snapshots are write-once and never pruned.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::enforcer::FilterEngine;
use crate::error::ChainwardenError;

/// File name prefix of every snapshot
pub const SNAPSHOT_PREFIX: &str = "iptables-backup-";

/// File name extension of every snapshot
pub const SNAPSHOT_EXTENSION: &str = "rules";

/// Uniqueness suffixes tried for snapshots taken within the same second
const MAX_SUFFIX: u32 = 1000;

/// Writes and lists snapshots in a backup directory
pub struct SnapshotManager<'a> {
    dir: PathBuf,
    engine: &'a dyn FilterEngine,
}

impl<'a> SnapshotManager<'a> {
    pub fn new(dir: impl Into<PathBuf>, engine: &'a dyn FilterEngine) -> Self {
        Self {
            dir: dir.into(),
            engine,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Take a snapshot now
    pub fn take(&self) -> Result<PathBuf> {
        self.take_at(Local::now())
    }

    /// Take a snapshot named after `now`.
    ///
    /// Any failure is fatal: callers must not mutate the filter when this fails.
    pub fn take_at(&self, now: DateTime<Local>) -> Result<PathBuf> {
        let dump = self
            .engine
            .dump()
            .context("Failed to read the current filter state for backup")?;

        fs::create_dir_all(&self.dir).map_err(|e| {
            ChainwardenError::Snapshot(format!(
                "cannot create backup directory {:?}: {}",
                self.dir, e
            ))
        })?;

        let mut temp_file = NamedTempFile::new_in(&self.dir).map_err(|e| {
            ChainwardenError::Snapshot(format!("cannot write in {:?}: {}", self.dir, e))
        })?;
        temp_file
            .write_all(dump.as_bytes())
            .and_then(|_| temp_file.as_file().sync_all())
            .map_err(|e| ChainwardenError::Snapshot(format!("cannot write snapshot: {}", e)))?;
        fs::set_permissions(temp_file.path(), fs::Permissions::from_mode(0o600))
            .map_err(|e| ChainwardenError::Snapshot(format!("cannot restrict snapshot: {}", e)))?;

        let stamp = now.format("%Y%m%d-%H%M%S").to_string();
        let mut pending = temp_file;
        for attempt in 1..=MAX_SUFFIX {
            let path = self.dir.join(snapshot_file_name(&stamp, attempt));
            match pending.persist_noclobber(&path) {
                Ok(_) => {
                    info!("Saved filter snapshot to {:?}", path);
                    return Ok(path);
                }
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!("Snapshot {:?} already exists, trying next suffix", path);
                    pending = e.file;
                }
                Err(e) => {
                    return Err(ChainwardenError::Snapshot(format!(
                        "cannot persist snapshot {:?}: {}",
                        path, e.error
                    ))
                    .into());
                }
            }
        }

        Err(ChainwardenError::Snapshot(format!(
            "no free snapshot name for {} in {:?}",
            stamp, self.dir
        ))
        .into())
    }

    /// Existing snapshots, oldest first. A missing directory yields no snapshots.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {:?}", self.dir));
            }
        };

        let mut snapshots: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_snapshot_name(path))
            .collect();
        // Names embed a sortable timestamp; the suffix breaks ties
        snapshots.sort_by_key(|path| sort_key(path));
        Ok(snapshots)
    }

    /// Most recent snapshot, if any
    pub fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.list()?.pop())
    }
}

fn snapshot_file_name(stamp: &str, attempt: u32) -> String {
    if attempt == 1 {
        format!("{}{}.{}", SNAPSHOT_PREFIX, stamp, SNAPSHOT_EXTENSION)
    } else {
        format!("{}{}-{}.{}", SNAPSHOT_PREFIX, stamp, attempt, SNAPSHOT_EXTENSION)
    }
}

fn is_snapshot_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(SNAPSHOT_PREFIX) && n.ends_with(SNAPSHOT_EXTENSION))
}

fn sort_key(path: &Path) -> (String, u32) {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .trim_start_matches(SNAPSHOT_PREFIX);
    // stem is "YYYYmmdd-HHMMSS" or "YYYYmmdd-HHMMSS-N"
    match stem.rsplit_once('-') {
        Some((stamp, n)) if stamp.contains('-') => {
            (stamp.to_string(), n.parse().unwrap_or(1))
        }
        _ => (stem.to_string(), 1),
    }
}

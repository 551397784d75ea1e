//! Custody of one source file while a mutant is in flight.
//!
//! The custodian owns the file and its sibling `<path>.backup` for the length
//! of a mutation session. A backup exists exactly while a mutated version of
//! the file is on disk; finding one at startup is evidence of a crashed
//! earlier run, and the orchestrator restores from it before doing anything
//! else. Overwrites go through a temporary sibling plus rename so an external
//! observer never sees a half-written file.

use std::fs;
use std::io::Write;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

use crate::error::EngineError;
use crate::Result;

pub const BACKUP_SUFFIX: &str = "backup";

#[derive(Debug)]
pub struct FileCustodian {
    path: Utf8PathBuf,
    backup_path: Utf8PathBuf,
}

impl FileCustodian {
    pub fn new<P: Into<Utf8PathBuf>>(path: P) -> FileCustodian {
        let path = path.into();
        let backup_path = Utf8PathBuf::from(format!("{path}.{BACKUP_SUFFIX}"));
        FileCustodian { path, backup_path }
    }

    /// True if a backup file exists, whether from this session or a crashed
    /// earlier one.
    pub fn has_stale_backup(&self) -> bool {
        self.backup_path.exists()
    }

    /// Copy the current file content to the backup path and return it.
    pub fn backup(&self) -> Result<String> {
        let content = fs::read_to_string(&self.path)
            .map_err(EngineError::IoFailure)
            .with_context(|| format!("read {} for backup", self.path))?;
        fs::write(&self.backup_path, &content)
            .map_err(EngineError::IoFailure)
            .with_context(|| format!("write backup {}", self.backup_path))?;
        Ok(content)
    }

    /// Atomically overwrite the source file with mutated text.
    pub fn write_mutated(&self, text: &str) -> Result<()> {
        let dir = self.path.parent().unwrap_or(Utf8Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(".mutate4swift-")
            .tempfile_in(dir)
            .with_context(|| format!("create temporary file next to {}", self.path))?;
        tmp.write_all(text.as_bytes())
            .context("write mutated source to temporary file")?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("rename mutated source over {}", self.path))?;
        Ok(())
    }

    /// Copy the backup back over the source and remove the backup.
    pub fn restore(&self) -> Result<()> {
        let content = fs::read_to_string(&self.backup_path)
            .with_context(|| EngineError::BackupRestoreFailed(self.path.clone()))?;
        self.write_mutated(&content)
            .with_context(|| EngineError::BackupRestoreFailed(self.path.clone()))?;
        fs::remove_file(&self.backup_path)
            .with_context(|| EngineError::BackupRestoreFailed(self.path.clone()))?;
        Ok(())
    }

    /// Restore only if a backup exists; returns whether a restore happened.
    pub fn restore_if_needed(&self) -> Result<bool> {
        if self.has_stale_backup() {
            self.restore()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

impl Drop for FileCustodian {
    /// Last-resort cleanup for error and unwind paths: a session that ends
    /// with a backup still on disk restores the original bytes. Cleanup never
    /// propagates errors.
    fn drop(&mut self) {
        match self.restore_if_needed() {
            Ok(true) => warn!(path = %self.path, "restored source from leftover backup"),
            Ok(false) => {}
            Err(err) => warn!(path = %self.path, ?err, "failed to restore leftover backup"),
        }
    }
}

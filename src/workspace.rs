//! Locate the Swift package enclosing a path, and enumerate its mutable
//! source files.

use std::fs;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::custodian::BACKUP_SUFFIX;
use crate::error::EngineError;
use crate::process::{run_with_deadline, ExitKind};
use crate::Result;

pub const PACKAGE_MANIFEST: &str = "Package.swift";

/// All engine artifacts under a package live in this directory.
pub const TOOL_DIR: &str = ".mutate4swift";

/// Directory names under `Sources/` that are never mutated.
pub const EXCLUDED_DIR_NAMES: &[&str] = &["generated", "vendor", "pods", "carthage"];

/// Walk ancestor directories until one contains a package manifest.
pub fn find_package_root(start: &Utf8Path) -> Result<Utf8PathBuf> {
    let origin = start
        .canonicalize_utf8()
        .unwrap_or_else(|_| start.to_owned());
    let mut dir: &Utf8Path = if origin.is_dir() {
        &origin
    } else {
        origin
            .parent()
            .ok_or_else(|| EngineError::PackagePathNotFound(start.to_owned()))?
    };
    loop {
        if dir.join(PACKAGE_MANIFEST).is_file() {
            debug!(root = %dir, "found package root");
            return Ok(dir.to_owned());
        }
        dir = match dir.parent() {
            Some(parent) => parent,
            None => return Err(EngineError::PackagePathNotFound(start.to_owned()).into()),
        };
    }
}

/// Sorted tree-relative paths of mutable Swift sources under `Sources/`.
///
/// Backups, and anything inside an excluded directory, are skipped.
/// `extra_excluded` adds to the built-in excluded set; matching is
/// case-insensitive since `Pods` and `Carthage` are conventionally
/// capitalized.
pub fn list_source_files(root: &Utf8Path, extra_excluded: &[String]) -> Result<Vec<Utf8PathBuf>> {
    let sources_dir = root.join("Sources");
    if !sources_dir.is_dir() {
        return Err(EngineError::InvalidSourceFile {
            path: root.to_owned(),
            reason: "package has no Sources directory".to_owned(),
        }
        .into());
    }
    let mut excluded: Vec<String> = EXCLUDED_DIR_NAMES.iter().map(|s| s.to_string()).collect();
    excluded.extend(extra_excluded.iter().map(|s| s.to_lowercase()));
    let walker = WalkBuilder::new(&sources_dir)
        .standard_filters(false)
        .filter_entry(move |entry| {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            !(entry.file_type().is_some_and(|t| t.is_dir()) && excluded.contains(&name))
        })
        .build();
    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.context("walk Sources directory")?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(path) = Utf8PathBuf::try_from(entry.into_path()) else {
            warn!("skipping non-UTF-8 source path");
            continue;
        };
        if path.extension() != Some("swift") || path.as_str().ends_with(BACKUP_SUFFIX) {
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .map(Utf8Path::to_owned)
            .unwrap_or(path);
        files.push(relative);
    }
    files.sort();
    Ok(files)
}

/// Check that `file` is a plausible mutation input within `root`.
pub fn validate_source_file(root: &Utf8Path, file: &Utf8Path) -> Result<()> {
    if !file.is_file() {
        return Err(EngineError::SourceFileNotFound(file.to_owned()).into());
    }
    let canonical = file
        .canonicalize_utf8()
        .map_err(EngineError::IoFailure)
        .with_context(|| format!("canonicalize {file}"))?;
    let canonical_root = root.canonicalize_utf8().unwrap_or_else(|_| root.to_owned());
    if !canonical.starts_with(&canonical_root) {
        return Err(EngineError::InvalidSourceFile {
            path: file.to_owned(),
            reason: format!("outside package root {canonical_root}"),
        }
        .into());
    }
    let metadata = fs::metadata(&canonical)
        .map_err(EngineError::IoFailure)
        .with_context(|| format!("stat {canonical}"))?;
    if metadata.len() == 0 {
        return Err(EngineError::InvalidSourceFile {
            path: file.to_owned(),
            reason: "file is empty".to_owned(),
        }
        .into());
    }
    Ok(())
}

/// The `--require-clean` safeguard: refuse to mutate over uncommitted work.
///
/// A directory that is not a git checkout passes; there is nothing to lose.
pub fn ensure_clean_working_tree(root: &Utf8Path) -> Result<()> {
    let argv = vec![
        "git".to_owned(),
        "status".to_owned(),
        "--porcelain".to_owned(),
    ];
    let output = match run_with_deadline(&argv, root, std::time::Duration::from_secs(30)) {
        Ok(output) => output,
        Err(err) => {
            warn!(?err, "could not run git; skipping working-tree check");
            return Ok(());
        }
    };
    match output.kind {
        ExitKind::Success if output.output.trim().is_empty() => Ok(()),
        ExitKind::Success => Err(EngineError::WorkingTreeDirty(root.to_owned()).into()),
        _ => {
            debug!("not a git repository; skipping working-tree check");
            Ok(())
        }
    }
}

//! Copy the package tree into an isolated worker workspace under
//! `.mutate4swift/worktrees/`.
//!
//! Each worker mutates files only inside its own copy, so two workers can
//! never write the same path. The copy excludes the top-level `.build`,
//! `.git` and `.mutate4swift` entries; symlinks are resolved before the
//! prefix check so a link that remaps into an excluded tree is caught.

use std::fs;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::interrupt::check_interrupted;
use crate::workspace::TOOL_DIR;
use crate::Result;

pub const WORKTREES_DIR: &str = "worktrees";

/// Top-level entries never copied into a workspace.
const COPY_EXCLUDE: &[&str] = &[".build", ".git", TOOL_DIR];

/// An isolated copy of the package, deleted when dropped.
pub struct WorkerWorkspace {
    path: Utf8PathBuf,
    /// Holds the directory so it is removed on drop, on all exit paths.
    _temp_dir: TempDir,
}

impl WorkerWorkspace {
    /// Copy `root` into a fresh workspace for `worker_index`.
    pub fn create(root: &Utf8Path, worker_index: usize) -> Result<WorkerWorkspace> {
        let worktrees = root.join(TOOL_DIR).join(WORKTREES_DIR);
        fs::create_dir_all(&worktrees)
            .with_context(|| format!("create worktrees directory {worktrees}"))?;
        let temp_dir = tempfile::Builder::new()
            .prefix(&format!("worker{worker_index}-"))
            .tempdir_in(&worktrees)
            .context("create worker workspace directory")?;
        let dest: Utf8PathBuf = temp_dir
            .path()
            .to_owned()
            .try_into()
            .context("workspace path is not UTF-8")?;
        copy_package_tree(root, &dest)?;
        debug!(%dest, worker_index, "created worker workspace");
        Ok(WorkerWorkspace {
            path: dest,
            _temp_dir: temp_dir,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

fn copy_package_tree(from: &Utf8Path, dest: &Utf8Path) -> Result<()> {
    let canonical_from = from.canonicalize_utf8().unwrap_or_else(|_| from.to_owned());
    let excluded_roots: Vec<Utf8PathBuf> =
        COPY_EXCLUDE.iter().map(|e| canonical_from.join(e)).collect();
    let mut total_files = 0;
    let walker = WalkBuilder::new(from)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() != 1 || !COPY_EXCLUDE.contains(&name.as_ref())
        })
        .build();
    for entry in walker {
        check_interrupted()?;
        let entry = entry.context("walk package tree")?;
        if entry.depth() == 0 {
            continue;
        }
        let path: &Utf8Path = entry
            .path()
            .try_into()
            .context("package tree path is not UTF-8")?;
        let relative = path.strip_prefix(from).expect("entry path is under root");
        let dest_path = dest.join(relative);
        let file_type = entry
            .file_type()
            .with_context(|| format!("no file type for {path}"))?;
        if file_type.is_symlink() {
            // Resolve before the prefix check: the link itself lives in the
            // tree, but it may point back into an excluded directory.
            let resolved = match path.canonicalize_utf8() {
                Ok(resolved) => resolved,
                Err(err) => {
                    warn!(%path, ?err, "skipping dangling symlink");
                    continue;
                }
            };
            if excluded_roots.iter().any(|ex| resolved.starts_with(ex)) {
                debug!(%path, %resolved, "skipping symlink into an excluded tree");
                continue;
            }
            if resolved.is_dir() {
                warn!(%path, "skipping directory symlink");
                continue;
            }
            fs::copy(&resolved, &dest_path)
                .with_context(|| format!("copy symlinked file {resolved} to {dest_path}"))?;
            total_files += 1;
        } else if file_type.is_dir() {
            fs::create_dir_all(&dest_path)
                .with_context(|| format!("create directory {dest_path}"))?;
        } else {
            fs::copy(path, &dest_path)
                .with_context(|| format!("copy {path} to {dest_path}"))?;
            total_files += 1;
        }
    }
    debug!(total_files, "copied package tree");
    Ok(())
}

#[cfg(test)]
mod test {
    use std::fs::{create_dir_all, write};

    use super::*;

    fn fixture() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_owned()).unwrap();
        write(root.join("Package.swift"), "// manifest\n").unwrap();
        create_dir_all(root.join("Sources/App")).unwrap();
        write(root.join("Sources/App/Math.swift"), "func f() {}\n").unwrap();
        create_dir_all(root.join(".build")).unwrap();
        write(root.join(".build/junk.o"), "object\n").unwrap();
        create_dir_all(root.join(".git")).unwrap();
        write(root.join(".git/HEAD"), "ref\n").unwrap();
        create_dir_all(root.join(TOOL_DIR)).unwrap();
        write(root.join(TOOL_DIR).join("old.log"), "log\n").unwrap();
        (dir, root)
    }

    #[test]
    fn workspace_copy_excludes_build_vcs_and_tool_dirs() {
        let (_dir, root) = fixture();
        let workspace = WorkerWorkspace::create(&root, 0).unwrap();
        let dest = workspace.path();
        assert!(dest.join("Package.swift").is_file());
        assert!(dest.join("Sources/App/Math.swift").is_file());
        assert!(!dest.join(".build").exists());
        assert!(!dest.join(".git").exists());
        assert!(!dest.join(TOOL_DIR).exists());
    }

    #[test]
    fn workspace_lives_under_the_worktrees_directory() {
        let (_dir, root) = fixture();
        let workspace = WorkerWorkspace::create(&root, 3).unwrap();
        let expected_parent = root.join(TOOL_DIR).join(WORKTREES_DIR);
        assert!(workspace.path().starts_with(&expected_parent));
        assert!(workspace
            .path()
            .file_name()
            .unwrap()
            .starts_with("worker3-"));
    }

    #[test]
    fn workspace_is_deleted_on_drop() {
        let (_dir, root) = fixture();
        let path = {
            let workspace = WorkerWorkspace::create(&root, 0).unwrap();
            workspace.path().to_owned()
        };
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_into_excluded_tree_is_not_copied() {
        let (_dir, root) = fixture();
        std::os::unix::fs::symlink(root.join(".build/junk.o"), root.join("Sources/remapped.o"))
            .unwrap();
        std::os::unix::fs::symlink(
            root.join("Package.swift"),
            root.join("Sources/manifest-link"),
        )
        .unwrap();
        let workspace = WorkerWorkspace::create(&root, 0).unwrap();
        assert!(
            !workspace.path().join("Sources/remapped.o").exists(),
            "a symlink resolving into .build must be skipped"
        );
        assert!(
            workspace.path().join("Sources/manifest-link").is_file(),
            "a symlink resolving inside the tree is copied by content"
        );
    }
}

//! Filesystem helpers shared by the gem pipeline and the VCS builder

use crate::error::{StagerError, StagerResult};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Copy the contents of `src` into `dest`, preserving file modes and symlinks.
///
/// Existing files in `dest` are replaced, so copying the same tree twice
/// leaves the same result. Directory modes are applied after their children
/// are written so read-only directories still copy.
pub fn copy_tree(src: &Path, dest: &Path) -> StagerResult<()> {
    fs::create_dir_all(dest)
        .map_err(|e| StagerError::io(format!("creating {}", dest.display()), e))?;

    let mut dir_modes: Vec<(PathBuf, fs::Permissions)> = Vec::new();

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            StagerError::io(
                format!("walking {}", src.display()),
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
            )
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| StagerError::Internal(e.to_string()))?;
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| StagerError::io(format!("creating {}", target.display()), e))?;
            let meta = entry
                .metadata()
                .map_err(|e| StagerError::Internal(e.to_string()))?;
            dir_modes.push((target, meta.permissions()));
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .map_err(|e| StagerError::io(format!("reading link {}", entry.path().display()), e))?;
            remove_existing(&target)?;
            symlink(&link, &target)?;
        } else {
            remove_existing(&target)?;
            // fs::copy carries the permission bits over
            fs::copy(entry.path(), &target).map_err(|e| {
                StagerError::io(
                    format!("copying {} to {}", entry.path().display(), target.display()),
                    e,
                )
            })?;
        }
    }

    for (dir, perms) in dir_modes.into_iter().rev() {
        fs::set_permissions(&dir, perms)
            .map_err(|e| StagerError::io(format!("setting mode on {}", dir.display()), e))?;
    }

    Ok(())
}

/// Remove a file or symlink at `path` if present
fn remove_existing(path: &Path) -> StagerResult<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)
            .map_err(|e| StagerError::io(format!("removing {}", path.display()), e)),
        Ok(_) => fs::remove_file(path)
            .map_err(|e| StagerError::io(format!("removing {}", path.display()), e)),
        Err(_) => Ok(()),
    }
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> StagerResult<()> {
    std::os::unix::fs::symlink(link, target)
        .map_err(|e| StagerError::io(format!("linking {}", target.display()), e))
}

#[cfg(not(unix))]
fn symlink(link: &Path, target: &Path) -> StagerResult<()> {
    fs::copy(link, target)
        .map(|_| ())
        .map_err(|e| StagerError::io(format!("copying {}", target.display()), e))
}

/// Run a blocking copy off the async runtime
pub async fn copy_tree_blocking(src: PathBuf, dest: PathBuf) -> StagerResult<()> {
    tokio::task::spawn_blocking(move || copy_tree(&src, &dest))
        .await
        .map_err(|e| StagerError::Internal(format!("copy task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fixture(root: &Path) {
        fs::create_dir_all(root.join("gems/rack-1.2.1/lib")).unwrap();
        fs::write(root.join("gems/rack-1.2.1/lib/rack.rb"), "module Rack; end").unwrap();
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin/rackup"), "#!/usr/bin/env ruby").unwrap();
        fs::set_permissions(root.join("bin/rackup"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn copies_contents_and_modes() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fixture(src.path());

        copy_tree(src.path(), dest.path()).unwrap();

        let copied = fs::read_to_string(dest.path().join("gems/rack-1.2.1/lib/rack.rb")).unwrap();
        assert_eq!(copied, "module Rack; end");
        let mode = fs::metadata(dest.path().join("bin/rackup"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn copying_twice_is_idempotent() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fixture(src.path());

        copy_tree(src.path(), dest.path()).unwrap();
        copy_tree(src.path(), dest.path()).unwrap();

        let entries: Vec<_> = WalkDir::new(dest.path())
            .min_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .collect();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn later_copy_wins_on_overlap() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(first.path().join("VERSION"), "1").unwrap();
        fs::write(second.path().join("VERSION"), "2").unwrap();

        copy_tree(first.path(), dest.path()).unwrap();
        copy_tree(second.path(), dest.path()).unwrap();

        assert_eq!(fs::read_to_string(dest.path().join("VERSION")).unwrap(), "2");
    }

    #[test]
    fn preserves_symlinks() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(src.path().join("real"), "x").unwrap();
        std::os::unix::fs::symlink("real", src.path().join("alias")).unwrap();

        copy_tree(src.path(), dest.path()).unwrap();

        let link = fs::read_link(dest.path().join("alias")).unwrap();
        assert_eq!(link, PathBuf::from("real"));
    }
}

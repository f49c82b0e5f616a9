//! Application source as of HEAD.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Write a tar of `paths` (relative to the repository root) at HEAD to `dest`.
///
/// Only committed content reaches the image: ignored, untracked and
/// modified files are left out. An empty `paths` archives the whole tree.
pub fn archive_head(
    repo_root: &Path,
    paths: &[PathBuf],
    dest: &Path,
) -> Result<PathBuf, ArchiveError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ArchiveError::Create {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let mut args: Vec<&OsStr> = vec![
        "archive".as_ref(),
        "--format=tar".as_ref(),
        "--output".as_ref(),
        dest.as_os_str(),
        "HEAD".as_ref(),
    ];
    if !paths.is_empty() {
        args.push("--".as_ref());
        args.extend(paths.iter().map(|p| p.as_os_str()));
    }
    git(repo_root, "archive", &args)?;

    tracing::debug!(archive = %dest.display(), ?paths, "source archived");
    Ok(dest.to_path_buf())
}

/// Whether `path` is tracked in the HEAD commit.
pub fn head_contains(repo_root: &Path, path: &Path) -> Result<bool, ArchiveError> {
    let listed = git(
        repo_root,
        "ls-tree",
        &[
            "ls-tree".as_ref(),
            "--name-only".as_ref(),
            "HEAD".as_ref(),
            "--".as_ref(),
            path.as_os_str(),
        ],
    )?;
    Ok(!listed.is_empty())
}

/// Uncommitted changes in the working tree. They never reach the image.
pub fn is_dirty(repo_root: &Path) -> Result<bool, ArchiveError> {
    let status = git(repo_root, "status", &["status".as_ref(), "--porcelain".as_ref()])?;
    Ok(!status.is_empty())
}

fn git(repo_root: &Path, verb: &'static str, args: &[&OsStr]) -> Result<Vec<u8>, ArchiveError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .map_err(|e| ArchiveError::GitCommand { verb, source: e })?;

    if !output.status.success() {
        return Err(ArchiveError::GitFailed {
            verb,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(output.stdout)
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to create directory {path}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to execute git {verb}")]
    GitCommand {
        verb: &'static str,
        source: std::io::Error,
    },

    #[error("git {verb} exited with {status}: {stderr}")]
    GitFailed {
        verb: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

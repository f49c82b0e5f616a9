//! Repository root, version and branch discovery via `git`.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Version-control facts for one build session. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    /// Absolute path of the working tree root
    pub root: PathBuf,
    /// `git describe --tags --always --dirty` of HEAD
    pub version: String,
    /// Current branch, `None` when HEAD is detached
    pub branch: Option<String>,
}

impl RepoInfo {
    /// Discover the repository containing `dir`.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::GitCommand`] if git cannot be executed
    /// - [`crate::Error::GitFailed`] if `dir` is not inside a repository with
    ///   at least one commit
    pub fn discover(dir: &Path) -> crate::Result<Self> {
        let root = PathBuf::from(git(dir, &["rev-parse", "--show-toplevel"])?);
        let version = git(&root, &["describe", "--tags", "--always", "--dirty"])?;
        let branch = parse_branch(&git(&root, &["rev-parse", "--abbrev-ref", "HEAD"])?);

        tracing::debug!(
            root = %root.display(),
            version = %version,
            branch = ?branch,
            "repository discovered"
        );

        Ok(Self {
            root,
            version,
            branch,
        })
    }
}

/// `git rev-parse --abbrev-ref HEAD` prints the literal `HEAD` when detached.
fn parse_branch(abbrev_ref: &str) -> Option<String> {
    match abbrev_ref {
        "" | "HEAD" => None,
        name => Some(name.to_owned()),
    }
}

/// Run git in `dir` and return its trimmed stdout.
fn git(dir: &Path, args: &[&str]) -> crate::Result<String> {
    let owned_args = || args.iter().map(|a| (*a).to_owned()).collect::<Vec<_>>();

    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| crate::Error::GitCommand {
            args: owned_args(),
            dir: dir.to_path_buf(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(crate::Error::GitFailed {
            args: owned_args(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if stdout.is_empty() {
        return Err(crate::Error::GitEmptyOutput { args: owned_args() });
    }
    Ok(stdout)
}

//! A handle over one working container.
//!
//! Every mutation of the container goes through this type. The handle is
//! released exactly once, either by [`ContainerSession::commit_and_remove`]
//! or by [`ContainerSession::remove`].

use crate::buildah::{Buildah, EngineError};
use crate::executor::{CommandExecutor, args};
use std::path::Path;

pub struct ContainerSession<'a, E: CommandExecutor> {
    buildah: &'a Buildah<E>,
    name: String,
}

impl<'a, E: CommandExecutor> ContainerSession<'a, E> {
    pub(crate) fn new(buildah: &'a Buildah<E>, name: String) -> Self {
        Self { buildah, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `command` as `user`, streaming its output.
    pub async fn run(&self, user: &str, command: &[String]) -> Result<(), EngineError> {
        self.buildah
            .exec_streaming("run", &self.run_args(user, command))
            .await
    }

    /// Run `command` as `user` and capture stdout.
    pub async fn run_captured(&self, user: &str, command: &[String]) -> Result<String, EngineError> {
        self.buildah
            .exec("run", &self.run_args(user, command))
            .await
    }

    fn run_args(&self, user: &str, command: &[String]) -> Vec<String> {
        let mut cmd = args(["run", "--user", user, &self.name, "--"]);
        cmd.extend(command.iter().cloned());
        cmd
    }

    /// Copy a host path, archive or URL to `dest` inside the container.
    ///
    /// Local tar archives are extracted into `dest`.
    pub async fn add(&self, src: &str, dest: &Path, owner: Option<&str>) -> Result<(), EngineError> {
        let dest = path_str(dest)?;
        let mut cmd = args(["add"]);
        if let Some(owner) = owner {
            cmd.push("--chown".to_owned());
            cmd.push(format!("{owner}:{owner}"));
        }
        cmd.extend(args([&self.name, src, dest]));
        self.buildah.exec("add", &cmd).await?;
        Ok(())
    }

    pub async fn set_working_dir(&self, dir: &Path) -> Result<(), EngineError> {
        let dir = path_str(dir)?;
        self.config(args(["--workingdir", dir])).await
    }

    pub async fn set_user(&self, user: &str) -> Result<(), EngineError> {
        self.config(args(["--user", user])).await
    }

    pub async fn set_env(&self, key: &str, value: &str) -> Result<(), EngineError> {
        self.config(args(["--env", &format!("{key}={value}")])).await
    }

    /// Default command of images committed from this container.
    pub async fn set_cmd(&self, command: &str) -> Result<(), EngineError> {
        self.config(args(["--cmd", command])).await
    }

    async fn config(&self, mut options: Vec<String>) -> Result<(), EngineError> {
        let mut cmd = args(["config"]);
        cmd.append(&mut options);
        cmd.push(self.name.clone());
        self.buildah.exec("config", &cmd).await?;
        Ok(())
    }

    /// Commit the current state and keep working in the same container.
    ///
    /// Returns the new image id.
    pub async fn commit(&self) -> Result<String, EngineError> {
        let output = self
            .buildah
            .exec("commit", &args(["commit", "--quiet", &self.name]))
            .await?;
        Ok(output.trim().to_owned())
    }

    /// Commit the final state and release the container.
    ///
    /// Returns the new image id.
    pub async fn commit_and_remove(self) -> Result<String, EngineError> {
        let output = self
            .buildah
            .exec("commit", &args(["commit", "--quiet", "--rm", &self.name]))
            .await?;
        tracing::debug!(container = %self.name, "working container committed and removed");
        Ok(output.trim().to_owned())
    }

    /// Discard the container without committing.
    pub async fn remove(self) -> Result<(), EngineError> {
        self.buildah.exec("rm", &args(["rm", &self.name])).await?;
        tracing::debug!(container = %self.name, "working container removed");
        Ok(())
    }
}

fn path_str(path: &Path) -> Result<&str, EngineError> {
    path.to_str()
        .ok_or_else(|| EngineError::InvalidPath(path.to_path_buf()))
}

//! Per-invocation build state and the stage vocabulary.

use crate::archive::ArchiveError;
use crate::compiler::CompileError;
use botimage_core::{BuildConfig, ImageNaming, ImageRef, ManifestError, RepoInfo};
use botimage_engine::{CommandExecutor, ContainerSession, EngineError};
use chrono::NaiveDate;
use std::fmt;

/// Orchestrator states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    ResolveBase,
    JumpstartBuild,
    JumpstartReuse,
    PayloadApply,
    Trim,
    Package,
    Push,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::ResolveBase => "RESOLVE_BASE",
            Self::JumpstartBuild => "JUMPSTART_BUILD",
            Self::JumpstartReuse => "JUMPSTART_REUSE",
            Self::PayloadApply => "PAYLOAD_APPLY",
            Self::Trim => "TRIM",
            Self::Package => "PACKAGE",
            Self::Push => "PUSH",
            Self::Done => "DONE",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the jumpstart layer was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JumpstartStatus {
    /// Today's cached image was found and used
    Reused(ImageRef),
    /// Built and tagged during this session
    Built(ImageRef),
}

/// What the operator asked for.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub deployment: String,
    /// Registry path; `None` falls back to the configured default
    pub registry: Option<String>,
    pub push: bool,
    /// Calendar day keying the jumpstart cache and the date tag
    pub date: NaiveDate,
}

/// State threaded through every stage of one build.
///
/// Identity fields are fixed at `INIT`. The working container is owned here
/// until it is committed or discarded.
pub struct BuildSession<'a, E: CommandExecutor> {
    pub config: BuildConfig,
    pub repo: RepoInfo,
    pub naming: ImageNaming,
    pub date: NaiveDate,
    stage: Stage,
    container: Option<ContainerSession<'a, E>>,
}

impl<'a, E: CommandExecutor> BuildSession<'a, E> {
    pub fn new(config: BuildConfig, repo: RepoInfo, naming: ImageNaming, date: NaiveDate) -> Self {
        Self {
            config,
            repo,
            naming,
            date,
            stage: Stage::Init,
            container: None,
        }
    }

    pub fn deployment(&self) -> &str {
        self.naming.deployment()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub(crate) fn enter(&mut self, stage: Stage) {
        tracing::info!(stage = %stage, "entering stage");
        self.stage = stage;
    }

    pub(crate) fn attach(&mut self, container: ContainerSession<'a, E>) {
        self.container = Some(container);
    }

    pub(crate) fn container(&self) -> Result<&ContainerSession<'a, E>, StageError> {
        self.container.as_ref().ok_or(StageError::NoContainer)
    }

    pub(crate) fn detach(&mut self) -> Option<ContainerSession<'a, E>> {
        self.container.take()
    }
}

/// A build that stopped before `DONE`.
#[derive(Debug, thiserror::Error)]
#[error("build aborted during {stage}")]
pub struct BuildError {
    pub stage: Stage,
    pub source: StageError,
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Core(#[from] botimage_core::Error),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to create temporary directory")]
    TempDir { source: std::io::Error },

    #[error("no working container is attached to the session")]
    NoContainer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_match_state_machine() {
        assert_eq!(Stage::ResolveBase.to_string(), "RESOLVE_BASE");
        assert_eq!(Stage::JumpstartBuild.to_string(), "JUMPSTART_BUILD");
        assert_eq!(Stage::PayloadApply.to_string(), "PAYLOAD_APPLY");
    }

    #[test]
    fn build_error_names_stage() {
        let err = BuildError {
            stage: Stage::Package,
            source: StageError::NoContainer,
        };
        assert_eq!(err.to_string(), "build aborted during PACKAGE");
    }
}

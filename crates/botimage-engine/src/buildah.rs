use crate::executor::{CommandExecutor, CommandError, RealExecutor, args};
use crate::session::ContainerSession;
use botimage_core::ImageRef;
use serde::Deserialize;

const BUILDAH: &str = "buildah";

/// Container engine client, parameterized over the executor for testability.
///
/// Owns every image-store operation (lookup, tag, untag, push) and hands out
/// [`ContainerSession`]s for working-container operations.
pub struct Buildah<E: CommandExecutor = RealExecutor> {
    executor: E,
}

impl Buildah<RealExecutor> {
    pub fn new() -> Self {
        Self {
            executor: RealExecutor,
        }
    }
}

impl Default for Buildah<RealExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: CommandExecutor> Buildah<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub(crate) async fn exec(
        &self,
        action: &'static str,
        args: &[String],
    ) -> Result<String, EngineError> {
        self.executor
            .exec(BUILDAH, args)
            .await
            .map_err(|e| EngineError::Buildah { action, source: e })
    }

    pub(crate) async fn exec_streaming(
        &self,
        action: &'static str,
        args: &[String],
    ) -> Result<(), EngineError> {
        self.executor
            .exec_streaming(BUILDAH, args)
            .await
            .map_err(|e| EngineError::Buildah { action, source: e })
    }

    // ── Images ──

    /// Every name:tag reference in local storage.
    pub async fn list_images(&self) -> Result<Vec<ImageRef>, EngineError> {
        let output = self.exec("images", &args(["images", "--json"])).await?;
        let entries: Vec<ImageEntry> = parse_json_list("images", &output)?;

        Ok(entries
            .into_iter()
            .flat_map(|e| e.names.into_iter().flatten())
            .filter_map(|name| ImageRef::parse(&name))
            .collect())
    }

    /// Look up a local image reference, returning the name it is stored
    /// under.
    pub async fn find_image(&self, reference: &ImageRef) -> Result<Option<ImageRef>, EngineError> {
        let found = self
            .list_images()
            .await?
            .into_iter()
            .find(|r| r.same_image(reference));
        tracing::debug!(image = %reference, found = found.is_some(), "image lookup");
        Ok(found)
    }

    /// Untag `reference` if it exists locally.
    ///
    /// Absence is reported as [`TagRemoval::Absent`], never as an error.
    pub async fn remove_tag(&self, reference: &ImageRef) -> Result<TagRemoval, EngineError> {
        let Some(stored) = self.find_image(reference).await? else {
            return Ok(TagRemoval::Absent);
        };
        self.exec("rmi", &args(["rmi", &stored.to_string()])).await?;
        Ok(TagRemoval::Removed)
    }

    /// Apply every reference to one image in a single call.
    pub async fn tag(&self, image_id: &str, refs: &[ImageRef]) -> Result<(), EngineError> {
        if refs.is_empty() {
            return Ok(());
        }
        let mut cmd = args(["tag", image_id]);
        cmd.extend(refs.iter().map(ToString::to_string));
        self.exec("tag", &cmd).await?;
        Ok(())
    }

    pub async fn push(&self, reference: &ImageRef) -> Result<(), EngineError> {
        self.exec_streaming("push", &args(["push", &reference.to_string()])).await
    }

    /// Push each reference independently; one failure never stops the rest.
    pub async fn push_all(&self, refs: &[ImageRef]) -> PushReport {
        let mut report = PushReport::default();
        for reference in refs {
            match self.push(reference).await {
                Ok(()) => {
                    tracing::info!(image = %reference, "pushed");
                    report.pushed.push(reference.clone());
                }
                Err(e) => {
                    tracing::warn!(image = %reference, error = %e, "push failed");
                    report.failed.push(PushFailure {
                        reference: reference.clone(),
                        error: e,
                    });
                }
            }
        }
        report
    }

    // ── Containers ──

    /// Names of all working containers.
    pub async fn list_containers(&self) -> Result<Vec<String>, EngineError> {
        let output = self
            .exec("containers", &args(["containers", "--json"]))
            .await?;
        let entries: Vec<ContainerEntry> = parse_json_list("containers", &output)?;
        Ok(entries.into_iter().map(|e| e.containername).collect())
    }

    /// Start a working container named `name` from `image`.
    ///
    /// A leftover container with the same name (from an aborted run) is
    /// removed first, so the session always starts from a clean `image`.
    pub async fn open_session(
        &self,
        name: &str,
        image: &str,
    ) -> Result<ContainerSession<'_, E>, EngineError> {
        if self.list_containers().await?.iter().any(|c| c == name) {
            tracing::warn!(container = name, "removing stale working container");
            self.exec("rm", &args(["rm", name])).await?;
        }

        let output = self
            .exec("from", &args(["from", "--name", name, image]))
            .await?;
        let created = match output.trim() {
            "" => name,
            printed => printed,
        };
        tracing::info!(container = created, image, "working container created");

        Ok(ContainerSession::new(self, created.to_owned()))
    }
}

/// Outcome of [`Buildah::remove_tag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagRemoval {
    Removed,
    Absent,
}

/// Per-tag results of a push round.
#[derive(Debug, Default)]
pub struct PushReport {
    pub pushed: Vec<ImageRef>,
    pub failed: Vec<PushFailure>,
}

impl PushReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
pub struct PushFailure {
    pub reference: ImageRef,
    pub error: EngineError,
}

#[derive(Deserialize)]
struct ImageEntry {
    #[serde(default)]
    names: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ContainerEntry {
    containername: String,
}

/// buildah prints nothing or `null` instead of `[]` for empty stores.
fn parse_json_list<T: for<'de> Deserialize<'de>>(
    action: &'static str,
    output: &str,
) -> Result<Vec<T>, EngineError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let parsed: Option<Vec<T>> =
        serde_json::from_str(trimmed).map_err(|e| EngineError::Output { action, source: e })?;
    Ok(parsed.into_iter().flatten().collect())
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("buildah {action} failed")]
    Buildah {
        action: &'static str,
        source: CommandError,
    },

    #[error("failed to parse buildah {action} output")]
    Output {
        action: &'static str,
        source: serde_json::Error,
    },

    #[error("path is not valid UTF-8: {0}")]
    InvalidPath(std::path::PathBuf),
}

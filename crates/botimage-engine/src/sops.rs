//! Secrets decryption.
//!
//! Templates are rendered at build time. Encrypted env files are only
//! consumed at run time, by a service `exec` of the form
//! `sops exec-env <file> '<command>'`; the build ships them untouched.

use crate::executor::{CommandError, CommandExecutor, RealExecutor};
use std::path::{Path, PathBuf};

/// Secrets-decryption collaborator.
#[allow(async_fn_in_trait)]
pub trait SecretsDecryptor: Send + Sync {
    /// Decrypt and render the encrypted template `src` into the file `dest`.
    async fn render_template(&self, src: &Path, dest: &Path) -> Result<(), DecryptError>;
}

/// [`SecretsDecryptor`] backed by the `sops` CLI.
pub struct Sops<E: CommandExecutor = RealExecutor> {
    executor: E,
}

impl Sops<RealExecutor> {
    pub fn new() -> Self {
        Self {
            executor: RealExecutor,
        }
    }
}

impl Default for Sops<RealExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: CommandExecutor> Sops<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }
}

impl<E: CommandExecutor> SecretsDecryptor for Sops<E> {
    async fn render_template(&self, src: &Path, dest: &Path) -> Result<(), DecryptError> {
        let src_str = src
            .to_str()
            .ok_or_else(|| DecryptError::InvalidPath(src.to_path_buf()))?;
        let dest_str = dest
            .to_str()
            .ok_or_else(|| DecryptError::InvalidPath(dest.to_path_buf()))?;

        tracing::debug!(src = src_str, dest = dest_str, "decrypting template");

        self.executor
            .exec(
                "sops",
                &[
                    "--decrypt".to_owned(),
                    "--output".to_owned(),
                    dest_str.to_owned(),
                    src_str.to_owned(),
                ],
            )
            .await
            .map_err(|e| DecryptError::Decrypt {
                path: src.to_path_buf(),
                source: e,
            })?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("failed to decrypt {path}")]
    Decrypt {
        path: PathBuf,
        source: CommandError,
    },

    #[error("path is not valid UTF-8: {0}")]
    InvalidPath(PathBuf),
}

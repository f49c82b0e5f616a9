//! Container engine and secrets collaborators for botimage.
//!
//! Everything that mutates image or container state lives here:
//!
//! - [`Buildah`]: local image store (lookup, tag, untag, push) and
//!   working-container creation
//! - [`ContainerSession`]: run, add, config, commit and remove on one
//!   working container
//! - [`Sops`]: encrypted template rendering
//!
//! All of them run external commands through [`CommandExecutor`].

pub mod buildah;
pub mod executor;
pub mod session;
pub mod sops;

pub use buildah::{Buildah, EngineError, PushFailure, PushReport, TagRemoval};
pub use executor::{CommandError, CommandExecutor, RealExecutor};
pub use session::ContainerSession;
pub use sops::{DecryptError, SecretsDecryptor, Sops};

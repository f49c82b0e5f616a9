//! Core types and configuration for botimage.
//!
//! This crate defines the `botimage.toml` schema ([`BuildConfig`]), the
//! service manifest ([`Manifest`]), repository discovery ([`RepoInfo`]),
//! image naming ([`ImageNaming`]) and shared error types.

pub mod config;
pub mod error;
pub mod manifest;
pub mod naming;
pub mod repo;

pub use config::{
    BuildConfig, CommandStep, ImageConfig, JumpstartConfig, ManifestConfig, PackageConfig,
    PayloadConfig, PythonConfig, RemoteAsset, SupervisorConfig, TrimConfig,
};
pub use error::{Error, Result};
pub use manifest::{Manifest, ManifestError, ServiceName, ServiceSpec, TemplateSpec};
pub use naming::{ImageNaming, ImageRef};
pub use repo::RepoInfo;

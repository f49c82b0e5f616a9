use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid deployment name {name:?}: {reason}")]
    InvalidDeployment { name: String, reason: &'static str },

    // ── Repository discovery ──
    #[error("failed to execute git {args:?} in {dir}")]
    GitCommand {
        args: Vec<String>,
        dir: PathBuf,
        source: std::io::Error,
    },

    #[error("git {args:?} exited with {status}: {stderr}")]
    GitFailed {
        args: Vec<String>,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("git {args:?} printed nothing")]
    GitEmptyOutput { args: Vec<String> },
}

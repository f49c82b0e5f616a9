//! Service tree compilation and the incremental image build for botimage.
//!
//! # Build pipeline
//!
//! ```text
//! botimage --deployment prod
//!   1. Resolve base ── buildah images: <image>-jumpstart:<YYYY.DDD> present?
//!   2. Jumpstart    ── packages, users, fonts, helper tools (once per day)
//!   3. Payload      ── git archive HEAD + compiled svcs/ + python venv
//!   4. Trim         ── build packages and caches removed
//!   5. Package      ── commit, then tag latest / version / date / branch
//!   6. Push         ── only with --push; every tag attempted
//! ```
//!
//! # Home replacement
//!
//! The application home is emptied and refilled on every run. Entries
//! listed in `[payload] preserve` (the pyenv runtime and the venv by
//! default) are moved aside and back, never copied, so expensive
//! installs carried by the jumpstart survive.

pub mod archive;
pub mod cache;
pub mod compiler;
pub mod pipeline;
pub mod session;

pub use archive::ArchiveError;
pub use cache::find_jumpstart;
pub use compiler::{CompileError, CompiledService, CompiledTree, ManifestCompiler};
pub use pipeline::{BuildOutcome, Orchestrator};
pub use session::{BuildError, BuildRequest, BuildSession, JumpstartStatus, Stage, StageError};

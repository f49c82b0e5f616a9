mod build;

pub use build::{BuildOptions, BuildStatus, build};

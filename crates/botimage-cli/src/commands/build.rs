use botimage_build::{BuildOutcome, BuildRequest, JumpstartStatus, Orchestrator};
use botimage_engine::{Buildah, PushReport, Sops};
use std::path::PathBuf;

pub struct BuildOptions {
    pub deployment: String,
    pub registry: Option<String>,
    pub push: bool,
    pub repo: PathBuf,
}

/// How a finished build should be reported to the shell.
#[derive(Debug, PartialEq, Eq)]
pub enum BuildStatus {
    Complete,
    /// Image built and tagged, but at least one push failed
    PushIncomplete,
}

/// Build (and optionally push) the image for one deployment.
pub async fn build(options: BuildOptions) -> anyhow::Result<BuildStatus> {
    let buildah = Buildah::new();
    let sops = Sops::new();
    let orchestrator = Orchestrator::new(&buildah, &sops);

    let request = BuildRequest {
        deployment: options.deployment,
        registry: options.registry,
        push: options.push,
        date: chrono::Local::now().date_naive(),
    };
    tracing::debug!(?request, repo = %options.repo.display(), "build requested");

    println!(
        "Building {} image (repository: {})...",
        request.deployment,
        options.repo.display()
    );

    let outcome = orchestrator.run(&options.repo, &request).await?;
    print_summary(&outcome);

    match &outcome.push {
        Some(report) if !report.is_complete() => {
            print_push_failures(report);
            Ok(BuildStatus::PushIncomplete)
        }
        _ => Ok(BuildStatus::Complete),
    }
}

fn print_summary(outcome: &BuildOutcome) {
    println!();
    match &outcome.jumpstart {
        JumpstartStatus::Reused(image) => println!("Jumpstart: reused {image}"),
        JumpstartStatus::Built(image) => println!("Jumpstart: built {image}"),
    }
    println!("Image:     {}", outcome.image_id);
    println!("Tags:");
    for tag in &outcome.tags {
        println!("  {tag}");
    }

    if let Some(report) = &outcome.push {
        println!("Pushed:");
        for image in &report.pushed {
            println!("  {image}");
        }
    }
}

fn print_push_failures(report: &PushReport) {
    eprintln!();
    eprintln!(
        "Push incomplete: {} of {} failed",
        report.failed.len(),
        report.failed.len() + report.pushed.len()
    );
    for failure in &report.failed {
        eprintln!("  {}: {}", failure.reference, chain(&failure.error));
    }
}

/// `outer: inner: root` rendering of an error and its sources.
fn chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        out.push_str(": ");
        out.push_str(&e.to_string());
        source = e.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use botimage_engine::{CommandError, EngineError};

    #[test]
    fn chain_includes_command_detail() {
        let err = EngineError::Buildah {
            action: "push",
            source: CommandError::Failed {
                program: "buildah".to_owned(),
                args: vec![],
                detail: "unauthorized".to_owned(),
            },
        };
        let rendered = chain(&err);
        assert!(rendered.starts_with("buildah push failed: "), "got: {rendered}");
        assert!(rendered.contains("unauthorized"), "got: {rendered}");
    }
}

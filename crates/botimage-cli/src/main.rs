mod commands;

use clap::Parser;
use clap::error::ErrorKind;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "botimage",
    about = "Build the colorcodebot container image on top of a day-cached jumpstart layer"
)]
#[command(version)]
struct Cli {
    /// Deployment name; selects vars.<deployment>.yml and the image name
    #[arg(long, short = 'd', default_value = "dev")]
    deployment: String,

    /// Push every tag (and a freshly built jumpstart) after packaging
    #[arg(long)]
    push: bool,

    /// Registry path images are named under [default: from botimage.toml]
    #[arg(long, short = 'r')]
    registry: Option<String>,

    /// Any directory inside the application repository
    #[arg(long = "repo", short = 'C', default_value = ".")]
    repo: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                // arch-lint: allow(no-silent-result-drop) reason="an unset or malformed RUST_LOG falls back to info"
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // arch-lint: allow(no-error-swallowing) reason="stderr is the last place to report a failed usage print"
            if let Err(io) = e.print() {
                eprintln!("Error: {io}");
            }
            // Only --version is a successful early exit
            return match e.kind() {
                ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    let options = commands::BuildOptions {
        deployment: cli.deployment,
        registry: cli.registry,
        push: cli.push,
        repo: cli.repo,
    };

    match commands::build(options).await {
        Ok(commands::BuildStatus::Complete) => ExitCode::SUCCESS,
        Ok(commands::BuildStatus::PushIncomplete) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

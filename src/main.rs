use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;
use storybookify::config::ObserverConfig;
use storybookify::observe::{LogObserver, Observer};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    storybookify::logging::init().context("init logging")?;

    let cli = storybookify::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let config = ObserverConfig::from_env();
    tracing::debug!(
        log_dir = %config.log_dir.display(),
        alerts = config.telegram.is_some(),
        "observer config"
    );
    let observer: Arc<dyn Observer> =
        Arc::new(LogObserver::new(config).context("create observer")?);

    match cli.command {
        storybookify::cli::Command::Build(args) => {
            storybookify::build::run(args, observer)
                .await
                .context("build")?;
        }
        storybookify::cli::Command::Crawl(args) => {
            storybookify::crawl::run(args, observer)
                .await
                .context("crawl")?;
        }
        storybookify::cli::Command::Package(args) => {
            storybookify::build::run_package(args, observer)
                .await
                .context("package")?;
        }
        storybookify::cli::Command::Cover(args) => {
            storybookify::build::run_cover(args).context("cover")?;
        }
    }

    Ok(())
}

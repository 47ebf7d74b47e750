use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = sitewatch::cli::Cli::parse();
    sitewatch::logging::init(cli.verbose).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    sitewatch::commands::run(cli).await
}

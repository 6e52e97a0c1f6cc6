mod terminal;

use anyhow::Context;
use clap::Parser;

use kernel_term_core::telemetry::logging;
use terminal::app;
use terminal::cli::Cli;
use terminal::error::CliError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config())
        .map_err(|err| CliError::Logging(err.to_string()))
        .context("starting kernel-term")?;

    let code = app::run(cli).await.context("kernel-term failed")?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use svcfw::Config;
use svcfw::cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with_writer(std::io::stderr)
        .init();

    let registry = config.open_registry().context("opening the service registry")?;
    let mut stdout = std::io::stdout().lock();
    let result = svcfw::cli::execute(&cli, &registry, &mut stdout);
    registry.close();
    result
}

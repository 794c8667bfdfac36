use clap::Parser;
use crumb_cli::commands::Session;
use crumb_cli::config::Cli;
use crumb_logging::CrumbSubscriberBuilder;
use tracing::{debug, error};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    // Held until exit so file logs are flushed
    let _guard = CrumbSubscriberBuilder::new()
        .with_config(config.log.clone())
        .init();

    let session = Session::open(&config)?;
    let result = session.run(&cli.command);

    // Flush even when the command failed
    match session.close() {
        Ok(flushed) => debug!(flushed, "Store flushed"),
        Err(e) => error!(error = %e, "Failed to flush store"),
    }

    println!("{}", result?);
    Ok(())
}

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, Level};
use uart_bridge::{cli, config::Config, logging, server};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    if let Some(command) = cli.command {
        cli::handle_command(command)?;

        return Ok(());
    }

    logging::init(cli.log_level, cli.log_dir.map(|dir| (Level::DEBUG, dir))).await;

    let config = if let Some(config_path) = cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };
    config.validate()?;

    let server::Bridge { reactor, link } = server::open(&config)?;
    let outcome = server::spawn(reactor)?;

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting");
            Ok(())
        }
        _ = hangup.recv() => {
            info!("Told to hang up, quitting");
            Ok(())
        }
        _ = terminate.recv() => {
            info!("Terminated, quitting");
            Ok(())
        }
        outcome = outcome => {
            match outcome {
                Ok(Err(e)) => Err(e.into()),
                Ok(Ok(())) => Err(eyre!("Event loop stopped unexpectedly")),
                Err(_) => {
                    error!("Event loop thread went away");
                    Err(eyre!("Event loop thread went away"))
                }
            }
        }
    };

    // Removes the pseudo-terminal link.
    drop(link);

    result
}

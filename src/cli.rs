use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{config::Config, error::Error, serial};

/// The command line interface for the bridge.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Log level on stdout
    #[arg(long, default_value = "info")]
    pub log_level: Level,

    /// Also log to daily rotated files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),

    /// List the serial ports found on this machine.
    Ports,
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,
}

/// Run a subcommand to completion.
pub fn handle_command(command: Commands) -> Result<(), Error> {
    match command {
        Commands::Examples(Examples::Config) => {
            println!("{}", Config::example().serialize_pretty()?);
        }
        Commands::Ports => {
            let ports = serial::available()?;
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{}\t{:?}", port.port_name, port.port_type);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_config_and_log_options() {
        let cli = Cli::try_parse_from([
            "uart-bridge",
            "bridge.ron",
            "--log-level",
            "debug",
            "--log-dir",
            "/var/log/uart-bridge",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("bridge.ron")));
        assert_eq!(cli.log_level, Level::DEBUG);
        assert_eq!(cli.log_dir, Some(PathBuf::from("/var/log/uart-bridge")));
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_examples_subcommand() {
        let cli = Cli::try_parse_from(["uart-bridge", "examples", "config"]).unwrap();

        assert!(matches!(
            cli.command,
            Some(Commands::Examples(Examples::Config))
        ));
    }
}

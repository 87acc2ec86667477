pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Download media from a link and forward it to a chat", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also append logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the authenticated download endpoint
    Intake {
        /// Override the bind address, e.g. 0.0.0.0:8000
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Consume download tasks and publish results
    Fetch,

    /// Consume results and forward them to their chats
    Deliver,

    /// Run all three stages in one process
    Standalone,

    /// Queue a download task directly, bypassing the HTTP endpoint
    Submit {
        /// Link to the media page
        #[arg(required = true)]
        url: String,

        /// Chat that receives the media
        #[arg(required = true)]
        destination: String,
    },

    /// List the muxed renditions of a link and the one that would be picked
    Formats {
        /// Link to the media page
        #[arg(required = true)]
        url: String,
    },

    /// Show how many items wait in each lane
    Status,

    /// Show the active configuration
    Config {
        /// Write the default configuration file
        #[arg(short, long)]
        init: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Intake { bind } => {
            info!("Starting intake stage");
            commands::intake(config_path, bind).await
        }
        Commands::Fetch => {
            info!("Starting fetch stage");
            commands::fetch(config_path).await
        }
        Commands::Deliver => {
            info!("Starting delivery stage");
            commands::deliver(config_path).await
        }
        Commands::Standalone => {
            info!("Starting all stages in one process");
            commands::standalone(config_path).await
        }
        Commands::Submit { url, destination } => {
            info!("Submitting {} for chat {}", url, destination);
            commands::submit(config_path, url, destination).await
        }
        Commands::Formats { url } => commands::formats(config_path, url).await,
        Commands::Status => commands::status(config_path).await,
        Commands::Config { init } => {
            if init {
                info!("Writing default configuration");
                commands::init_config().await
            } else {
                commands::show_config(config_path).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["courier", "fetch", "--verbose", "--config", "c.yaml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("c.yaml")));
        assert!(matches!(cli.command, Commands::Fetch));
    }

    #[test]
    fn test_submit_requires_destination() {
        assert!(Cli::try_parse_from(["courier", "submit", "https://example.com/v"]).is_err());

        let cli = Cli::try_parse_from(["courier", "submit", "https://example.com/v", "42"]).unwrap();
        match cli.command {
            Commands::Submit { url, destination } => {
                assert_eq!(url, "https://example.com/v");
                assert_eq!(destination, "42");
            }
            _ => panic!("expected submit"),
        }
    }
}

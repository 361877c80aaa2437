//! CLI command handling for warden

use crate::gateway::run_gateway;
use crate::setup::{run_setup, SetupReport};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use warden_config::logging::{self, GATEWAY_LOG_FILE};
use warden_config::{AppConfig, ConfigDir};
use warden_proxy::SupervisorOptions;

/// The main CLI struct.
#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "MCP gateway exposing only the tools you authorize")]
#[command(version)]
pub struct Cli {
    /// Configuration root holding config.json, controls.json and logs
    #[arg(long, global = true, env = "CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// The command to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// The available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway as an MCP server on stdio
    Start,
    /// Bootstrap the configuration root from an MCP client configuration
    Setup {
        /// MCP client configuration to take providers from; it is rewritten to
        /// launch warden instead
        client_config: Option<PathBuf>,
        /// Executable the client should launch (defaults to this binary)
        gateway_command: Option<PathBuf>,
    },
}

/// Main CLI entry point
pub async fn run() {
    let cli = Cli::parse();
    let config_dir = ConfigDir::new(cli.config_dir.unwrap_or_else(ConfigDir::default_root));

    let config = match AppConfig::load(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Start => {
            let log_file = config
                .logging
                .file
                .then(|| config_dir.log_dir().join(GATEWAY_LOG_FILE));
            if let Err(e) = logging::initialize(&config.logging, log_file.as_deref()) {
                eprintln!("Error: failed to initialize logging: {}", e);
                process::exit(1);
            }

            if let Err(e) = run_gateway(config_dir, config).await {
                tracing::error!(error = %format!("{:#}", e), "Gateway failed");
                process::exit(1);
            }
            // After an interrupt, stdin can still be blocked in a read that the
            // runtime cannot cancel, which would stall its shutdown.
            process::exit(0);
        }
        Commands::Setup {
            client_config,
            gateway_command,
        } => {
            // Discovery diagnostics only; setup reports its outcome on stdout
            if let Err(e) = logging::initialize(&config.logging, None) {
                eprintln!("Error: failed to initialize logging: {}", e);
                process::exit(1);
            }

            let options = SupervisorOptions::new(&config_dir, &config);
            match run_setup(
                &config_dir,
                options,
                client_config.as_deref(),
                gateway_command.as_deref(),
            )
            .await
            {
                Ok(report) => print_report(&config_dir, &report),
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    process::exit(1);
                }
            }
        }
    }
}

fn print_report(config_dir: &ConfigDir, report: &SetupReport) {
    match &report.client_config {
        Some(path) => {
            println!(
                "Copied providers from {} to {}",
                path.display(),
                config_dir.provider_document_path().display()
            );
            println!("Rewrote {} to launch warden", path.display());
        }
        None => println!(
            "Provider document left as is: {}",
            config_dir.provider_document_path().display()
        ),
    }

    match &report.authorized {
        Some(authorized) => {
            println!(
                "Wrote {} authorizing every discovered tool:",
                config_dir.policy_document_path().display()
            );
            for (provider_id, tools) in authorized {
                println!("  {}: {}", provider_id, tools.join(", "));
            }
        }
        None => println!(
            "Authorization policy left as is: {}",
            config_dir.policy_document_path().display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_setup_arguments_are_positional() {
        let cli = Cli::try_parse_from(["warden", "setup", "client.json", "/usr/bin/warden"]).unwrap();
        match cli.command {
            Commands::Setup {
                client_config,
                gateway_command,
            } => {
                assert_eq!(client_config, Some(PathBuf::from("client.json")));
                assert_eq!(gateway_command, Some(PathBuf::from("/usr/bin/warden")));
            }
            Commands::Start => panic!("expected setup"),
        }
    }

    #[test]
    fn test_config_dir_flag_is_global() {
        let cli = Cli::try_parse_from(["warden", "start", "--config-dir", "/tmp/warden"]).unwrap();
        assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/warden")));
        assert!(matches!(cli.command, Commands::Start));
    }
}

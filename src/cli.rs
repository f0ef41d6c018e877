//! Command-line surface.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::workflow::RunArgs;
use crate::workflows::{deploy_wireguard_workflow, status_workflow};

#[derive(Parser)]
#[command(name = "wgfleet")]
#[command(about = "Provision and inspect WireGuard VPN servers across an SSH fleet")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report uptime and WireGuard peer state for every fleet host
    Status {
        /// Path to the fleet configuration file
        vpn_yaml: PathBuf,

        /// Restrict the run to a single host
        #[arg(long)]
        hostname: Option<String>,
    },

    /// Render, upload, and activate WireGuard server configs on the fleet
    #[command(name = "deploy-wg", alias = "deploy_wg")]
    DeployWg {
        /// Path to the fleet configuration file
        vpn_yaml: PathBuf,

        /// Restrict the run to a single host
        #[arg(long)]
        hostname: Option<String>,

        /// Also print client configurations and QR codes after deploying
        #[arg(long)]
        clients: bool,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status { vpn_yaml, hostname } => {
            let workflow = status_workflow()?;
            workflow
                .run(
                    None,
                    RunArgs {
                        vpn_yaml: Some(vpn_yaml),
                        hostname,
                    },
                )
                .await?;
        }
        Commands::DeployWg {
            vpn_yaml,
            hostname,
            clients,
        } => {
            let workflow = deploy_wireguard_workflow(clients)?;
            workflow
                .run(
                    None,
                    RunArgs {
                        vpn_yaml: Some(vpn_yaml),
                        hostname,
                    },
                )
                .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn deploy_wg_accepts_legacy_spelling() {
        let cli = Cli::try_parse_from(["wgfleet", "deploy_wg", "fleet.yaml", "--clients"]).unwrap();
        match cli.command {
            Commands::DeployWg { clients, .. } => assert!(clients),
            _ => panic!("expected deploy-wg"),
        }
    }

    #[test]
    fn status_takes_config_path_and_filter() {
        let cli = Cli::try_parse_from([
            "wgfleet",
            "status",
            "fleet.yaml",
            "--hostname",
            "vpn1.example.com",
        ])
        .unwrap();
        match cli.command {
            Commands::Status { vpn_yaml, hostname } => {
                assert_eq!(vpn_yaml, PathBuf::from("fleet.yaml"));
                assert_eq!(hostname.as_deref(), Some("vpn1.example.com"));
            }
            _ => panic!("expected status"),
        }
    }
}

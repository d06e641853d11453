// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pixeldrop CLI
//!
//! Command-line interface for Pixeldrop - proximity drawing exchange.
//! Runs exchanges between simulated devices and inspects captured payloads.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use pixeldrop_core::{ExchangeConfig, PairingMethod};

#[derive(Parser)]
#[command(name = "pixeldrop")]
#[command(version, about = "Proximity drawing exchange")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a dual-mode exchange between two simulated devices
    Simulate {
        /// Pairing method (defaults to PIXELDROP_PAIRING_METHOD or numeric)
        #[arg(long, value_enum)]
        method: Option<MethodArg>,

        /// Title of the first device's drawing
        #[arg(long, default_value = "Hello")]
        title: String,

        /// Title of the second device's drawing
        #[arg(long, default_value = "Sunset")]
        peer_title: String,

        /// Type a wrong passkey on the initiating side
        #[arg(long)]
        wrong_passkey: bool,

        /// Skip interactive pairing
        #[arg(long)]
        no_pairing: bool,

        /// Seconds to wait for both artifacts
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },

    /// Decrypt a captured attribute value
    Inspect {
        /// Base64 blob as written to the artifact attribute
        blob: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MethodArg {
    Numeric,
    Passkey,
}

impl From<MethodArg> for PairingMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Numeric => PairingMethod::NumericComparison,
            MethodArg::Passkey => PairingMethod::PasskeyEntry,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pixeldrop_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = ExchangeConfig::from_env()?;

    match cli.command {
        Commands::Simulate {
            method,
            title,
            peer_title,
            wrong_passkey,
            no_pairing,
            wait,
        } => {
            let mut config = config.with_pairing_required(!no_pairing);
            if let Some(method) = method {
                config = config.with_pairing_method(method.into());
            }
            let options = commands::simulate::SimulateOptions {
                title,
                peer_title,
                wrong_passkey,
                wait: std::time::Duration::from_secs(wait),
            };
            commands::simulate::run(config, options).await?;
        }
        Commands::Inspect { blob } => {
            commands::inspect::run(&config, &blob)?;
        }
    }

    Ok(())
}

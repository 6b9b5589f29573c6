// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "gst-capture-ring")]
#[command(about = "Pull the latest camera frame from a GStreamer pipeline")]
#[command(version)]
#[command(subcommand_required = false)]
struct Cli {
    /// Configuration file (default: <config dir>/gst-capture-ring/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture frames and print what the consumer receives (default)
    Run(cli::RunArgs),

    /// Print the effective configuration as JSON
    Config {
        #[command(flatten)]
        overrides: cli::Overrides,

        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise -v/-vv raise the default "warn"
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    match cli.command {
        Some(Commands::Config { overrides, save }) => {
            let config = cli::effective_config(cli.config.as_deref(), &overrides)?;
            let save_to = if save {
                Some(
                    cli.config
                        .or_else(gst_capture_ring::Config::default_path)
                        .ok_or("no configuration directory on this platform")?,
                )
            } else {
                None
            };
            cli::show_config(&config, save_to)
        }
        Some(Commands::Run(args)) => {
            let config = cli::effective_config(cli.config.as_deref(), &args.overrides)?;
            cli::run(config, args)
        }
        None => {
            let args = cli::RunArgs::default();
            let config = cli::effective_config(cli.config.as_deref(), &args.overrides)?;
            cli::run(config, args)
        }
    }
}

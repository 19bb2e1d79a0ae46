//! canopyd: serve a site at the edge and release new versions of it.
//!
//! # Usage
//!
//! ```text
//! canopyd init --name shop --domain d111.example.net
//! canopyd serve
//! canopyd release --code-ref 127.0.0.1:3001
//! canopyd resolve /_static/app.js
//! canopyd deployments --json
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "canopyd", about = "Canopy edge daemon", version, propagate_version = true)]
struct Cli {
    /// Path to canopy.toml.
    #[arg(long, global = true, default_value = "canopy.toml")]
    config: PathBuf,

    /// Directory holding the state store.
    #[arg(long, global = true, default_value = ".canopy")]
    data_dir: PathBuf,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter canopy.toml.
    Init {
        #[arg(long)]
        name: String,
        /// Public address published after each release.
        #[arg(long)]
        domain: String,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Serve the site from the last released state until Ctrl-C.
    Serve,
    /// Build and upload assets, then roll out a new compute version.
    ///
    /// Ctrl-C during the canary rolls it back.
    Release {
        /// Address of the compute unit running the new version.
        #[arg(long)]
        code_ref: String,
        /// Do not serve traffic while the canary bakes.
        #[arg(long)]
        no_serve: bool,
    },
    /// Show which route and cache policy a path resolves to.
    Resolve { path: String },
    /// Print the published endpoint.
    Endpoint,
    /// List finished deployments, newest first.
    Deployments {
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,canopyd=debug,canopy=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Init {
            name,
            domain,
            force,
        } => commands::init(&cli.config, &name, &domain, force),
        Command::Serve => commands::serve::run(&cli.config, &cli.data_dir).await,
        Command::Release { code_ref, no_serve } => {
            commands::release::run(&cli.config, &cli.data_dir, &code_ref, !no_serve).await
        }
        Command::Resolve { path } => commands::inspect::resolve(&cli.config, &cli.data_dir, &path),
        Command::Endpoint => commands::inspect::endpoint(&cli.config, &cli.data_dir),
        Command::Deployments { json } => {
            commands::inspect::deployments(&cli.config, &cli.data_dir, json)
        }
    }
}

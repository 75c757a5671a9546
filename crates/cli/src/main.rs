//! NODU CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: Write a default config file
//! - `gateway`: Start the HTTP API server
//! - `doctor`: Diagnose config, store and provider
//! - `user add`: Create an account from the terminal
//! - `personas`: List the available tutors

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "nodu",
    about = "NODU — AI tutoring chat server",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    Onboard,

    /// Start the HTTP gateway server
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Diagnose system health
    Doctor,

    /// Manage accounts
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// List the available tutors
    Personas {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create an account
    Add {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        email: String,

        /// Password; read from NODU_USER_PASSWORD when omitted
        #[arg(short, long, env = "NODU_USER_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Gateway { port } => commands::gateway::run(port).await?,
        Commands::Doctor => commands::doctor::run().await?,
        Commands::User {
            action:
                UserAction::Add {
                    username,
                    email,
                    password,
                },
        } => commands::user::add(username, email, password).await?,
        Commands::Personas { json } => commands::personas::run(json)?,
    }

    Ok(())
}

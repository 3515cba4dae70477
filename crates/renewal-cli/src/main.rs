mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::subscription::SubscriptionSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "renewal",
    about = "Durable subscription renewal reminders: trigger, inspect and drive workflow runs",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .renewal/)
    #[arg(long, global = true, env = "RENEWAL_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP trigger boundary and the background scheduler
    Serve {
        #[arg(long, default_value = "3141")]
        port: u16,
    },

    /// Start a reminder run for a subscription
    Trigger { subscription_id: String },

    /// Resume every run whose wakeup is due
    Tick {
        /// Evaluate as of this time (RFC 3339) instead of now
        #[arg(long)]
        at: Option<String>,
    },

    /// Show the run for a subscription
    Status { subscription_id: String },

    /// List all runs
    Runs,

    /// Request abort of a subscription's active run
    Cancel { subscription_id: String },

    /// Manage subscription records
    Subscription {
        #[command(subcommand)]
        subcommand: SubscriptionSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::Trigger { subscription_id } => {
            cmd::run::trigger(&root, &subscription_id, cli.json)
        }
        Commands::Tick { at } => cmd::run::tick(&root, at.as_deref(), cli.json),
        Commands::Status { subscription_id } => cmd::run::status(&root, &subscription_id, cli.json),
        Commands::Runs => cmd::run::list(&root, cli.json),
        Commands::Cancel { subscription_id } => cmd::run::cancel(&root, &subscription_id, cli.json),
        Commands::Subscription { subcommand } => {
            cmd::subscription::run(&root, subcommand, cli.json)
        }
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

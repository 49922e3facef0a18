use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod reminders_cmd;
mod sinks;
mod state;
mod task_file;

use config::{Config, load_config};
use reminders_cmd::LedgerCommand;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("DUEBELL_BUILD_SHA"), ")");

#[derive(Parser, Debug)]
#[command(name = "duebell", version = VERSION, about = "Due-date reminders for your to-do list")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the task file and deliver reminders until Ctrl-C
    Run {
        /// Task list JSON (default: config [tasks].path or ~/.duebell/tasks.json)
        #[arg(long)]
        tasks: Option<PathBuf>,

        /// Ledger session (default: config [session].user_id)
        #[arg(long)]
        session: Option<String>,
    },

    /// Evaluate reminders once and deliver whatever is due
    Check {
        #[arg(long)]
        tasks: Option<PathBuf>,

        /// Evaluate at this instant instead of now (RFC3339)
        #[arg(long)]
        at: Option<String>,

        /// List due reminders without delivering or recording them
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        #[arg(long)]
        session: Option<String>,
    },

    /// Inspect or reset the fired-reminder ledger
    Ledger {
        #[command(subcommand)]
        command: LedgerCommand,
    },

    /// Request notification permission and send a welcome notification
    NotifyTest,

    /// Manage ~/.duebell/config.toml
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write a default config if none exists
    Init,
    /// Print the effective config
    Show,
}

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("duebell=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config()?;
    init_tracing(&cfg);

    match cli.command {
        Command::Run { tasks, session } => {
            reminders_cmd::run(&cfg, tasks, session).await?;
        }
        Command::Check {
            tasks,
            at,
            dry_run,
            session,
        } => {
            reminders_cmd::check(&cfg, tasks, at, dry_run, session)?;
        }
        Command::Ledger { command } => {
            reminders_cmd::ledger(&cfg, command)?;
        }
        Command::NotifyTest => {
            reminders_cmd::notify_test(&cfg)?;
        }
        Command::Config { command } => match command {
            ConfigCommand::Init => config::init_config()?,
            ConfigCommand::Show => config::show_config()?,
        },
    }

    Ok(())
}

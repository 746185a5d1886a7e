//! # Courier — Active-Hours Message Scheduler
//!
//! Simulated message delivery gated by per-user active-hours windows, plus
//! time-elapsed behavior rules (nudge, reminder, follow-up) evaluated on
//! demand.
//!
//! Usage:
//!   courier serve                                # Start the HTTP gateway
//!   courier seed                                 # Seed the sandbox users
//!   courier send --from user_us --to user_ng "hello"
//!   courier schedule --from user_us --to user_ng --at "2026-03-01T15:00" "later"
//!   courier status <message-id>
//!   courier evaluate <message-id>
//!   courier users

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use courier_core::config::CourierConfig;
use courier_gateway::AppState;
use courier_scheduler::store::seed_sandbox;
use courier_scheduler::CourierDb;

#[derive(Parser)]
#[command(
    name = "courier",
    version,
    about = "📨 Courier — active-hours message scheduler"
)]
struct Cli {
    /// Config file path (default: ~/.courier/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway server
    Serve,
    /// Seed the three sandbox users and their windows
    Seed,
    /// Send a message now
    Send {
        #[arg(long = "from")]
        sender: String,
        #[arg(long = "to")]
        receiver: String,
        content: String,
    },
    /// Schedule a message for a sender-local wall-clock time
    Schedule {
        #[arg(long = "from")]
        sender: String,
        #[arg(long = "to")]
        receiver: String,
        /// Wall-clock time in the sender's timezone, e.g. "2026-03-01T15:00"
        #[arg(long)]
        at: String,
        content: String,
    },
    /// Show a message's computed status
    Status { message_id: String },
    /// Run one rule-evaluation pass over a message
    Evaluate {
        message_id: String,
        /// Evaluation instant override, RFC 3339 UTC (default: now)
        #[arg(long)]
        at: Option<String>,
    },
    /// List known users with their timezones and windows
    Users,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "courier=debug,courier_scheduler=debug,courier_gateway=debug,tower_http=debug"
    } else {
        "courier=info,courier_scheduler=info,courier_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => CourierConfig::load_from(std::path::Path::new(path))?,
        None => CourierConfig::load()?,
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => courier_gateway::start(&config).await,
        command => run_local(&config, command),
    }
}

/// CLI operations share the gateway's wiring, just without the HTTP layer.
fn run_local(config: &CourierConfig, command: Command) -> Result<()> {
    let db_path = config.storage.resolved_db_path();
    let db = Arc::new(CourierDb::open(&db_path)?);
    let state = AppState::from_parts(config, db);

    match command {
        Command::Serve => unreachable!("handled by the async path"),
        Command::Seed => {
            seed_sandbox(&*state.directory, &*state.active_hours)?;
            println!("🌱 Sandbox seeded: user_ng, user_us, user_sa");
        }
        Command::Send {
            sender,
            receiver,
            content,
        } => {
            let record = state
                .scheduler
                .send_now(&sender, &receiver, &content, Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Schedule {
            sender,
            receiver,
            at,
            content,
        } => {
            let record = state
                .scheduler
                .schedule(&sender, &receiver, &content, &at, Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Status { message_id } => {
            let view = state.scheduler.message_status(&message_id)?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Evaluate { message_id, at } => {
            let now = match at {
                Some(s) => DateTime::parse_from_rfc3339(&s)
                    .map(|d| d.with_timezone(&Utc))
                    .map_err(|e| anyhow::anyhow!("invalid --at timestamp: {e}"))?,
                None => Utc::now(),
            };
            let evaluation = state.evaluator.evaluate_message(&message_id, now)?;
            println!("{}", serde_json::to_string_pretty(&evaluation)?);
        }
        Command::Users => {
            let users = state.directory.list_users();
            if users.is_empty() {
                println!("No users yet — run `courier seed` to create the sandbox.");
            }
            for (user_id, timezone) in users {
                match state.active_hours.get(&user_id) {
                    Some(h) => println!(
                        "{user_id}  {timezone}  [{:02}:00, {:02}:00)",
                        h.start_hour, h.end_hour
                    ),
                    None => println!("{user_id}  {timezone}  (no window)"),
                }
            }
        }
    }
    Ok(())
}

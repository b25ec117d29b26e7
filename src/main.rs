//! copymirror: mirrors open trades from provider accounts onto receiver
//! accounts, with configurable sizing, symbol translation, and filtering.

mod copier;
mod db;
mod error;
mod events;
mod models;
mod policy;
mod venue;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::copier::CopyEngine;
use crate::db::{Database, NewAccount};
use crate::models::AccountRole;
use crate::venue::SimVenue;

/// Deadline for any single venue call.
const VENUE_TIMEOUT: Duration = Duration::from_secs(60);

/// Trade copier CLI.
#[derive(Parser)]
#[command(name = "copymirror")]
#[command(about = "Mirror trades from provider accounts onto receiver accounts", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(
        short,
        long,
        env = "COPYMIRROR_DATABASE",
        default_value = "sqlite:copymirror.db?mode=rwc"
    )]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the copy engine until Ctrl+C
    Run {
        /// Override the polling interval in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,
    },

    /// Show copy statistics and account summary
    Status,

    /// List registered accounts
    Accounts,

    /// Register an account
    AddAccount {
        /// Venue login number
        login: i64,

        /// Venue server name
        server: String,

        /// Role: provider or receiver
        role: String,

        /// Broker name, used by symbol mapping lookups
        #[arg(short, long, default_value = "")]
        broker: String,

        /// Display name
        #[arg(short, long, default_value = "")]
        name: String,

        /// Account balance, used by ratio/risk sizing
        #[arg(long, default_value = "0")]
        balance: f64,
    },

    /// Enable or disable an account
    ToggleAccount {
        /// Account id
        id: i64,
    },

    /// Remove an account
    RemoveAccount {
        /// Account id
        id: i64,
    },

    /// Update an account balance (consulted by ratio/risk sizing)
    SetBalance {
        /// Account id
        id: i64,

        /// New balance
        balance: f64,
    },

    /// Show all settings
    Settings,

    /// Update one setting
    Set { key: String, value: String },

    /// List symbol mappings
    Mappings,

    /// Add a symbol mapping
    AddMapping {
        provider_symbol: String,
        receiver_symbol: String,

        /// Receiver broker this mapping applies to; empty matches any
        #[arg(short, long, default_value = "")]
        broker: String,
    },

    /// Remove a symbol mapping
    RemoveMapping {
        /// Mapping id
        id: i64,
    },

    /// Show recent copied trades
    History {
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let db = Database::connect(&cli.database).await?;

    match cli.command {
        Commands::Run { interval_ms } => {
            if let Some(ms) = interval_ms {
                db.update_setting("copy_interval", &ms.to_string()).await?;
            }

            let providers = db.enabled_providers().await?;
            let receivers = db.enabled_receivers().await?;
            if providers.is_empty() || receivers.is_empty() {
                println!(
                    "Need at least one enabled provider and one enabled receiver. \
                     Use 'copymirror add-account' first."
                );
                return Ok(());
            }

            let venue = Arc::new(SimVenue::new());
            let engine = CopyEngine::new(db.clone(), venue, VENUE_TIMEOUT);

            // Stand-in for the dashboard: log the event stream as JSON
            let mut rx = engine.subscribe();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                info!(event = %json, "engine event");
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });

            engine.start().await?;

            println!("\n=== copymirror ===");
            println!("Providers: {}", providers.len());
            println!("Receivers: {}", receivers.len());
            println!("\nPress Ctrl+C to stop.\n");

            tokio::signal::ctrl_c().await?;
            println!("\nStopping...");
            engine.stop().await;

            let status = engine.status().await;
            if let Some(at) = status.last_tick_at {
                println!("Last tick: {}", at.to_rfc3339());
            }
            if let Some(err) = status.last_error {
                println!("Last error: {err}");
            }
        }

        Commands::Status => {
            let stats = db.copy_stats().await?;
            let accounts = db.accounts().await?;

            println!("\n=== Copy Statistics ===");
            println!("Total copied:  {}", stats.total_copied);
            println!("Total volume:  {:.2} lots", stats.total_volume);
            println!(
                "Last copy at:  {}",
                stats.last_copied_at.as_deref().unwrap_or("never")
            );

            println!("\n=== Accounts ===");
            println!(
                "{:<4} {:<10} {:<20} {:<9} {:<8} {:>12}",
                "ID", "LOGIN", "NAME", "ROLE", "ENABLED", "BALANCE"
            );
            for a in accounts {
                println!(
                    "{:<4} {:<10} {:<20} {:<9} {:<8} {:>12.2}",
                    a.id,
                    a.login,
                    a.name,
                    a.role.as_str(),
                    a.enabled,
                    a.balance
                );
            }
        }

        Commands::Accounts => {
            let accounts = db.accounts().await?;
            if accounts.is_empty() {
                println!("No accounts registered. Use 'copymirror add-account'.");
                return Ok(());
            }
            println!(
                "{:<4} {:<10} {:<20} {:<16} {:<9} {:<8}",
                "ID", "LOGIN", "NAME", "SERVER", "ROLE", "ENABLED"
            );
            for a in accounts {
                println!(
                    "{:<4} {:<10} {:<20} {:<16} {:<9} {:<8}",
                    a.id,
                    a.login,
                    a.name,
                    a.server,
                    a.role.as_str(),
                    a.enabled
                );
            }
        }

        Commands::AddAccount {
            login,
            server,
            role,
            broker,
            name,
            balance,
        } => {
            let Some(role) = AccountRole::parse(&role) else {
                bail!("role must be 'provider' or 'receiver', got {role:?}");
            };
            let name = if name.is_empty() {
                format!("Account {login}")
            } else {
                name
            };
            let id = db
                .add_account(&NewAccount {
                    login,
                    server,
                    broker,
                    name: name.clone(),
                    role,
                    balance: Decimal::try_from(balance)?,
                })
                .await?;
            println!("Added {} '{}' with id {}", role.as_str(), name, id);
        }

        Commands::ToggleAccount { id } => {
            let Some(account) = db.account(id).await? else {
                bail!("no account with id {id}");
            };
            db.set_account_enabled(id, !account.enabled).await?;
            println!(
                "Account {} is now {}",
                id,
                if account.enabled { "disabled" } else { "enabled" }
            );
        }

        Commands::RemoveAccount { id } => {
            db.delete_account(id).await?;
            println!("Removed account {id}");
        }

        Commands::SetBalance { id, balance } => {
            if db.account(id).await?.is_none() {
                bail!("no account with id {id}");
            }
            db.update_balance(id, Decimal::try_from(balance)?).await?;
            println!("Account {id} balance set to {balance:.2}");
        }

        Commands::Settings => {
            let settings = db.settings().await?;
            let mut keys: Vec<_> = settings.keys().collect();
            keys.sort();
            for key in keys {
                println!("{:<26} {}", key, settings[key]);
            }
        }

        Commands::Set { key, value } => {
            policy::validate_setting(&key, &value)?;
            db.update_setting(&key, &value).await?;
            println!("{key} = {value}");
        }

        Commands::Mappings => {
            let mappings = db.symbol_mappings().await?;
            if mappings.is_empty() {
                println!("No symbol mappings. Prefix/suffix settings apply to all symbols.");
                return Ok(());
            }
            println!(
                "{:<4} {:<12} {:<12} {:<16}",
                "ID", "PROVIDER", "RECEIVER", "BROKER"
            );
            for m in mappings {
                let broker = if m.broker_name.is_empty() {
                    "(any)"
                } else {
                    &m.broker_name
                };
                println!(
                    "{:<4} {:<12} {:<12} {:<16}",
                    m.id, m.provider_symbol, m.receiver_symbol, broker
                );
            }
        }

        Commands::AddMapping {
            provider_symbol,
            receiver_symbol,
            broker,
        } => {
            let id = db
                .add_symbol_mapping(&provider_symbol, &receiver_symbol, &broker)
                .await?;
            println!("Mapping {id}: {provider_symbol} -> {receiver_symbol}");
        }

        Commands::RemoveMapping { id } => {
            db.delete_symbol_mapping(id).await?;
            println!("Removed mapping {id}");
        }

        Commands::History { limit } => {
            let rows = db.recent_copies(limit).await?;
            if rows.is_empty() {
                println!("No copied trades yet.");
                return Ok(());
            }
            println!(
                "{:<4} {:<22} {:<12} {:<12} {:<10} {:<10} {:>8} {:>10} {:>10} {:<8}",
                "ID", "TIME", "PROVIDER", "RECEIVER", "SYMBOL", "DIRECTION", "VOLUME",
                "SRC TKT", "DST TKT", "OUTCOME"
            );
            for row in rows {
                println!(
                    "{:<4} {:<22} {:<12} {:<12} {:<10} {:<10} {:>8.2} {:>10} {:>10} {:<8}",
                    row.id,
                    &row.timestamp[..row.timestamp.len().min(19)],
                    row.provider_account,
                    row.receiver_account,
                    row.symbol,
                    row.direction,
                    row.volume,
                    row.provider_ticket,
                    row.receiver_ticket,
                    row.outcome
                );
            }
        }
    }

    Ok(())
}

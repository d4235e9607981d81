use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use fieldledger_lib::{
    logging, migrate, LedgerConfig, Ledger, Money, Record, RecordKind,
};

#[derive(Parser)]
#[command(name = "ledgerctl", about = "Field ledger operator tool")]
struct Cli {
    /// Optional JSON config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Database path; overrides config and environment
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create or upgrade the database schema
    Migrate,
    /// Record counts by kind and sync status
    Status,
    /// Per-group totals of unsynced records
    Summary,
    /// List pending and failed records
    Unsynced {
        /// Restrict to one record kind (e.g. collection, advance_loan)
        #[arg(long)]
        kind: Option<RecordKind>,
    },
    /// Split an advance repayment without touching the database
    Split {
        #[arg(long)]
        balance: f64,
        #[arg(long)]
        payment: f64,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open(config: &LedgerConfig) -> Result<Ledger> {
    Ledger::open(config.clone())
        .await
        .with_context(|| format!("open ledger at {}", config.db_path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = LedgerConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    let _log_guard = logging::init(&config.log)?;

    match cli.cmd {
        Cmd::Migrate => {
            let ledger = open(&config).await?;
            let applied = migrate::applied_versions(ledger.pool()).await?;
            print_json(&serde_json::json!({
                "db": config.db_path.display().to_string(),
                "applied": applied,
            }))
        }
        Cmd::Status => {
            let ledger = open(&config).await?;
            print_json(&ledger.count_by_status().await?)
        }
        Cmd::Summary => {
            let ledger = open(&config).await?;
            print_json(&ledger.summarize_groups().await?)
        }
        Cmd::Unsynced { kind } => {
            let ledger = open(&config).await?;
            let kinds: Vec<RecordKind> = match kind {
                Some(kind) => vec![kind],
                None => RecordKind::iter().collect(),
            };
            let mut records: Vec<Record> = Vec::new();
            for kind in kinds {
                records.extend(ledger.get_unsynced_records(kind).await?);
            }
            print_json(&records)
        }
        Cmd::Split { balance, payment } => {
            let split = fieldledger_lib::advance::split_with_terms(
                Money::from_major(balance),
                Money::from_major(payment),
                &config.split_terms(),
            );
            print_json(&split)
        }
    }
}

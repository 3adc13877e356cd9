//! Keeper CLI - Receipt capture, extraction and backup
//!
//! Usage:
//!   keeper init                                  Create database and directories
//!   keeper ingest --image IMG --ocr TEXT         Store and queue a receipt
//!   keeper scan                                  Adopt images already on disk
//!   keeper queue drain                           Upload queued images
//!   keeper watch                                 Keep uploading until Ctrl-C

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    run(cli).await
}

/// Dispatch one parsed command line
async fn run(cli: Cli) -> Result<()> {
    // Only commands that touch the store open it; extract needs none
    let Cli {
        config, db, command, ..
    } = cli;
    let open = || -> Result<commands::App> {
        commands::App::open(commands::load_config(config.as_deref(), db.as_deref())?)
    };

    match command {
        Commands::Init => commands::cmd_init(&open()?),
        Commands::Ingest { image, ocr, card } => {
            commands::cmd_ingest(&open()?, &image, ocr.as_deref(), card).await
        }
        Commands::Extract { file, json } => commands::cmd_extract(&file, json),
        Commands::Scan { root } => commands::cmd_scan(&open()?, root.as_deref()),
        Commands::Receipts { action } => match action {
            None => commands::cmd_receipts_list(&open()?.db, &commands::ListArgs::default()),
            Some(ReceiptsAction::List {
                limit,
                search,
                category,
                status,
                from,
                to,
                min,
                max,
            }) => commands::cmd_receipts_list(
                &open()?.db,
                &commands::ListArgs {
                    limit,
                    search,
                    category,
                    status,
                    from,
                    to,
                    min,
                    max,
                },
            ),
            Some(ReceiptsAction::Show { id }) => commands::cmd_receipts_show(&open()?.db, id),
            Some(ReceiptsAction::Delete { id }) => commands::cmd_receipts_delete(&open()?.db, id),
            Some(ReceiptsAction::Edit {
                id,
                vendor,
                total,
                tax,
                invoice,
                category,
                currency,
                card,
                cash,
            }) => commands::cmd_receipts_edit(
                &open()?.db,
                id,
                &commands::EditArgs {
                    vendor,
                    total,
                    tax,
                    invoice,
                    category,
                    currency,
                    card,
                    cash,
                },
            ),
            Some(ReceiptsAction::Reextract { id }) => commands::cmd_receipts_reextract(&open()?, id),
        },
        Commands::Queue { action } => match action {
            None | Some(QueueAction::Status) => commands::cmd_queue_status(&open()?.db),
            Some(QueueAction::List { state }) => {
                commands::cmd_queue_list(&open()?.db, state.as_deref())
            }
            Some(QueueAction::Drain) => commands::cmd_queue_drain(&open()?).await,
            Some(QueueAction::Purge) => commands::cmd_queue_purge(&open()?.db),
            Some(QueueAction::Retry) => commands::cmd_queue_retry(&open()?.db),
        },
        Commands::Watch => commands::cmd_watch(&open()?).await,
        Commands::Settings { action } => match action {
            None | Some(SettingsAction::List) => commands::cmd_settings_list(&open()?.db),
            Some(SettingsAction::Get { key }) => commands::cmd_settings_get(&open()?.db, &key),
            Some(SettingsAction::Set { key, value }) => {
                commands::cmd_settings_set(&open()?.db, &key, Some(&value))
            }
            Some(SettingsAction::Unset { key }) => {
                commands::cmd_settings_set(&open()?.db, &key, None)
            }
        },
        Commands::Logs { limit, clear } => commands::cmd_logs(&open()?, limit, clear),
        Commands::Migrations => commands::cmd_migrations(&open()?.db),
    }
}

//! StageSync CLI - inspect and update live performer status from the terminal.

mod cli;
mod commands;
mod error;


use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::{build_update, resolve_data_dir, resolve_event};
use crate::commands::drain::run_drain;
use crate::commands::get::run_get;
use crate::commands::list::run_list;
use crate::commands::queue::run_queue;
use crate::commands::resync::run_resync;
use crate::commands::set::{run_set, SetArgs};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("stagesync_core=info,stagesync_cli=info")
            }),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir);

    match cli.command {
        Commands::Get { artist, json } => {
            let event_id = resolve_event(cli.event)?;
            run_get(&artist, json, &data_dir, &event_id).await?;
        }
        Commands::Set {
            artist,
            status,
            order,
            clear_order,
            date,
            clear_date,
        } => {
            let event_id = resolve_event(cli.event)?;
            let update = build_update(
                status.as_deref(),
                order,
                clear_order,
                date.as_deref(),
                clear_date,
            )?;
            run_set(SetArgs { artist: &artist, update }, &data_dir, &event_id).await?;
        }
        Commands::List { date, json } => {
            let event_id = resolve_event(cli.event)?;
            run_list(date.as_deref(), json, &data_dir, &event_id).await?;
        }
        Commands::Resync { date } => {
            let event_id = resolve_event(cli.event)?;
            run_resync(date.as_deref(), &data_dir, &event_id).await?;
        }
        Commands::Queue { json } => run_queue(json, &data_dir).await?,
        Commands::Drain => run_drain(&data_dir).await?,
    }

    Ok(())
}

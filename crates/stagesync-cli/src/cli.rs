use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stagesync")]
#[command(about = "Inspect and update live performer status for an event")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding the status documents and the pending write queue
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Event to operate on (defaults to STAGESYNC_EVENT)
    #[arg(long, global = true, value_name = "ID")]
    pub event: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show one artist's status
    Get {
        /// Artist ID
        artist: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update one artist's status and flush it to the store
    Set {
        /// Artist ID
        artist: String,
        /// New performance status (e.g. next_on_deck, currently_on_stage)
        #[arg(long)]
        status: Option<String>,
        /// Position in the running order
        #[arg(long, conflicts_with = "clear_order")]
        order: Option<i32>,
        /// Remove the running order position
        #[arg(long)]
        clear_order: bool,
        /// Show date (YYYY-MM-DD)
        #[arg(long, conflicts_with = "clear_date")]
        date: Option<String>,
        /// Remove the show date assignment
        #[arg(long)]
        clear_date: bool,
    },
    /// List every artist status of the event in running order
    List {
        /// Only artists assigned to this show date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rebuild the status view from the store
    Resync {
        /// Only artists assigned to this show date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
    },
    /// Show writes waiting to reach the store
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Retry pending writes now
    Drain,
}

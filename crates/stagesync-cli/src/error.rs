use std::io;

use stagesync_core::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] stagesync_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No event selected. Pass --event or set STAGESYNC_EVENT.")]
    MissingEvent,
    #[error("Artist ID cannot be empty")]
    EmptyArtistId,
    #[error("Nothing to update. Pass --status, --order, or --date.")]
    EmptyUpdate,
    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("No status recorded for artist {0}")]
    NotFound(String),
}

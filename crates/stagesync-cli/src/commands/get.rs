use std::path::Path;

use crate::commands::common::{format_status_line, normalize_artist_id, open_service};
use crate::error::CliError;

pub async fn run_get(
    artist: &str,
    as_json: bool,
    data_dir: &Path,
    event_id: &str,
) -> Result<(), CliError> {
    let artist_id = normalize_artist_id(artist)?;
    let service = open_service(data_dir, event_id).await?;
    let record = service.get_artist_status(&artist_id, event_id).await;
    service.destroy().await;

    let record = record?.ok_or(CliError::NotFound(artist_id))?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("{}", format_status_line(&record));
    }
    Ok(())
}

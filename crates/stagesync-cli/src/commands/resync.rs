use std::path::Path;

use crate::commands::common::{open_service, parse_optional_date};
use crate::error::CliError;

pub async fn run_resync(date: Option<&str>, data_dir: &Path, event_id: &str) -> Result<(), CliError> {
    let date = parse_optional_date(date)?;
    let service = open_service(data_dir, event_id).await?;
    let reloaded = service.full_sync_from_storage(event_id, date).await;
    let took_ms = service.metrics().last_sync_duration_ms;
    service.destroy().await;

    println!("Reloaded {} statuses in {took_ms} ms", reloaded?);
    Ok(())
}

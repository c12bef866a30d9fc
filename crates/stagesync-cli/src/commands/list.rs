use std::path::Path;

use crate::commands::common::{format_status_lines, open_service, parse_optional_date};
use crate::error::CliError;

pub async fn run_list(
    date: Option<&str>,
    as_json: bool,
    data_dir: &Path,
    event_id: &str,
) -> Result<(), CliError> {
    let date = parse_optional_date(date)?;
    let service = open_service(data_dir, event_id).await?;
    let warmed = service.warmup_cache(event_id, date).await;
    let records = service.cache().entries_for_event(event_id, date);
    service.destroy().await;
    warmed?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No statuses recorded for {event_id}.");
        return Ok(());
    }
    for line in format_status_lines(&records) {
        println!("{line}");
    }
    Ok(())
}

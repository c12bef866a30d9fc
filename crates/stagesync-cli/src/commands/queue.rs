use std::path::Path;

use serde_json::json;

use crate::commands::common::{build_service, format_queue_lines, queue_to_item};
use crate::error::CliError;

pub async fn run_queue(as_json: bool, data_dir: &Path) -> Result<(), CliError> {
    // Not initialized: listing must not start the drain loop.
    let service = build_service(data_dir)?;
    let entries = service.queue().pending().await;
    let stats = service.queue().stats().await;
    service.destroy().await;

    if as_json {
        let items = entries.iter().map(queue_to_item).collect::<Vec<_>>();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "stats": stats, "entries": items }))?
        );
        return Ok(());
    }

    if entries.is_empty() {
        println!("No pending writes.");
        return Ok(());
    }
    for line in format_queue_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}

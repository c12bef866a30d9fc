use std::path::Path;

use crate::commands::common::{build_service, summarize_drain};
use crate::error::CliError;

pub async fn run_drain(data_dir: &Path) -> Result<(), CliError> {
    let service = build_service(data_dir)?;
    if service.queue().is_empty().await {
        println!("No pending writes.");
        return Ok(());
    }

    let report = service.drain_now().await;
    let remaining = service.queue().len().await;
    service.destroy().await;

    for line in summarize_drain(&report) {
        println!("{line}");
    }
    if remaining > 0 {
        println!("{remaining} write(s) still pending");
    }
    Ok(())
}

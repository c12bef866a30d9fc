use std::path::Path;

use stagesync_core::conflict::Resolution;
use stagesync_core::models::StatusUpdate;
use stagesync_core::queue::DrainReport;
use stagesync_core::StatusSyncService;

use crate::commands::common::{format_status_line, normalize_artist_id, open_service, summarize_drain};
use crate::error::CliError;

pub struct SetArgs<'a> {
    pub artist: &'a str,
    pub update: StatusUpdate,
}

pub async fn run_set(args: SetArgs<'_>, data_dir: &Path, event_id: &str) -> Result<(), CliError> {
    let artist_id = normalize_artist_id(args.artist)?;
    let service = open_service(data_dir, event_id).await?;
    let outcome = apply_update(&service, &artist_id, event_id, args.update).await;
    let still_queued = service.queue().has_pending_for(&artist_id).await;
    service.destroy().await;
    let (resolution, report) = outcome?;

    println!("{}", format_status_line(&resolution.record));
    for line in resolution.describe_conflicts() {
        println!("  conflict: {line}");
    }
    if still_queued {
        println!("Store not reachable; the write stays queued for retry.");
    }
    // Dropped writes only.
    for line in summarize_drain(&report).into_iter().skip(1) {
        println!("{line}");
    }
    Ok(())
}

/// Load the stored record first so the update merges into it, then write
/// and flush.
pub async fn apply_update(
    service: &StatusSyncService,
    artist_id: &str,
    event_id: &str,
    update: StatusUpdate,
) -> Result<(Resolution, DrainReport), CliError> {
    if let Err(error) = service.get_artist_status(artist_id, event_id).await {
        tracing::warn!(artist_id, error = %error, "Could not load stored status; writing blind");
    }
    let resolution = service
        .update_artist_status(artist_id, event_id, update)
        .await?;
    let report = service.drain_now().await;
    Ok((resolution, report))
}

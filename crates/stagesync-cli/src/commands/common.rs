use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use stagesync_core::channel::MemoryHub;
use stagesync_core::config::SyncConfig;
use stagesync_core::models::{PerformanceStatus, QueuedUpdate, StatusRecord, StatusUpdate};
use stagesync_core::queue::{DrainOutcome, DrainReport, FileQueuePersistence};
use stagesync_core::store::FileDocumentStore;
use stagesync_core::util::normalize_text_option;
use stagesync_core::StatusSyncService;

use crate::error::CliError;

const STORE_DIR: &str = "store";
const QUEUE_FILE: &str = "queue.json";

#[derive(Debug, Serialize)]
pub struct QueueItem {
    pub id: String,
    pub artist_id: String,
    pub priority: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<String>,
}

pub fn resolve_data_dir(cli_data_dir: Option<PathBuf>) -> PathBuf {
    cli_data_dir
        .or_else(|| env::var_os("STAGESYNC_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(default_data_dir)
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stagesync")
}

pub fn resolve_event(cli_event: Option<String>) -> Result<String, CliError> {
    normalize_text_option(cli_event)
        .or_else(|| normalize_text_option(env::var("STAGESYNC_EVENT").ok()))
        .ok_or(CliError::MissingEvent)
}

pub fn normalize_artist_id(raw: &str) -> Result<String, CliError> {
    normalize_text_option(Some(raw.to_string())).ok_or(CliError::EmptyArtistId)
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, CliError> {
    raw.trim()
        .parse::<NaiveDate>()
        .map_err(|_| CliError::InvalidDate(raw.trim().to_string()))
}

pub fn parse_optional_date(raw: Option<&str>) -> Result<Option<NaiveDate>, CliError> {
    raw.map(parse_date).transpose()
}

/// Partial update from `set` flags; an explicit clear wins over nothing.
pub fn build_update(
    status: Option<&str>,
    order: Option<i32>,
    clear_order: bool,
    date: Option<&str>,
    clear_date: bool,
) -> Result<StatusUpdate, CliError> {
    let mut update = StatusUpdate::default();
    if let Some(status) = normalize_text_option(status.map(str::to_string)) {
        update = update.with_status(PerformanceStatus::from(status));
    }
    if clear_order {
        update = update.with_order(None);
    } else if order.is_some() {
        update = update.with_order(order);
    }
    if clear_date {
        update = update.with_date(None);
    } else if let Some(date) = date {
        update = update.with_date(Some(parse_date(date)?));
    }
    if update.is_empty() {
        return Err(CliError::EmptyUpdate);
    }
    Ok(update)
}

/// Service backed by the data directory's document store and queue file,
/// not yet initialized. The channel runs on a private in-process hub, so
/// nothing is broadcast beyond this process.
pub fn build_service(data_dir: &Path) -> Result<StatusSyncService, CliError> {
    let config = SyncConfig {
        warm_start: false,
        ..SyncConfig::from_env()?
    };
    let store = Arc::new(FileDocumentStore::new(data_dir.join(STORE_DIR)));
    let persistence = Arc::new(FileQueuePersistence::new(data_dir.join(QUEUE_FILE)));
    Ok(StatusSyncService::with_queue_persistence(
        config,
        store,
        Arc::new(MemoryHub::new()),
        persistence,
    ))
}

pub async fn open_service(data_dir: &Path, event_id: &str) -> Result<StatusSyncService, CliError> {
    let service = build_service(data_dir)?;
    service.initialize(event_id).await?;
    Ok(service)
}

pub fn format_status_lines(records: &[StatusRecord]) -> Vec<String> {
    records.iter().map(format_status_line).collect()
}

pub fn format_status_line(record: &StatusRecord) -> String {
    let order = record
        .performance_order
        .map_or_else(|| "-".to_string(), |order| order.to_string());
    let date = record
        .performance_date
        .map_or_else(|| "-".to_string(), |date| date.to_string());
    let dirty = if record.dirty { "  (pending)" } else { "" };
    format!(
        "{order:>3}  {artist:<24}  {status:<20}  {date:<10}  v{version}{dirty}",
        artist = record.artist_id,
        status = record.performance_status,
        version = record.version,
    )
}

pub fn queue_to_item(entry: &QueuedUpdate) -> QueueItem {
    QueueItem {
        id: entry.id.clone(),
        artist_id: entry.artist_id.clone(),
        priority: format!("{:?}", entry.priority).to_lowercase(),
        retry_count: entry.retry_count,
        max_retries: entry.max_retries,
        next_retry_at: entry.next_retry_at.and_then(format_millis),
    }
}

pub fn format_queue_lines(entries: &[QueuedUpdate]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    entries
        .iter()
        .map(|entry| {
            let item = queue_to_item(entry);
            let short_id = item.id.chars().take(13).collect::<String>();
            let due = match entry.next_retry_at {
                Some(at) if at > now_ms => format!("retry in {}s", (at - now_ms + 999) / 1000),
                _ => "due now".to_string(),
            };
            format!(
                "{short_id:<13}  {priority:<6}  {artist:<24}  attempts {retries}/{max}  {due}",
                priority = item.priority,
                artist = item.artist_id,
                retries = item.retry_count,
                max = item.max_retries,
            )
        })
        .collect()
}

pub fn summarize_drain(report: &DrainReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Applied {}, retrying {}, dropped {}",
        report.applied_count(),
        report.retrying_count(),
        report.dropped_count()
    )];
    for outcome in &report.outcomes {
        if let DrainOutcome::Dropped {
            artist_id, error, ..
        } = outcome
        {
            lines.push(format!("  dropped write for {artist_id}: {error}"));
        }
    }
    lines
}

fn format_millis(millis: i64) -> Option<String> {
    chrono::DateTime::from_timestamp_millis(millis).map(|at| at.to_rfc3339())
}

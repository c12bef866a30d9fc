//! Artist status record model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Where an artist currently stands in the running order of a show.
///
/// The five stage states are known to the sync layer; anything else a
/// business workflow stores (e.g. `"approved"`) is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PerformanceStatus {
    Neutral,
    Completed,
    CurrentlyOnStage,
    NextOnStage,
    NextOnDeck,
    Custom(String),
}

impl PerformanceStatus {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Neutral => "neutral",
            Self::Completed => "completed",
            Self::CurrentlyOnStage => "currently_on_stage",
            Self::NextOnStage => "next_on_stage",
            Self::NextOnDeck => "next_on_deck",
            Self::Custom(value) => value,
        }
    }

    /// Statuses that put an artist on, or about to go on, stage.
    #[must_use]
    pub const fn is_stage_transition(&self) -> bool {
        matches!(
            self,
            Self::CurrentlyOnStage | Self::NextOnStage | Self::NextOnDeck
        )
    }
}

impl From<String> for PerformanceStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "neutral" => Self::Neutral,
            "completed" => Self::Completed,
            "currently_on_stage" => Self::CurrentlyOnStage,
            "next_on_stage" => Self::NextOnStage,
            "next_on_deck" => Self::NextOnDeck,
            _ => Self::Custom(value.trim().to_string()),
        }
    }
}

impl From<PerformanceStatus> for String {
    fn from(value: PerformanceStatus) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for PerformanceStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl fmt::Display for PerformanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Fields whose change makes an update significant and whose disagreement
/// is reported as a conflict. Identifiers and bookkeeping are not tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackedField {
    PerformanceStatus,
    PerformanceOrder,
    PerformanceDate,
}

impl TrackedField {
    pub const ALL: [Self; 3] = [
        Self::PerformanceStatus,
        Self::PerformanceOrder,
        Self::PerformanceDate,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PerformanceStatus => "performanceStatus",
            Self::PerformanceOrder => "performanceOrder",
            Self::PerformanceDate => "performanceDate",
        }
    }
}

/// The cached unit: live status of one artist at one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub artist_id: String,
    pub event_id: String,
    pub performance_status: PerformanceStatus,
    #[serde(default)]
    pub performance_order: Option<i32>,
    #[serde(default)]
    pub performance_date: Option<NaiveDate>,
    /// Write time of this version
    pub timestamp: DateTime<Utc>,
    /// Monotonic per artist, starts at 1
    pub version: u64,
    /// True until the latest value is confirmed in the durable store
    #[serde(default)]
    pub dirty: bool,
}

impl StatusRecord {
    /// Synthesize the first version of a record from a partial update.
    pub fn from_update(artist_id: &str, update: &StatusUpdate) -> Result<Self> {
        let mut missing = Vec::new();
        let event_id = update
            .event_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if event_id.is_none() {
            missing.push("eventId");
        }
        if update.performance_status.is_none() {
            missing.push("performanceStatus");
        }
        let (Some(event_id), Some(status)) = (event_id, update.performance_status.clone()) else {
            return Err(Error::MissingRequiredFields(missing));
        };

        let record = Self {
            artist_id: artist_id.trim().to_string(),
            event_id: event_id.to_string(),
            performance_status: status,
            performance_order: update.performance_order.unwrap_or_default(),
            performance_date: update.performance_date.unwrap_or_default(),
            timestamp: Utc::now(),
            version: 1,
            dirty: true,
        };
        record.validate()?;
        Ok(record)
    }

    /// Build a record from a document read out of the durable store.
    ///
    /// Stored documents may omit the identifiers (they are implied by the
    /// document path), the version, or the write time.
    pub fn from_document(artist_id: &str, event_id: &str, document: Value) -> Result<Self> {
        let stored: StoredStatus = serde_json::from_value(document)?;
        let record = Self {
            artist_id: stored.artist_id.unwrap_or_else(|| artist_id.to_string()),
            event_id: stored.event_id.unwrap_or_else(|| event_id.to_string()),
            performance_status: stored
                .performance_status
                .unwrap_or(PerformanceStatus::Neutral),
            performance_order: stored.performance_order,
            performance_date: stored.performance_date,
            timestamp: stored.timestamp.unwrap_or_default(),
            version: stored.version.unwrap_or(1).max(1),
            dirty: false,
        };
        record.validate()?;
        Ok(record)
    }

    /// Serialize for the durable store; the dirty bit is local bookkeeping.
    pub fn to_document(&self) -> Result<Value> {
        let mut document = serde_json::to_value(self)?;
        if let Value::Object(fields) = &mut document {
            fields.remove("dirty");
        }
        Ok(document)
    }

    pub fn validate(&self) -> Result<()> {
        if self.artist_id.trim().is_empty() {
            return Err(Error::InvalidRecord("artistId must not be empty".to_string()));
        }
        if self.event_id.trim().is_empty() {
            return Err(Error::InvalidRecord("eventId must not be empty".to_string()));
        }
        if self.performance_status.as_str().trim().is_empty() {
            return Err(Error::InvalidRecord(
                "performanceStatus must not be empty".to_string(),
            ));
        }
        if self.version == 0 {
            return Err(Error::InvalidRecord("version must start at 1".to_string()));
        }
        Ok(())
    }

    /// Whether applying `update` would change any tracked field.
    #[must_use]
    pub fn is_significant(&self, update: &StatusUpdate) -> bool {
        update
            .performance_status
            .as_ref()
            .is_some_and(|status| *status != self.performance_status)
            || update
                .performance_order
                .is_some_and(|order| order != self.performance_order)
            || update
                .performance_date
                .is_some_and(|date| date != self.performance_date)
    }

    /// Copy of this record with the partial update's tracked fields applied.
    #[must_use]
    pub fn merged_with(&self, update: &StatusUpdate) -> Self {
        let mut merged = self.clone();
        if let Some(status) = &update.performance_status {
            merged.performance_status = status.clone();
        }
        if let Some(order) = update.performance_order {
            merged.performance_order = order;
        }
        if let Some(date) = update.performance_date {
            merged.performance_date = date;
        }
        merged
    }

    #[must_use]
    pub fn field_value(&self, field: TrackedField) -> Value {
        match field {
            TrackedField::PerformanceStatus => Value::String(self.performance_status.to_string()),
            TrackedField::PerformanceOrder => self
                .performance_order
                .map_or(Value::Null, Value::from),
            TrackedField::PerformanceDate => self
                .performance_date
                .map_or(Value::Null, |date| Value::String(date.to_string())),
        }
    }

    /// Copy `field` from `source` into this record.
    pub fn take_field(&mut self, field: TrackedField, source: &Self) {
        match field {
            TrackedField::PerformanceStatus => {
                self.performance_status = source.performance_status.clone();
            }
            TrackedField::PerformanceOrder => self.performance_order = source.performance_order,
            TrackedField::PerformanceDate => self.performance_date = source.performance_date,
        }
    }

    #[must_use]
    pub fn field_differs(&self, other: &Self, field: TrackedField) -> bool {
        match field {
            TrackedField::PerformanceStatus => self.performance_status != other.performance_status,
            TrackedField::PerformanceOrder => self.performance_order != other.performance_order,
            TrackedField::PerformanceDate => self.performance_date != other.performance_date,
        }
    }

    /// The full set of tracked fields as a partial update.
    #[must_use]
    pub fn as_update(&self) -> StatusUpdate {
        StatusUpdate {
            event_id: Some(self.event_id.clone()),
            performance_status: Some(self.performance_status.clone()),
            performance_order: Some(self.performance_order),
            performance_date: Some(self.performance_date),
        }
    }
}

/// Partial status change. Absent fields are left untouched; an explicit
/// `null` order or date clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_status: Option<PerformanceStatus>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "double_option"
    )]
    pub performance_order: Option<Option<i32>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "double_option"
    )]
    pub performance_date: Option<Option<NaiveDate>>,
}

impl StatusUpdate {
    #[must_use]
    pub fn status(status: PerformanceStatus) -> Self {
        Self {
            performance_status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_event(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: PerformanceStatus) -> Self {
        self.performance_status = Some(status);
        self
    }

    #[must_use]
    pub const fn with_order(mut self, order: Option<i32>) -> Self {
        self.performance_order = Some(order);
        self
    }

    #[must_use]
    pub const fn with_date(mut self, date: Option<NaiveDate>) -> Self {
        self.performance_date = Some(date);
        self
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.performance_status.is_none()
            && self.performance_order.is_none()
            && self.performance_date.is_none()
    }

    /// Partial update setting one tracked field from a JSON value, as chosen
    /// by an operator resolving a conflict by hand.
    pub fn for_field(field: TrackedField, value: &Value) -> Result<Self> {
        let invalid = || {
            Error::InvalidRecord(format!(
                "{} cannot be set to {value}",
                field.name()
            ))
        };
        let update = match field {
            TrackedField::PerformanceStatus => {
                let status = value
                    .as_str()
                    .map(str::trim)
                    .filter(|status| !status.is_empty())
                    .ok_or_else(invalid)?;
                Self::status(PerformanceStatus::from(status.to_string()))
            }
            TrackedField::PerformanceOrder => {
                let order = if value.is_null() {
                    None
                } else {
                    let order = value.as_i64().ok_or_else(invalid)?;
                    Some(i32::try_from(order).map_err(|_| invalid())?)
                };
                Self::default().with_order(order)
            }
            TrackedField::PerformanceDate => {
                let date = if value.is_null() {
                    None
                } else {
                    let raw = value.as_str().ok_or_else(invalid)?;
                    Some(raw.trim().parse::<NaiveDate>().map_err(|_| invalid())?)
                };
                Self::default().with_date(date)
            }
        };
        Ok(update)
    }

    /// Shallow-merge into a stored JSON document, keeping unrelated keys.
    pub fn apply_to_document(&self, document: &mut Value) -> Result<()> {
        let Value::Object(patch) = serde_json::to_value(self)? else {
            return Ok(());
        };
        if !document.is_object() {
            *document = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(fields) = document {
            fields.extend(patch);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredStatus {
    artist_id: Option<String>,
    event_id: Option<String>,
    #[serde(alias = "status")]
    performance_status: Option<PerformanceStatus>,
    performance_order: Option<i32>,
    performance_date: Option<NaiveDate>,
    timestamp: Option<DateTime<Utc>>,
    version: Option<u64>,
}

mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<T, S>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

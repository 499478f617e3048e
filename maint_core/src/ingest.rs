//! Validation of raw activity and maintenance rows.
//!
//! Raw rows come from CSV exports and form responses where any field may be
//! missing or malformed. Each bad row is excluded and reported as a
//! [`Rejection`]; the remaining rows are still usable. Naive timestamps are
//! localized here, in the athlete's configured offset, so the engine only
//! ever sees timezone-aware values.
//!
//! Activity exports carry two start columns. `start_date` is a real UTC
//! instant and wins when present. `start_date_local` is the athlete's wall
//! clock; exports append a `Z` to it even though it is not UTC, so a trailing
//! `Z` there is dropped and the value is localized like any naive time.

use crate::{Activity, ActivityKind, MaintenanceEvent};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Meters per mile, for exports that only carry metric distance
pub const METERS_PER_MILE: f64 = 1609.34;

/// Layouts tried for timestamps without an offset
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Layouts tried for timestamps with an explicit offset (besides RFC 3339)
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%z"];

/// Form-response layout: `06/01/2025 7:30:00 AM`
const FORM_DATETIME_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";
const FORM_DATE_FORMAT: &str = "%m/%d/%Y";

/// Activity row as exported by a fitness service or stored locally
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawActivity {
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(default, rename = "type")]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub gear_id: Option<String>,
    /// Start instant in UTC
    #[serde(default)]
    pub start_date: Option<String>,
    /// Start in local wall time
    #[serde(default)]
    pub start_date_local: Option<String>,
    #[serde(default)]
    pub distance_miles: Option<String>,
    /// Distance in meters, used when `distance_miles` is absent
    #[serde(default, rename = "distance")]
    pub distance_meters: Option<String>,
}

/// Maintenance form response row
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawMaintenanceEvent {
    #[serde(default, rename = "Action")]
    pub action: Option<String>,
    #[serde(default, rename = "Date of Action")]
    pub date_of_action: Option<String>,
    #[serde(default, rename = "Time of Action")]
    pub time_of_action: Option<String>,
}

/// Which input a rejected row came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordSource {
    Activity,
    MaintenanceEvent,
}

/// Why a row was excluded
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RejectReason {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid number in '{field}': {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("negative distance {0}")]
    NegativeDistance(f64),

    #[error("unparseable timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("timestamp {0:?} does not map to a single instant")]
    AmbiguousTimestamp(String),
}

/// A row excluded during ingestion
#[derive(Clone, Debug, PartialEq)]
pub struct Rejection {
    pub source: RecordSource,
    /// 1-based data row number
    pub row: usize,
    pub reason: RejectReason,
}

/// Accepted records plus the rows that were rejected
#[derive(Clone, Debug)]
pub struct Ingested<T> {
    pub records: Vec<T>,
    pub rejected: Vec<Rejection>,
}

impl<T> Default for Ingested<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

impl RawActivity {
    /// True when every column is empty
    pub fn is_blank(&self) -> bool {
        [
            &self.upload_id,
            &self.activity_type,
            &self.gear_id,
            &self.start_date,
            &self.start_date_local,
            &self.distance_miles,
            &self.distance_meters,
        ]
        .iter()
        .all(|field| field.as_deref().map_or(true, |v| v.trim().is_empty()))
    }
}

impl<T> Ingested<T> {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Validate raw activity rows
pub fn ingest_activities<I>(rows: I, offset: &FixedOffset) -> Ingested<Activity>
where
    I: IntoIterator<Item = RawActivity>,
{
    let mut out = Ingested::default();
    for (idx, row) in rows.into_iter().enumerate() {
        match activity_from_raw(row, offset) {
            Ok(activity) => out.records.push(activity),
            Err(reason) => {
                tracing::warn!("Rejected activity row {}: {}", idx + 1, reason);
                out.rejected.push(Rejection {
                    source: RecordSource::Activity,
                    row: idx + 1,
                    reason,
                });
            }
        }
    }
    out
}

/// Validate raw maintenance rows
pub fn ingest_events<I>(rows: I, offset: &FixedOffset) -> Ingested<MaintenanceEvent>
where
    I: IntoIterator<Item = RawMaintenanceEvent>,
{
    let mut out = Ingested::default();
    for (idx, row) in rows.into_iter().enumerate() {
        match event_from_raw(row, offset) {
            Ok(event) => out.records.push(event),
            Err(reason) => {
                tracing::warn!("Rejected maintenance row {}: {}", idx + 1, reason);
                out.rejected.push(Rejection {
                    source: RecordSource::MaintenanceEvent,
                    row: idx + 1,
                    reason,
                });
            }
        }
    }
    out
}

/// Keep the last occurrence of each activity id, ordered by id
pub fn dedup_activities(activities: Vec<Activity>) -> Vec<Activity> {
    let before = activities.len();
    let unique: BTreeMap<u64, Activity> = activities.into_iter().map(|a| (a.id, a)).collect();

    if unique.len() != before {
        tracing::debug!("Dropped {} duplicate activities", before - unique.len());
    }

    unique.into_values().collect()
}

fn activity_from_raw(row: RawActivity, offset: &FixedOffset) -> Result<Activity, RejectReason> {
    let id = parse_id(required(row.upload_id, "upload_id")?)?;
    let kind = ActivityKind::parse(&required(row.activity_type, "type")?);

    // Gear is optional for activities that never count toward maintenance
    let equipment_id = match non_empty(row.gear_id) {
        Some(gear) => gear,
        None if kind.counts_toward_maintenance() => {
            return Err(RejectReason::MissingField("gear_id"))
        }
        None => String::new(),
    };

    let start_time = match non_empty(row.start_date) {
        Some(utc) => parse_timestamp(&utc, &Utc.fix())?.with_timezone(offset),
        None => parse_local_timestamp(&required(row.start_date_local, "start_date_local")?, offset)?,
    };

    let distance = match (non_empty(row.distance_miles), non_empty(row.distance_meters)) {
        (Some(miles), _) => parse_number(&miles, "distance_miles")?,
        (None, Some(meters)) => parse_number(&meters, "distance")? / METERS_PER_MILE,
        (None, None) => return Err(RejectReason::MissingField("distance_miles")),
    };
    if distance < 0.0 {
        return Err(RejectReason::NegativeDistance(distance));
    }

    Ok(Activity {
        id,
        kind,
        equipment_id,
        start_time,
        distance,
    })
}

fn event_from_raw(row: RawMaintenanceEvent, offset: &FixedOffset) -> Result<MaintenanceEvent, RejectReason> {
    let action_label = required(row.action, "Action")?;
    let date = required(row.date_of_action, "Date of Action")?;

    let performed_at = match non_empty(row.time_of_action) {
        Some(time) => {
            let raw = format!("{} {}", date, time);
            let naive = NaiveDateTime::parse_from_str(&raw, FORM_DATETIME_FORMAT)
                .map_err(|_| RejectReason::InvalidTimestamp(raw.clone()))?;
            localize(naive, offset, &raw)?
        }
        None => match NaiveDate::parse_from_str(&date, FORM_DATE_FORMAT) {
            Ok(day) => localize(start_of_day(day), offset, &date)?,
            Err(_) => parse_timestamp(&date, offset)?,
        },
    };

    Ok(MaintenanceEvent {
        action_label,
        performed_at,
    })
}

/// Parse a timestamp, localizing naive values in `offset`
pub fn parse_timestamp(value: &str, offset: &FixedOffset) -> Result<DateTime<FixedOffset>, RejectReason> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt);
    }
    if let Some(dt) = OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(value, fmt).ok())
    {
        return Ok(dt);
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .map(start_of_day)
        })
        .ok_or_else(|| RejectReason::InvalidTimestamp(value.to_string()))?;

    localize(naive, offset, value)
}

/// Parse a wall-clock timestamp, ignoring a trailing `Z`
///
/// Explicit numeric offsets are still honored.
pub fn parse_local_timestamp(value: &str, offset: &FixedOffset) -> Result<DateTime<FixedOffset>, RejectReason> {
    let value = value.trim();
    let wall = value
        .strip_suffix('Z')
        .or_else(|| value.strip_suffix('z'))
        .unwrap_or(value);
    parse_timestamp(wall, offset)
}

fn localize(naive: NaiveDateTime, offset: &FixedOffset, raw: &str) -> Result<DateTime<FixedOffset>, RejectReason> {
    offset
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| RejectReason::AmbiguousTimestamp(raw.to_string()))
}

fn start_of_day(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::default())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, field: &'static str) -> Result<String, RejectReason> {
    non_empty(value).ok_or(RejectReason::MissingField(field))
}

fn parse_number(value: &str, field: &'static str) -> Result<f64, RejectReason> {
    value
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| RejectReason::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

/// Spreadsheets sometimes round-trip integer ids as `123.0`
fn parse_id(value: String) -> Result<u64, RejectReason> {
    if let Ok(id) = value.parse::<u64>() {
        return Ok(id);
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 0.0 && n.fract() == 0.0 && *n <= u64::MAX as f64)
        .map(|n| n as u64)
        .ok_or(RejectReason::InvalidNumber {
            field: "upload_id",
            value,
        })
}

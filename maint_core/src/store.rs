//! Local activity store and maintenance log.
//!
//! Both are CSV files under the data directory:
//! - `activities.csv`: deduplicated activity history, rewritten atomically
//! - `maintenance.csv`: form-response style log, appended to
//!
//! Reading never fails on a bad row; such rows surface as rejections from
//! [`crate::ingest`]. Rewriting the activity store carries its rejected rows
//! over unchanged, so a hand-edited row is never lost to an import.
//!
//! Read-merge-write cycles on the activity store hold [`StoreLock`], an
//! exclusive lock on the `activities.csv.lock` sidecar file.

use crate::ingest::{self, dedup_activities, RawActivity, RawMaintenanceEvent};
use crate::{Activity, Error, Ingested, MaintenanceEvent, Result};
use chrono::{FixedOffset, SecondsFormat, Utc};
use csv::{ReaderBuilder, StringRecord};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const ACTIVITIES_FILE: &str = "activities.csv";
pub const MAINTENANCE_FILE: &str = "maintenance.csv";

/// Activity row as written to the store
///
/// Every column is text so rejected rows can be written back as read.
#[derive(Debug, serde::Serialize)]
struct StoredActivity {
    upload_id: String,
    #[serde(rename = "type")]
    activity_type: String,
    gear_id: String,
    start_date: String,
    start_date_local: String,
    distance_miles: String,
    distance: String,
}

impl From<&Activity> for StoredActivity {
    fn from(activity: &Activity) -> Self {
        StoredActivity {
            upload_id: activity.id.to_string(),
            activity_type: activity.kind.as_str().to_string(),
            gear_id: activity.equipment_id.clone(),
            start_date: activity
                .start_time
                .with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            start_date_local: activity.start_time.to_rfc3339(),
            distance_miles: activity.distance.to_string(),
            distance: String::new(),
        }
    }
}

impl From<&RawActivity> for StoredActivity {
    fn from(raw: &RawActivity) -> Self {
        let text = |field: &Option<String>| field.clone().unwrap_or_default();
        StoredActivity {
            upload_id: text(&raw.upload_id),
            activity_type: text(&raw.activity_type),
            gear_id: text(&raw.gear_id),
            start_date: text(&raw.start_date),
            start_date_local: text(&raw.start_date_local),
            distance_miles: text(&raw.distance_miles),
            distance: text(&raw.distance_meters),
        }
    }
}

/// Maintenance row as written to the log
#[derive(Debug, serde::Serialize)]
struct StoredEvent {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Date of Action")]
    date_of_action: String,
    #[serde(rename = "Time of Action")]
    time_of_action: String,
}

impl StoredEvent {
    /// Form columns carry no offset, so the time is written as wall clock in
    /// the offset the log is read back with.
    fn new(event: &MaintenanceEvent, offset: &FixedOffset) -> Self {
        let local = event.performed_at.with_timezone(offset);
        StoredEvent {
            action: event.action_label.clone(),
            date_of_action: local.format("%m/%d/%Y").to_string(),
            time_of_action: local.format("%I:%M:%S %p").to_string(),
        }
    }
}

/// Exclusive lock on a store's sidecar `.lock` file, released on drop
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Block until the lock for `store_path` is held
    pub fn acquire(store_path: &Path) -> Result<Self> {
        let path = lock_path(store_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.lock_exclusive()?;

        tracing::debug!("Acquired store lock {:?}", path);
        Ok(Self { file, path })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release store lock {:?}: {}", self.path, e);
        }
    }
}

/// `activities.csv` -> `activities.csv.lock`
pub fn lock_path(store_path: &Path) -> PathBuf {
    let mut name = store_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Read every data row of a CSV file
///
/// Missing files yield no rows. Rows that cannot be deserialized are kept as
/// `T::default()` so ingestion rejects them under their own row number.
pub fn read_rows<T>(path: &Path) -> Result<Vec<T>>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        tracing::debug!("No file at {:?}, nothing to read", path);
        return Ok(Vec::new());
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let headers = lossy(reader.byte_headers()?);

    let mut rows = Vec::new();
    for (idx, result) in reader.byte_records().enumerate() {
        let record = lossy(&result?);
        match record.deserialize::<T>(Some(&headers)) {
            Ok(row) => rows.push(row),
            Err(e) => {
                tracing::warn!("Failed to deserialize row {} of {:?}: {}", idx + 1, path, e);
                rows.push(T::default());
            }
        }
    }

    tracing::debug!("Read {} rows from {:?}", rows.len(), path);
    Ok(rows)
}

fn lossy(record: &csv::ByteRecord) -> StringRecord {
    record
        .iter()
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

/// Activity store contents
#[derive(Debug, Default)]
pub struct ActivityStore {
    pub activities: Ingested<Activity>,
    /// Raw form of every rejected row, in file order
    pub malformed: Vec<RawActivity>,
}

/// Load the activity store, keeping rejected rows for write-back
pub fn load_activity_store(path: &Path, offset: &FixedOffset) -> Result<ActivityStore> {
    let rows: Vec<RawActivity> = read_rows(path)?;
    let mut activities = ingest::ingest_activities(rows.iter().cloned(), offset);
    activities.records = dedup_activities(activities.records);

    let malformed = activities
        .rejected
        .iter()
        .filter_map(|rejection| rows.get(rejection.row - 1))
        .filter(|raw| !raw.is_blank())
        .cloned()
        .collect();

    tracing::info!(
        "Loaded {} activities from {:?} ({} rejected)",
        activities.records.len(),
        path,
        activities.rejected.len()
    );
    Ok(ActivityStore {
        activities,
        malformed,
    })
}

/// Load and validate the activity store
pub fn load_activities(path: &Path, offset: &FixedOffset) -> Result<Ingested<Activity>> {
    Ok(load_activity_store(path, offset)?.activities)
}

/// Combine stored and incoming activities; incoming rows win on id clashes
pub fn merge_activities(existing: Vec<Activity>, incoming: Vec<Activity>) -> Vec<Activity> {
    dedup_activities(existing.into_iter().chain(incoming).collect())
}

/// Atomically replace the activity store
///
/// Writes `activities` followed by the `malformed` rows verbatim to a temp
/// file in the same directory, syncs it and renames it over the original.
/// Callers that read the store first should hold [`StoreLock`].
pub fn save_activities(path: &Path, activities: &[Activity], malformed: &[RawActivity]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Other(format!("activity store path {:?} has no parent", path)))?;
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(true)
            .from_writer(temp.as_file());
        for activity in activities {
            writer.serialize(StoredActivity::from(activity))?;
        }
        for raw in malformed {
            writer.serialize(StoredActivity::from(raw))?;
        }
        writer.flush()?;
    }

    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;

    tracing::info!(
        "Saved {} activities to {:?} ({} malformed rows kept)",
        activities.len(),
        path,
        malformed.len()
    );
    Ok(())
}

/// Outcome of [`import_activities`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportSummary {
    /// Valid activities offered for import
    pub imported: usize,
    /// Activities whose id was not yet in the store
    pub added: usize,
    /// Valid activities in the store afterwards
    pub total: usize,
    /// Rejected store rows written back unchanged
    pub kept_malformed: usize,
}

/// Merge `incoming` into the store at `path` under the store lock
pub fn import_activities(path: &Path, offset: &FixedOffset, incoming: Vec<Activity>) -> Result<ImportSummary> {
    let _lock = StoreLock::acquire(path)?;

    let store = load_activity_store(path, offset)?;
    if !store.malformed.is_empty() {
        tracing::warn!(
            "{} malformed rows in {:?} kept unchanged",
            store.malformed.len(),
            path
        );
    }

    let before = store.activities.records.len();
    let imported = incoming.len();
    let merged = merge_activities(store.activities.records, incoming);
    save_activities(path, &merged, &store.malformed)?;

    Ok(ImportSummary {
        imported,
        added: merged.len().saturating_sub(before),
        total: merged.len(),
        kept_malformed: store.malformed.len(),
    })
}

/// Load and validate the maintenance log
pub fn load_maintenance_log(path: &Path, offset: &FixedOffset) -> Result<Ingested<MaintenanceEvent>> {
    let rows: Vec<RawMaintenanceEvent> = read_rows(path)?;
    let ingested = ingest::ingest_events(rows, offset);

    tracing::info!(
        "Loaded {} maintenance events from {:?} ({} rejected)",
        ingested.records.len(),
        path,
        ingested.rejected.len()
    );
    Ok(ingested)
}

/// Append one event to the maintenance log
///
/// The event is written as wall-clock time in `offset`, which must be the
/// offset the log is later loaded with.
pub fn append_maintenance_event(path: &Path, event: &MaintenanceEvent, offset: &FixedOffset) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;

    let needs_headers = file.metadata()?.len() == 0;
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_headers)
            .from_writer(&file);
        writer.serialize(StoredEvent::new(event, offset))?;
        writer.flush()?;
    }
    (&file).flush()?;

    file.unlock()?;
    tracing::debug!("Logged '{}' at {}", event.action_label, event.performed_at);
    Ok(())
}

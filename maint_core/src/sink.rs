//! Alert sinks: where evaluated alert records go.
//!
//! Records are appended, never rewritten, so the files double as a history
//! of every evaluation run. Writers take an exclusive lock per append.

use crate::{AlertRecord, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const ALERTS_JSONL_FILE: &str = "alerts.jsonl";
pub const ALERTS_CSV_FILE: &str = "alerts.csv";

/// Destination for alert records
pub trait AlertSink {
    fn append(&mut self, alert: &AlertRecord) -> Result<()>;

    /// Append every record, in order
    fn append_all(&mut self, alerts: &[AlertRecord]) -> Result<()> {
        for alert in alerts {
            self.append(alert)?;
        }
        Ok(())
    }
}

fn open_for_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// JSON Lines alert log
pub struct JsonlAlertSink {
    path: PathBuf,
}

impl JsonlAlertSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AlertSink for JsonlAlertSink {
    fn append(&mut self, alert: &AlertRecord) -> Result<()> {
        let file = open_for_append(&self.path)?;
        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(alert)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;

        tracing::debug!("Appended {} alert to {:?}", alert.maintenance_type, self.path);
        Ok(())
    }
}

/// Spreadsheet-style alert rows, one per record
pub struct CsvAlertSink {
    path: PathBuf,
}

/// A row in the alerts CSV
#[derive(Debug, serde::Serialize)]
struct AlertRow<'a> {
    issue_alert: bool,
    date: String,
    maintenance_type: &'a str,
    action_type: &'a str,
    miles_threshold: Option<f64>,
    days_threshold: Option<u32>,
    miles_since_last_action: String,
    days_since_last_action: Option<i64>,
    run_id: String,
}

impl<'a> From<&'a AlertRecord> for AlertRow<'a> {
    fn from(alert: &'a AlertRecord) -> Self {
        AlertRow {
            issue_alert: alert.triggered,
            date: alert.evaluated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            maintenance_type: &alert.maintenance_type,
            action_type: &alert.action_label,
            miles_threshold: alert.distance_limit,
            days_threshold: alert.time_limit,
            miles_since_last_action: format!("{:.1}", alert.distance_since),
            // Empty cell rather than the sentinel when never performed
            days_since_last_action: alert.ever_performed().then_some(alert.days_since),
            run_id: alert.run_id.to_string(),
        }
    }
}

impl CsvAlertSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AlertSink for CsvAlertSink {
    fn append(&mut self, alert: &AlertRecord) -> Result<()> {
        let file = open_for_append(&self.path)?;
        file.lock_exclusive()?;

        let needs_headers = file.metadata()?.len() == 0;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(needs_headers)
                .from_writer(&file);
            writer.serialize(AlertRow::from(alert))?;
            writer.flush()?;
        }

        file.unlock()?;
        Ok(())
    }
}

/// Read all alert records from a JSONL alert log
///
/// Corrupt lines are skipped with a warning.
pub fn read_alerts(path: &Path) -> Result<Vec<AlertRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut alerts = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<AlertRecord>(&line) {
            Ok(alert) => alerts.push(alert),
            Err(e) => {
                tracing::warn!("Failed to parse alert at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} alerts from {:?}", alerts.len(), path);
    Ok(alerts)
}

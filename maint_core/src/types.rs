//! Core domain types for bike maintenance tracking.
//!
//! This module defines the fundamental types used throughout the system:
//! - Ride activities and their classification
//! - Recorded maintenance events
//! - Threshold configuration per maintenance type
//! - Alert records produced by the evaluation engine

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel for `days_since` when a maintenance action has never been recorded.
///
/// Larger than any configurable time limit, so it always reads as "overdue".
pub const NEVER_PERFORMED_DAYS: i64 = i64::MAX;

// ============================================================================
// Activity Types
// ============================================================================

/// Classification of a recorded activity
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActivityKind {
    Ride,
    VirtualRide,
    /// Any other activity type (runs, walks, ...), kept by name
    Other(String),
}

impl ActivityKind {
    /// Parse an activity type name as exported by fitness services
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "Ride" => ActivityKind::Ride,
            "VirtualRide" => ActivityKind::VirtualRide,
            other => ActivityKind::Other(other.to_string()),
        }
    }

    /// The activity type name, as it appears in exports
    pub fn as_str(&self) -> &str {
        match self {
            ActivityKind::Ride => "Ride",
            ActivityKind::VirtualRide => "VirtualRide",
            ActivityKind::Other(name) => name,
        }
    }

    /// Whether this activity wears the bike and counts toward maintenance
    pub fn counts_toward_maintenance(&self) -> bool {
        matches!(self, ActivityKind::Ride | ActivityKind::VirtualRide)
    }
}

/// A single ingested activity
///
/// Produced by [`crate::ingest`]; `distance` is always finite and non-negative.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    /// Stable unique identifier used for deduplication
    pub id: u64,
    pub kind: ActivityKind,
    /// Bike/gear the activity was recorded against
    pub equipment_id: String,
    /// Start time in the athlete's local offset
    pub start_time: DateTime<FixedOffset>,
    /// Distance in miles
    pub distance: f64,
}

// ============================================================================
// Maintenance Types
// ============================================================================

/// A recorded maintenance action
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MaintenanceEvent {
    pub action_label: String,
    pub performed_at: DateTime<FixedOffset>,
}

/// Trigger configuration for one maintenance type
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ThresholdConfig {
    /// Label used to match [`MaintenanceEvent::action_label`]
    pub action_label: String,
    /// Miles since last action at which service is due
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_limit: Option<f64>,
    /// Days since last action at which service is due
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u32>,
}

// ============================================================================
// Alert Types
// ============================================================================

/// Decision for one maintenance type in one evaluation run
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AlertRecord {
    /// Shared by every record produced in the same run
    pub run_id: Uuid,
    pub maintenance_type: String,
    pub action_label: String,
    pub evaluated_at: DateTime<Utc>,
    pub distance_limit: Option<f64>,
    pub time_limit: Option<u32>,
    /// `None` when the action has never been recorded
    pub last_performed_at: Option<DateTime<Utc>>,
    /// Miles ridden on the bike since the last action
    pub distance_since: f64,
    /// Whole days since the last action, or [`NEVER_PERFORMED_DAYS`]
    pub days_since: i64,
    pub triggered: bool,
}

impl AlertRecord {
    /// Whether the action has ever been recorded
    pub fn ever_performed(&self) -> bool {
        self.last_performed_at.is_some()
    }
}

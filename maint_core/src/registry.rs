//! Threshold registry: maintenance types and their trigger limits.
//!
//! The registry is plain configuration. It is validated once when built and
//! handed to the engine by reference; nothing here is read implicitly.

use crate::{Error, Result, ThresholdConfig};
use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Cached built-in registry, built once and reused
static DEFAULT_REGISTRY: Lazy<ThresholdRegistry> = Lazy::new(|| ThresholdRegistry {
    entries: default_entries(),
});

/// Get a reference to the built-in registry
pub fn default_registry() -> &'static ThresholdRegistry {
    &DEFAULT_REGISTRY
}

/// Built-in maintenance types, in display order
pub fn default_entries() -> Vec<(String, ThresholdConfig)> {
    vec![
        (
            "wax_chain".into(),
            ThresholdConfig {
                action_label: "Wax chain".into(),
                distance_limit: Some(200.0),
                time_limit: None,
            },
        ),
        (
            "tire_check".into(),
            ThresholdConfig {
                action_label: "Tire check".into(),
                distance_limit: None,
                time_limit: Some(30),
            },
        ),
        (
            "clean_drivetrain".into(),
            ThresholdConfig {
                action_label: "Clean drivetrain".into(),
                distance_limit: Some(500.0),
                time_limit: Some(60),
            },
        ),
    ]
}

/// Ordered mapping from maintenance-type identifier to its thresholds
///
/// Iteration order is insertion order and fixes the order of alert records.
#[derive(Clone, Debug, PartialEq)]
pub struct ThresholdRegistry {
    entries: Vec<(String, ThresholdConfig)>,
}

impl ThresholdRegistry {
    /// Build a registry, failing with [`Error::Config`] if any entry is invalid
    pub fn new(entries: Vec<(String, ThresholdConfig)>) -> Result<Self> {
        let errors = validate_entries(&entries);
        if !errors.is_empty() {
            return Err(Error::Config(format!(
                "invalid threshold registry: {}",
                errors.join("; ")
            )));
        }

        tracing::debug!("Built threshold registry with {} entries", entries.len());
        Ok(Self { entries })
    }

    /// Iterate entries in registry order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ThresholdConfig)> {
        self.entries.iter().map(|(id, cfg)| (id.as_str(), cfg))
    }

    /// Look up a maintenance type by identifier
    pub fn get(&self, maintenance_type: &str) -> Option<&ThresholdConfig> {
        self.entries
            .iter()
            .find(|(id, _)| id == maintenance_type)
            .map(|(_, cfg)| cfg)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate the registry, returning every problem found
    pub fn validate(&self) -> Vec<String> {
        validate_entries(&self.entries)
    }
}

/// Check entries for configuration errors
///
/// An entry needs at least one limit, a well-formed label, and limits that
/// are finite and non-negative. Identifiers must be non-empty and unique.
pub fn validate_entries(entries: &[(String, ThresholdConfig)]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (id, cfg) in entries {
        if id.trim().is_empty() {
            errors.push("maintenance type with empty identifier".to_string());
        } else if !seen.insert(id.as_str()) {
            errors.push(format!("duplicate maintenance type '{}'", id));
        }

        if cfg.distance_limit.is_none() && cfg.time_limit.is_none() {
            errors.push(format!(
                "'{}' has neither a distance limit nor a time limit",
                id
            ));
        }

        if let Some(limit) = cfg.distance_limit {
            if !limit.is_finite() || limit < 0.0 {
                errors.push(format!("'{}' has invalid distance limit {}", id, limit));
            }
        }

        let label = &cfg.action_label;
        if label.trim().is_empty() {
            errors.push(format!("'{}' has an empty action label", id));
        } else if label.trim() != label {
            errors.push(format!(
                "'{}' action label {:?} has leading or trailing whitespace",
                id, label
            ));
        } else if label.chars().any(char::is_control) {
            errors.push(format!(
                "'{}' action label {:?} contains control characters",
                id, label
            ));
        }
    }

    errors
}

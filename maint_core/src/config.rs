//! Configuration file support for bikemaint.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/bikemaint/config.toml`.
//! The threshold registry lives here too; when `[[thresholds]]` is absent
//! the built-in registry is used.

use crate::registry::default_entries;
use crate::{Error, Result, ThresholdConfig, ThresholdRegistry};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub bike: BikeConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<ThresholdEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            bike: BikeConfig::default(),
            notify: NotifyConfig::default(),
            thresholds: default_thresholds(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// The bike being tracked
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BikeConfig {
    /// Gear identifier activities are recorded against
    #[serde(default)]
    pub equipment_id: Option<String>,

    /// Athlete's UTC offset, used to localize naive timestamps (`-05:00`)
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

impl Default for BikeConfig {
    fn default() -> Self {
        Self {
            equipment_id: None,
            utc_offset: default_utc_offset(),
        }
    }
}

/// What gets handed to alert sinks
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    /// Only persist records whose threshold was crossed
    #[serde(default)]
    pub only_triggered: bool,
}

/// One `[[thresholds]]` table
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ThresholdEntry {
    pub id: String,
    pub action_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u32>,
}

impl From<ThresholdEntry> for (String, ThresholdConfig) {
    fn from(entry: ThresholdEntry) -> Self {
        (
            entry.id,
            ThresholdConfig {
                action_label: entry.action_label,
                distance_limit: entry.distance_limit,
                time_limit: entry.time_limit,
            },
        )
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| home_dir().join(".local/share"));
    base.join("bikemaint")
}

fn default_utc_offset() -> String {
    "+00:00".into()
}

fn default_thresholds() -> Vec<ThresholdEntry> {
    default_entries()
        .into_iter()
        .map(|(id, cfg)| ThresholdEntry {
            id,
            action_label: cfg.action_label,
            distance_limit: cfg.distance_limit,
            time_limit: cfg.time_limit,
        })
        .collect()
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| home_dir().join(".config"));
        base.join("bikemaint").join("config.toml")
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Build the threshold registry, failing on any invalid entry
    pub fn registry(&self) -> Result<ThresholdRegistry> {
        ThresholdRegistry::new(self.thresholds.iter().cloned().map(Into::into).collect())
    }

    /// Parse the configured UTC offset
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.bike.utc_offset).ok_or_else(|| {
            Error::Config(format!(
                "invalid utc_offset {:?}, expected +HH:MM or -HH:MM",
                self.bike.utc_offset
            ))
        })
    }
}

/// Parse `+HH:MM`, `-HH:MM`, `+HH`, `Z` or `UTC`
pub fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match s.chars().next()? {
        '+' => (1, &s[1..]),
        '-' => (-1, &s[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.bike.equipment_id.is_none());
        assert!(!config.notify.only_triggered);
        assert_eq!(config.thresholds.len(), 3);
        assert_eq!(config.registry().unwrap(), *crate::default_registry());
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.bike.equipment_id = Some("b14816258".into());

        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.bike.equipment_id, parsed.bike.equipment_id);
        assert_eq!(config.thresholds, parsed.thresholds);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[bike]
equipment_id = "b14816258"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bike.equipment_id.as_deref(), Some("b14816258"));
        assert_eq!(config.bike.utc_offset, "+00:00"); // default
        assert_eq!(config.thresholds.len(), 3); // default registry
    }

    #[test]
    fn test_custom_thresholds_replace_defaults() {
        let toml_str = r#"
[[thresholds]]
id = "brake_pads"
action_label = "Replace brake pads"
distance_limit = 1500

[[thresholds]]
id = "tire_check"
action_label = "Tire check"
time_limit = 14
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let registry = config.registry().unwrap();

        let ids: Vec<_> = registry.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["brake_pads", "tire_check"]);
        assert_eq!(
            registry.get("brake_pads").unwrap().distance_limit,
            Some(1500.0)
        );
    }

    #[test]
    fn test_threshold_without_limits_fails_registry() {
        let toml_str = r#"
[[thresholds]]
id = "noop"
action_label = "Do nothing"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(matches!(config.registry(), Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("-05:00"), FixedOffset::west_opt(5 * 3600));
        assert_eq!(parse_utc_offset("+05:30"), FixedOffset::east_opt(5 * 3600 + 1800));
        assert_eq!(parse_utc_offset("+02"), FixedOffset::east_opt(2 * 3600));
        assert_eq!(parse_utc_offset("UTC"), FixedOffset::east_opt(0));
        assert_eq!(parse_utc_offset("05:00"), None);
        assert_eq!(parse_utc_offset("+25:00"), None);
        assert_eq!(parse_utc_offset(""), None);
    }

    #[test]
    fn test_invalid_offset_is_config_error() {
        let mut config = Config::default();
        config.bike.utc_offset = "Eastern".into();
        assert!(matches!(config.utc_offset(), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_load_from_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.notify.only_triggered = true;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert!(loaded.notify.only_triggered);
    }
}

//! Human-readable rendering of alert records.
//!
//! Sinks and notifiers consume these strings as-is; none of the decision
//! logic is repeated here.

use crate::AlertRecord;
use std::fmt;

impl AlertRecord {
    /// One console line: status, action, distance and days against limits
    pub fn summary_line(&self) -> String {
        let status = if self.triggered { "DUE" } else { "ok " };
        format!(
            "[{}] {:<20} {} | {}",
            status,
            self.action_label,
            self.distance_part(),
            self.days_part()
        )
    }

    /// Short title for a push-style notification
    pub fn notification_title(&self) -> String {
        format!("{} due", self.action_label)
    }

    /// Body for a push-style notification
    pub fn notification_message(&self) -> String {
        let mut parts = Vec::new();

        if let Some(limit) = self.distance_limit {
            parts.push(format!(
                "{:.1} miles since last action (limit {:.1})",
                self.distance_since, limit
            ));
        }
        if let Some(limit) = self.time_limit {
            if self.ever_performed() {
                parts.push(format!(
                    "{} days since last action (limit {})",
                    self.days_since, limit
                ));
            } else {
                parts.push(format!("never recorded (limit {} days)", limit));
            }
        }

        format!("{}: {}", self.action_label, parts.join(", "))
    }

    fn distance_part(&self) -> String {
        match self.distance_limit {
            Some(limit) => format!("{:.1}/{:.1} mi", self.distance_since, limit),
            None => format!("{:.1} mi", self.distance_since),
        }
    }

    fn days_part(&self) -> String {
        let days = if self.ever_performed() {
            self.days_since.to_string()
        } else {
            "never".to_string()
        };
        match self.time_limit {
            Some(limit) => format!("{}/{} days", days, limit),
            None => format!("{} days", days),
        }
    }
}

impl fmt::Display for AlertRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary_line())
    }
}

/// Plain-text digest of every triggered record, for email-style delivery
///
/// Returns `None` when nothing is due.
pub fn format_digest(alerts: &[AlertRecord]) -> Option<String> {
    let due: Vec<_> = alerts.iter().filter(|a| a.triggered).collect();
    if due.is_empty() {
        return None;
    }

    let mut body = String::from("The following maintenance actions are due:\n\n");
    for alert in due {
        let miles_limit = alert
            .distance_limit
            .map(|l| format!("{:.1}", l))
            .unwrap_or_else(|| "N/A".into());
        let days_limit = alert
            .time_limit
            .map(|l| l.to_string())
            .unwrap_or_else(|| "N/A".into());
        let days_since = if alert.ever_performed() {
            alert.days_since.to_string()
        } else {
            "never".into()
        };

        body.push_str(&format!("* {}:\n", alert.action_label));
        body.push_str(&format!(
            "  Miles since last: {:.1} (threshold: {})\n",
            alert.distance_since, miles_limit
        ));
        body.push_str(&format!(
            "  Days since last: {} (threshold: {})\n\n",
            days_since, days_limit
        ));
    }

    Some(body.trim_end().to_string())
}

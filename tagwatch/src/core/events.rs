/*!
Structured events describing every observable transition in the detection zone
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::registry::TagId;

/// Classification of zone transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// A previously unseen identifier was added to the registry
    Registered,
    /// A tag entered the detection zone
    Added,
    /// A tag left the detection zone
    Removed,
    /// A tag's display name changed
    Renamed,
    /// A tag's absence timeout changed
    TimeoutChanged,
    /// A tag stayed out of the zone past its configured timeout
    AbsenceAlert,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Registered => "registered",
            EventKind::Added => "added",
            EventKind::Removed => "removed",
            EventKind::Renamed => "renamed",
            EventKind::TimeoutChanged => "timeout_changed",
            EventKind::AbsenceAlert => "absence_alert",
        }
    }
}

/// One record in the append-only event history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub tag_id: TagId,
    pub display_name: String,
    pub summary: String,
}

impl TagEvent {
    pub fn new(
        kind: EventKind,
        tag_id: TagId,
        display_name: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            tag_id,
            display_name: display_name.into(),
            summary: summary.into(),
        }
    }

    /// Render the event as a text log line:
    /// `[YYYY-MM-DD HH:MM:SS] - <summary> (<tag id>)`
    pub fn log_line(&self) -> String {
        format!(
            "[{}] - {} ({})",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.summary,
            self.tag_id
        )
    }
}

/// Compact rendering of a duration in whole seconds: "45s", "5m", "1m30s", "2h5m"
pub fn humanize_secs(secs: u64) -> String {
    if secs == 0 {
        return "0s".to_string();
    }
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 {
        out.push_str(&format!("{seconds}s"));
    }
    out
}

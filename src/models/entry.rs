use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Completion state of a work form entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Pending,
    Completed,
}

/// One inspection form entry as the persistence gateway hands it back.
///
/// The collaboration layer never owns this data; it reads and mutates
/// specific fields through the gateway and forgets the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormEntry {
    pub id: String,
    pub work_order_id: String,
    /// Editable field values (condition, notes, ...)
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Ordered attachment URIs / data-URIs
    #[serde(default)]
    pub attachments: Vec<String>,
    pub status: EntryStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
}

impl FormEntry {
    pub fn new(id: impl Into<String>, work_order_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            work_order_id: work_order_id.into(),
            fields: Map::new(),
            attachments: Vec::new(),
            status: EntryStatus::Pending,
            completed_at: None,
            completed_by: None,
        }
    }
}

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{EntryGateway, GatewayError};
use crate::models::{EntryStatus, FormEntry};

/// In-process entry store.
///
/// Used when no fleet API is configured, and by the test suite. Nothing
/// survives a restart.
#[derive(Default)]
pub struct MemoryEntryGateway {
    entries: RwLock<HashMap<String, FormEntry>>,
}

impl MemoryEntryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-load an entry, mostly for tests and dev seeding.
    pub async fn insert_entry(&self, entry: FormEntry) {
        self.entries.write().await.insert(entry.id.clone(), entry);
    }
}

#[async_trait]
impl EntryGateway for MemoryEntryGateway {
    async fn read_entry(&self, entry_id: &str) -> Result<Option<FormEntry>, GatewayError> {
        Ok(self.entries.read().await.get(entry_id).cloned())
    }

    async fn write_field(
        &self,
        entry_id: &str,
        field: &str,
        value: &Value,
    ) -> Result<(), GatewayError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(entry_id)
            .ok_or_else(|| GatewayError::EntryNotFound(entry_id.to_string()))?;
        entry.fields.insert(field.to_string(), value.clone());
        Ok(())
    }

    async fn append_attachment(&self, entry_id: &str, uri: &str) -> Result<(), GatewayError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(entry_id)
            .ok_or_else(|| GatewayError::EntryNotFound(entry_id.to_string()))?;
        entry.attachments.push(uri.to_string());
        Ok(())
    }

    async fn mark_complete(&self, entry_id: &str, completed_by: &str) -> Result<(), GatewayError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(entry_id)
            .ok_or_else(|| GatewayError::EntryNotFound(entry_id.to_string()))?;
        entry.status = EntryStatus::Completed;
        entry.completed_at = Some(Utc::now());
        entry.completed_by = Some(completed_by.to_string());
        Ok(())
    }
}

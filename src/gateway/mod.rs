pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::FormEntry;

pub use memory::MemoryEntryGateway;

/// Errors surfaced by the persistence gateway.
///
/// All of them are connection-scoped: the triggering operation's broadcast is
/// suppressed and the caller alone is told, nothing else is affected.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("form entry '{0}' not found")]
    EntryNotFound(String),
    #[error("upstream request failed: {0}")]
    Upstream(String),
}

/// Durable store for work form entries.
///
/// The collaboration layer writes through this interface before any broadcast
/// is emitted; it never caches authoritative entry state itself.
#[async_trait]
pub trait EntryGateway: Send + Sync {
    async fn read_entry(&self, entry_id: &str) -> Result<Option<FormEntry>, GatewayError>;

    async fn write_field(
        &self,
        entry_id: &str,
        field: &str,
        value: &Value,
    ) -> Result<(), GatewayError>;

    /// Appends to the entry's attachment list, preserving existing entries.
    async fn append_attachment(&self, entry_id: &str, uri: &str) -> Result<(), GatewayError>;

    /// Marks the entry completed with a timestamp and the completing user.
    async fn mark_complete(&self, entry_id: &str, completed_by: &str) -> Result<(), GatewayError>;
}

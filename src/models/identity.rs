use serde::{Deserialize, Serialize};

/// Authenticated identity of a connection, established once at connect time
/// from the access token and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub organisation_id: String,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == "ADMIN"
    }
}

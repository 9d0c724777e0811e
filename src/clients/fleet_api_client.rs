use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::gateway::{EntryGateway, GatewayError};
use crate::models::FormEntry;

/// HTTP persistence gateway talking to the fleet API's internal form-entry
/// endpoints, authenticating with short-lived service tokens it mints itself.
#[derive(Debug)]
pub struct FleetApiClient {
    client: Client,
    base_url: String,
    jwt_secret: String,
    service_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(rename = "type")]
    type_: String,
    exp: usize,
}

impl FleetApiClient {
    pub fn new(base_url: String, jwt_secret: String, service_name: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            jwt_secret,
            service_name,
        }
    }

    fn generate_token(&self) -> String {
        let expiration = Utc::now()
            .checked_add_signed(Duration::seconds(60)) // 1 minute expiration
            .expect("valid timestamp")
            .timestamp();

        let claims = Claims {
            sub: self.service_name.clone(),
            type_: "service".to_string(),
            exp: expiration as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .expect("Failed to generate JWT")
    }

    async fn check_status(
        response: reqwest::Response,
        entry_id: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        match response.status() {
            StatusCode::NOT_FOUND => Err(GatewayError::EntryNotFound(entry_id.to_string())),
            status if status.is_success() => Ok(response),
            status => Err(GatewayError::Upstream(format!(
                "fleet API returned {}",
                status
            ))),
        }
    }
}

#[async_trait]
impl EntryGateway for FleetApiClient {
    async fn read_entry(&self, entry_id: &str) -> Result<Option<FormEntry>, GatewayError> {
        let url = format!("{}/internal/form-entries/{}", self.base_url, entry_id);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.generate_token()))
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check_status(response, entry_id).await?;
        let entry = response
            .json::<FormEntry>()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        Ok(Some(entry))
    }

    async fn write_field(
        &self,
        entry_id: &str,
        field: &str,
        value: &Value,
    ) -> Result<(), GatewayError> {
        let url = format!(
            "{}/internal/form-entries/{}/fields/{}",
            self.base_url, entry_id, field
        );
        let response = self
            .client
            .patch(&url)
            .header("Authorization", format!("Bearer {}", self.generate_token()))
            .json(&json!({ "value": value }))
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        Self::check_status(response, entry_id).await?;
        Ok(())
    }

    async fn append_attachment(&self, entry_id: &str, uri: &str) -> Result<(), GatewayError> {
        let url = format!(
            "{}/internal/form-entries/{}/attachments",
            self.base_url, entry_id
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.generate_token()))
            .json(&json!({ "uri": uri }))
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        Self::check_status(response, entry_id).await?;
        Ok(())
    }

    async fn mark_complete(&self, entry_id: &str, completed_by: &str) -> Result<(), GatewayError> {
        let url = format!(
            "{}/internal/form-entries/{}/complete",
            self.base_url, entry_id
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.generate_token()))
            .json(&json!({ "completedBy": completed_by }))
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        Self::check_status(response, entry_id).await?;
        Ok(())
    }
}

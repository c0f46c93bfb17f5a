use std::time::Duration;

use serde_json::{json, Value};

use crate::{error::ProviderError, types::ProviderConfig};

/// What the provider told us about an accepted `sendText` call.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: Option<String>,
    pub body: Value,
}

#[derive(Debug, Clone)]
pub struct EvolutionClient {
    http: reqwest::Client,
}

impl EvolutionClient {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    pub fn send_text_url(config: &ProviderConfig) -> String {
        format!(
            "{}/message/sendText/{}",
            config.base_url.trim().trim_end_matches('/'),
            config.instance_name
        )
    }

    /// Sends one text message. Any non-2xx status is an error; there is no retry.
    pub async fn send_text(
        &self,
        config: &ProviderConfig,
        number: &str,
        text: &str,
    ) -> Result<SendReceipt, ProviderError> {
        let response = self
            .http
            .post(Self::send_text_url(config))
            .header("apikey", &config.api_key)
            .json(&json!({ "number": number, "text": text }))
            .send()
            .await?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            tracing::warn!(
                instance = %config.instance_name,
                status = status.as_u16(),
                "evolution sendText rejected"
            );
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: raw_body,
            });
        }

        let body =
            serde_json::from_str::<Value>(&raw_body).unwrap_or_else(|_| json!({ "raw": raw_body }));
        let message_id = body
            .get("key")
            .and_then(|k| k.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(SendReceipt { message_id, body })
    }
}

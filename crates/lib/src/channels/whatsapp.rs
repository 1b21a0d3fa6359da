//! WhatsApp Cloud connector: sendMessage via the Graph API.

use crate::channels::{NotificationPayload, Notifier, NotifyError};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v20.0";

/// Per-call timeout so one hanging send cannot stall a reconciliation tick.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// WhatsApp Cloud channel connector. Credentials are optional at construction
/// so the service can start unconfigured; sends then fail with a config error.
pub struct WhatsAppChannel {
    base_url: String,
    token: Option<String>,
    phone_id: Option<String>,
    client: reqwest::Client,
}

impl WhatsAppChannel {
    pub fn new(token: Option<String>, phone_id: Option<String>) -> Self {
        Self::with_base_url(GRAPH_API_BASE.to_string(), token, phone_id)
    }

    /// Custom API base URL (for tests or proxies).
    pub fn with_base_url(
        base_url: String,
        token: Option<String>,
        phone_id: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            phone_id,
            client,
        }
    }

    fn credentials(&self) -> Result<(&str, &str), NotifyError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| NotifyError::Config("whatsapp token not configured".to_string()))?;
        let phone_id = self
            .phone_id
            .as_deref()
            .ok_or_else(|| NotifyError::Config("whatsapp phone id not configured".to_string()))?;
        Ok((token, phone_id))
    }

    /// POST /{phone_id}/messages with the given message object.
    async fn post_message(&self, body: serde_json::Value) -> Result<(), NotifyError> {
        let (token, phone_id) = self.credentials()?;
        let url = format!("{}/{}/messages", self.base_url, phone_id);
        let res = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(NotifyError::Api(format!("{} {}", status, text)));
        }
        Ok(())
    }

    /// Send a plain text message.
    pub async fn send_text(&self, to: &str, body: &str) -> Result<(), NotifyError> {
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body },
        }))
        .await
    }

    /// Send a named template message with ordered body parameters.
    pub async fn send_template(
        &self,
        to: &str,
        name: &str,
        language: &str,
        params: &[String],
    ) -> Result<(), NotifyError> {
        let parameters: Vec<serde_json::Value> = params
            .iter()
            .map(|p| json!({ "type": "text", "text": p }))
            .collect();
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "template",
            "template": {
                "name": name,
                "language": { "code": language },
                "components": [
                    { "type": "body", "parameters": parameters }
                ],
            },
        }))
        .await
    }
}

#[async_trait]
impl Notifier for WhatsAppChannel {
    async fn send(&self, to: &str, payload: &NotificationPayload) -> Result<(), NotifyError> {
        match payload {
            NotificationPayload::Text(body) => self.send_text(to, body).await,
            NotificationPayload::Template {
                name,
                language,
                params,
            } => self.send_template(to, name, language, params).await,
        }
    }
}

//! WhatsApp Business Cloud API adapter.
//!
//! Messages are posted to `{base}/{phone_number_id}/messages` with the connection's
//! bearer token. The returned `wamid` becomes the message's external id, which is
//! what delivery statuses reference later.

use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{ChannelAdapter, ChannelError, ChannelType, SentMessage};
use crate::whatsapp::Whatsapp;

#[derive(Debug, Clone)]
pub struct WhatsAppCloudAdapter {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentId>,
}

#[derive(Debug, Deserialize)]
struct SentId {
    id: String,
}

impl WhatsAppCloudAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn credentials<'a>(&self, connection: &'a Whatsapp) -> Result<(&'a str, &'a str), ChannelError> {
        let phone_number_id = connection
            .phone_number_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ChannelError::NotConfigured(connection.name.clone()))?;
        let access_token = connection
            .access_token
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ChannelError::NotConfigured(connection.name.clone()))?;
        Ok((phone_number_id, access_token))
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppCloudAdapter {
    fn kind(&self) -> ChannelType {
        ChannelType::Waba
    }

    async fn send_text(
        &self,
        connection: &Whatsapp,
        to: &str,
        body: &str,
    ) -> Result<SentMessage, ChannelError> {
        let (phone_number_id, access_token) = self.credentials(connection)?;
        let url = format!("{}/{}/messages", self.base_url, phone_number_id);

        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": {
                "body": body
            }
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("WhatsApp API error: {}", error_text);
            return Err(ChannelError::Api {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let parsed: SendResponse = response.json().await?;
        let external_id = parsed.messages.into_iter().next().map(|m| m.id);
        debug!("WhatsApp message sent to {to}: {external_id:?}");

        Ok(SentMessage { external_id })
    }
}

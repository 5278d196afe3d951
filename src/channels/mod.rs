//! Outbound messaging channels.
//!
//! Every connection (`whatsapps` row) names a channel kind; the registry maps that
//! kind to the adapter able to deliver messages through it.

pub mod whatsapp_cloud;

pub use whatsapp_cloud::WhatsAppCloudAdapter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::whatsapp::Whatsapp;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    WhatsApp,
    Waba,
    Telegram,
    Instagram,
    Messenger,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WhatsApp => "whatsapp",
            Self::Waba => "waba",
            Self::Telegram => "telegram",
            Self::Instagram => "instagram",
            Self::Messenger => "messenger",
        }
    }

    /// Channels whose webhooks report one message at a time, so unread counters
    /// add up instead of being replaced by the device's count.
    pub fn accumulates_unread(&self) -> bool {
        matches!(
            self,
            Self::Waba | Self::Telegram | Self::Instagram | Self::Messenger
        )
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelType {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "whatsapp" | "wa" => Ok(Self::WhatsApp),
            "waba" => Ok(Self::Waba),
            "telegram" | "tg" => Ok(Self::Telegram),
            "instagram" | "ig" => Ok(Self::Instagram),
            "messenger" => Ok(Self::Messenger),
            _ => Err(ChannelError::Unsupported(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Unsupported channel: {0}")]
    Unsupported(String),
    #[error("Connection not configured: {0}")]
    NotConfigured(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub external_id: Option<String>,
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn kind(&self) -> ChannelType;

    async fn send_text(
        &self,
        connection: &Whatsapp,
        to: &str,
        body: &str,
    ) -> Result<SentMessage, ChannelError>;
}

#[derive(Clone, Default)]
pub struct ChannelRegistry {
    adapters: HashMap<ChannelType, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: ChannelType) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Resolves the adapter for a connection's channel column.
    pub fn for_connection(
        &self,
        connection: &Whatsapp,
    ) -> Result<Arc<dyn ChannelAdapter>, ChannelError> {
        let kind: ChannelType = connection.channel.parse()?;
        self.get(kind)
            .ok_or_else(|| ChannelError::Unsupported(kind.to_string()))
    }

    pub async fn send_text(
        &self,
        connection: &Whatsapp,
        to: &str,
        body: &str,
    ) -> Result<SentMessage, ChannelError> {
        let adapter = self.for_connection(connection)?;
        adapter.send_text(connection, to, body).await
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_type_parse_aliases() {
        assert_eq!("WABA".parse::<ChannelType>().unwrap(), ChannelType::Waba);
        assert_eq!("ig".parse::<ChannelType>().unwrap(), ChannelType::Instagram);
        assert!("fax".parse::<ChannelType>().is_err());
    }

    #[test]
    fn test_accumulating_channels() {
        assert!(ChannelType::Waba.accumulates_unread());
        assert!(ChannelType::Telegram.accumulates_unread());
        assert!(!ChannelType::WhatsApp.accumulates_unread());
    }

    #[test]
    fn test_empty_registry_rejects() {
        let registry = ChannelRegistry::new();
        assert!(registry.get(ChannelType::Waba).is_none());
    }
}

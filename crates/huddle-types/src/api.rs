use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChannelId, Message, MessageId, Page, UserId};

// -- Messages --

/// Message author as embedded by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSender {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(default)]
    pub username: String,
}

/// Message document as the backend and other clients serialize it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(rename = "_id")]
    pub id: MessageId,
    #[serde(default, alias = "channel", skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    pub sender: WireSender,
    pub content: String,
    #[serde(alias = "createdAt")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
}

impl WireMessage {
    /// Convert to the domain model. `fallback_channel` is used when the
    /// document does not carry its channel (history responses omit it).
    pub fn into_message(self, fallback_channel: &ChannelId) -> Message {
        Message {
            id: self.id,
            channel_id: self.channel_id.unwrap_or_else(|| fallback_channel.clone()),
            sender_id: self.sender.id,
            sender_name: self.sender.username,
            content: self.content,
            created_at: self.timestamp,
            edited_at: self.edited_at,
            deleted: self.deleted,
        }
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            channel_id: Some(message.channel_id.clone()),
            sender: WireSender {
                id: message.sender_id.clone(),
                username: message.sender_name.clone(),
            },
            content: message.content.clone(),
            timestamp: message.created_at,
            edited: message.edited_at.is_some(),
            edited_at: message.edited_at,
            deleted: message.deleted,
        }
    }
}

/// `GET /messages/channel/{id}?limit&skip` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesPageResponse {
    pub messages: Vec<WireMessage>,
    pub total: u64,
    pub has_more: bool,
}

impl MessagesPageResponse {
    pub fn into_page(self, channel_id: &ChannelId) -> Page {
        Page {
            messages: self
                .messages
                .into_iter()
                .map(|m| m.into_message(channel_id))
                .collect(),
            total_count: self.total,
            has_more: self.has_more,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest<'a> {
    pub content: &'a str,
    pub channel_id: &'a ChannelId,
}

#[derive(Debug, Serialize)]
pub struct UpdateMessageRequest<'a> {
    pub content: &'a str,
}

// -- Channels --

/// Entry of `GET /channels`. Members are kept opaque; only their count is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSummary {
    #[serde(rename = "_id")]
    pub id: ChannelId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<serde_json::Value>,
}

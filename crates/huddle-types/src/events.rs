use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::WireMessage;
use crate::models::{ChannelId, MessageId, PresenceUser, UserId};

/// Events received FROM the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Another client posted a message
    ReceiveMessage(WireMessage),

    /// A message was edited
    #[serde(rename_all = "camelCase")]
    MessageEdited {
        #[serde(rename = "_id")]
        id: MessageId,
        channel_id: ChannelId,
        content: String,
        #[serde(default)]
        edited_at: Option<DateTime<Utc>>,
    },

    /// A message was deleted
    #[serde(rename_all = "camelCase")]
    MessageDeleted {
        #[serde(rename = "_id")]
        id: MessageId,
        channel_id: ChannelId,
    },

    /// A user started (or keeps) typing
    #[serde(rename = "user_typing", rename_all = "camelCase")]
    Typing {
        channel_id: ChannelId,
        user_id: UserId,
        username: String,
    },

    /// A user stopped typing
    #[serde(rename = "user_stop_typing", rename_all = "camelCase")]
    StopTyping {
        channel_id: ChannelId,
        user_id: UserId,
    },

    /// Full presence snapshot, sent once per channel subscription
    #[serde(rename_all = "camelCase")]
    ChannelOnlineUsers {
        channel_id: ChannelId,
        online_users: Vec<PresenceUser>,
    },

    #[serde(rename = "user_joined_channel", rename_all = "camelCase")]
    UserJoined {
        channel_id: ChannelId,
        user_id: UserId,
        username: String,
    },

    #[serde(rename = "user_left_channel", rename_all = "camelCase")]
    UserLeft {
        channel_id: ChannelId,
        user_id: UserId,
    },
}

impl StreamEvent {
    /// The channel this event is scoped to. `None` only for a message
    /// document that arrived without its channel, which cannot be routed.
    pub fn channel_id(&self) -> Option<&ChannelId> {
        match self {
            Self::ReceiveMessage(message) => message.channel_id.as_ref(),
            Self::MessageEdited { channel_id, .. }
            | Self::MessageDeleted { channel_id, .. }
            | Self::Typing { channel_id, .. }
            | Self::StopTyping { channel_id, .. }
            | Self::ChannelOnlineUsers { channel_id, .. }
            | Self::UserJoined { channel_id, .. }
            | Self::UserLeft { channel_id, .. } => Some(channel_id),
        }
    }

    /// Whether the event touches the message log (as opposed to presence/typing).
    pub fn is_message_event(&self) -> bool {
        matches!(
            self,
            Self::ReceiveMessage(_) | Self::MessageEdited { .. } | Self::MessageDeleted { .. }
        )
    }
}

/// Commands sent FROM the client TO the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamCommand {
    /// Identify this connection; sent once after every (re)connect
    #[serde(rename_all = "camelCase")]
    UserLogin { user_id: UserId, username: String },

    /// Subscribe to a channel's topic
    #[serde(rename_all = "camelCase")]
    JoinChannel { channel_id: ChannelId },

    /// Drop a channel topic subscription
    #[serde(rename_all = "camelCase")]
    LeaveChannel { channel_id: ChannelId },

    /// Fan out a message the backend already committed
    SendMessage(WireMessage),

    #[serde(rename_all = "camelCase")]
    EditMessage {
        #[serde(rename = "_id")]
        id: MessageId,
        channel_id: ChannelId,
        content: String,
        edited: bool,
        edited_at: Option<DateTime<Utc>>,
    },

    #[serde(rename_all = "camelCase")]
    DeleteMessage {
        #[serde(rename = "_id")]
        id: MessageId,
        channel_id: ChannelId,
    },

    #[serde(rename_all = "camelCase")]
    Typing { channel_id: ChannelId },

    #[serde(rename_all = "camelCase")]
    StopTyping { channel_id: ChannelId },
}

impl StreamCommand {
    /// Topic name on the wire, for logging.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::UserLogin { .. } => "user_login",
            Self::JoinChannel { .. } => "join_channel",
            Self::LeaveChannel { .. } => "leave_channel",
            Self::SendMessage(_) => "send_message",
            Self::EditMessage { .. } => "edit_message",
            Self::DeleteMessage { .. } => "delete_message",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
        }
    }
}

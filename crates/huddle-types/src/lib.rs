pub mod api;
pub mod events;
pub mod models;

pub use models::{ChannelId, Message, MessageId, Page, PageRequest, PresenceUser, UserId};

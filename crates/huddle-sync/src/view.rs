use huddle_types::{ChannelId, Message, PresenceUser};

use crate::session::SessionState;

/// Snapshot of the active channel for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelView {
    pub channel_id: ChannelId,
    pub state: SessionState,
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub total: u64,
    pub online_users: Vec<PresenceUser>,
    pub typing_users: Vec<String>,
}

impl ChannelView {
    pub fn typing_label(&self) -> Option<String> {
        typing_label(&self.typing_users)
    }
}

/// "bob is typing...", "bob and carol are typing...",
/// "bob, carol and 2 others are typing..."
pub fn typing_label(names: &[String]) -> Option<String> {
    match names {
        [] => None,
        [one] => Some(format!("{} is typing...", one)),
        [a, b] => Some(format!("{} and {} are typing...", a, b)),
        [a, b, rest @ ..] => Some(format!(
            "{}, {} and {} others are typing...",
            a,
            b,
            rest.len()
        )),
    }
}

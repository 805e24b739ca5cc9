use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, trace};

use huddle_types::api::WireMessage;
use huddle_types::events::{StreamCommand, StreamEvent};
use huddle_types::{ChannelId, Message, MessageId, Page, PageRequest, PresenceUser, UserId};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::presence::PresenceTracker;
use crate::store::MessageStore;
use crate::transport::{StreamTransport, TopicSubscription};
use crate::typing::TypingTracker;
use crate::view::ChannelView;

/// Lifecycle of one channel's live view.
///
/// Idle -> Loading -> Active -> Closing -> Closed. A failed initial load
/// falls back to Idle; a reconnect sends Active back through Loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Active,
    Closing,
    Closed,
}

/// Which message a live event touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageChange {
    Added(MessageId),
    Edited(MessageId),
    Deleted(MessageId),
}

/// What applying one stream event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventEffect {
    Messages(MessageChange),
    Presence,
    Typing,
    /// Held until the initial page lands.
    Buffered,
    /// Applied, but nothing visible changed (duplicate, unknown id).
    Unchanged,
    /// Wrong channel, or the session is shutting down.
    Ignored,
}

pub struct ChannelSession {
    channel_id: ChannelId,
    generation: u64,
    state: SessionState,
    store: MessageStore,
    presence: PresenceTracker,
    typing: TypingTracker,
    /// Message events that raced the initial fetch.
    pending: Vec<StreamEvent>,
    subscription: Option<TopicSubscription>,
    older_in_flight: bool,
}

impl ChannelSession {
    pub fn new(channel_id: ChannelId, config: &SyncConfig, self_id: UserId) -> Self {
        Self {
            channel_id,
            generation: 0,
            state: SessionState::Idle,
            store: MessageStore::new(config.page_limit),
            presence: PresenceTracker::new(),
            typing: TypingTracker::new(self_id, config.typing_ttl),
            pending: Vec::new(),
            subscription: None,
            older_in_flight: false,
        }
    }

    /// Enter Loading under a fresh generation and return the initial page
    /// request. Joins the channel topic on first open. Returns `None` once
    /// the session is closing.
    pub fn open(
        &mut self,
        generation: u64,
        stream: &Arc<dyn StreamTransport>,
    ) -> Option<PageRequest> {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return None;
        }
        if self.subscription.is_none() {
            self.subscription = Some(TopicSubscription::subscribe(
                Arc::clone(stream),
                self.channel_id.clone(),
            ));
        }
        debug!(
            "{} {:?} -> Loading (generation {})",
            self.channel_id, self.state, generation
        );
        self.generation = generation;
        self.state = SessionState::Loading;
        self.pending.clear();
        self.older_in_flight = false;
        Some(PageRequest::first(self.store.cursor().limit))
    }

    /// Re-join the topic after the link comes back.
    pub fn resubscribe(&self) -> Result<()> {
        match &self.subscription {
            Some(subscription) => subscription.resubscribe(),
            None => Ok(()),
        }
    }

    /// Apply the initial page. On success the session becomes Active and
    /// buffered events are replayed in arrival order.
    pub fn finish_initial_load(&mut self, generation: u64, result: Result<Page>) -> Result<usize> {
        if generation != self.generation || self.state != SessionState::Loading {
            return Err(SyncError::StaleSession);
        }

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                self.state = SessionState::Idle;
                self.pending.clear();
                return Err(e);
            }
        };

        self.store.load_initial(page);
        self.state = SessionState::Active;

        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            debug!("{} replaying {} buffered events", self.channel_id, pending.len());
        }
        for event in pending {
            self.apply(event);
        }

        info!(
            "{} active: {} messages (total {})",
            self.channel_id,
            self.store.len(),
            self.store.cursor().total
        );
        Ok(self.store.len())
    }

    /// Request for the next older page, or `None` if nothing remains or a
    /// request is already in flight.
    pub fn begin_older_load(&mut self) -> Result<Option<PageRequest>> {
        if self.state != SessionState::Active {
            return Err(SyncError::NoActiveChannel);
        }
        if self.older_in_flight {
            return Ok(None);
        }
        let request = self.store.next_page_request();
        self.older_in_flight = request.is_some();
        Ok(request)
    }

    pub fn finish_older_load(&mut self, generation: u64, result: Result<Page>) -> Result<usize> {
        if generation != self.generation || self.state != SessionState::Active {
            return Err(SyncError::StaleSession);
        }
        self.older_in_flight = false;
        self.store.prepend_page(result?)
    }

    /// Route one stream event into the store or the trackers.
    pub fn handle_event(&mut self, event: StreamEvent) -> EventEffect {
        if event.channel_id() != Some(&self.channel_id) {
            trace!("event for {:?} ignored by {}", event.channel_id(), self.channel_id);
            return EventEffect::Ignored;
        }

        match self.state {
            SessionState::Closing | SessionState::Closed => EventEffect::Ignored,
            SessionState::Loading if event.is_message_event() => {
                self.pending.push(event);
                EventEffect::Buffered
            }
            // The next snapshot covers it.
            SessionState::Idle if event.is_message_event() => EventEffect::Ignored,
            _ => self.apply(event),
        }
    }

    fn apply(&mut self, event: StreamEvent) -> EventEffect {
        let (changed, effect) = match event {
            StreamEvent::ReceiveMessage(wire) => {
                let message = wire.into_message(&self.channel_id);
                let id = message.id.clone();
                (
                    self.store.append_live(message),
                    EventEffect::Messages(MessageChange::Added(id)),
                )
            }
            StreamEvent::MessageEdited {
                id,
                content,
                edited_at,
                ..
            } => (
                self.store.apply_edit(&id, &content, edited_at),
                EventEffect::Messages(MessageChange::Edited(id)),
            ),
            StreamEvent::MessageDeleted { id, .. } => (
                self.store.apply_delete(&id),
                EventEffect::Messages(MessageChange::Deleted(id)),
            ),
            StreamEvent::Typing {
                user_id, username, ..
            } => (self.typing.mark_typing(user_id, username), EventEffect::Typing),
            StreamEvent::StopTyping { user_id, .. } => {
                (self.typing.clear_typing(&user_id), EventEffect::Typing)
            }
            StreamEvent::ChannelOnlineUsers { online_users, .. } => {
                self.presence.set_all(online_users);
                (true, EventEffect::Presence)
            }
            StreamEvent::UserJoined {
                user_id, username, ..
            } => (
                self.presence.add(PresenceUser { user_id, username }),
                EventEffect::Presence,
            ),
            StreamEvent::UserLeft { user_id, .. } => {
                (self.presence.remove(&user_id), EventEffect::Presence)
            }
        };
        if changed { effect } else { EventEffect::Unchanged }
    }

    /// Drop expired typing entries. Returns true if any were removed.
    pub fn expire_typing(&mut self) -> bool {
        !self.typing.expire().is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.typing.next_expiry()
    }

    // -- Confirmed local mutations --
    //
    // The backend response is applied first; the broadcast only tells the
    // other subscribers and never feeds back into local state.

    pub fn apply_sent(&mut self, message: Message) {
        let wire = WireMessage::from(&message);
        self.store.append_live(message);
        self.broadcast(StreamCommand::SendMessage(wire));
    }

    pub fn apply_edited(&mut self, message: &Message) {
        let edited_at = message.edited_at.or_else(|| Some(chrono::Utc::now()));
        self.store.apply_edit(&message.id, &message.content, edited_at);
        self.broadcast(StreamCommand::EditMessage {
            id: message.id.clone(),
            channel_id: self.channel_id.clone(),
            content: message.content.clone(),
            edited: true,
            edited_at,
        });
    }

    pub fn apply_deleted(&mut self, id: &MessageId) {
        self.store.apply_delete(id);
        self.broadcast(StreamCommand::DeleteMessage {
            id: id.clone(),
            channel_id: self.channel_id.clone(),
        });
    }

    /// Local composing signal. Unlike broadcasts, the caller sees the error.
    pub fn emit_typing(&self, typing: bool) -> Result<()> {
        let Some(subscription) = &self.subscription else {
            return Err(SyncError::NoActiveChannel);
        };
        let channel_id = self.channel_id.clone();
        subscription.try_emit(if typing {
            StreamCommand::Typing { channel_id }
        } else {
            StreamCommand::StopTyping { channel_id }
        })
    }

    fn broadcast(&self, command: StreamCommand) {
        if let Some(subscription) = &self.subscription {
            subscription.broadcast(command);
        }
    }

    /// Leave the topic and release everything. Results that arrive later
    /// are rejected as stale.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        if let Some(subscription) = self.subscription.take() {
            subscription.release();
        }
        self.pending.clear();
        self.older_in_flight = false;
        self.typing.clear();
        self.presence.clear();
        self.store.clear();
        self.state = SessionState::Closed;
        info!("{} closed (generation {})", self.channel_id, self.generation);
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    pub fn older_in_flight(&self) -> bool {
        self.older_in_flight
    }

    pub fn view(&self) -> ChannelView {
        ChannelView {
            channel_id: self.channel_id.clone(),
            state: self.state,
            messages: self.store.messages().to_vec(),
            has_more: self.store.has_more(),
            total: self.store.cursor().total,
            online_users: self.presence.users().to_vec(),
            typing_users: self
                .typing
                .active()
                .into_iter()
                .map(|e| e.username.clone())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::transport::testing::RecordingStream;
    use huddle_types::api::WireSender;

    fn message(channel: &str, n: i64) -> Message {
        Message {
            id: MessageId::new(format!("m{:03}", n)),
            channel_id: ChannelId::from(channel),
            sender_id: UserId::from("u2"),
            sender_name: "bob".into(),
            content: format!("message {}", n),
            created_at: Utc.timestamp_opt(1_700_000_000 + n, 0).unwrap(),
            edited_at: None,
            deleted: false,
        }
    }

    fn live(channel: &str, n: i64) -> StreamEvent {
        let m = message(channel, n);
        StreamEvent::ReceiveMessage(WireMessage {
            id: m.id,
            channel_id: Some(m.channel_id),
            sender: WireSender {
                id: m.sender_id,
                username: m.sender_name,
            },
            content: m.content,
            timestamp: m.created_at,
            edited: false,
            edited_at: None,
            deleted: false,
        })
    }

    fn page(channel: &str, range: std::ops::Range<i64>, total: u64) -> Page {
        Page {
            messages: range.map(|n| message(channel, n)).collect(),
            total_count: total,
            has_more: false,
        }
    }

    fn new_session(stream: &Arc<RecordingStream>) -> (ChannelSession, Arc<dyn StreamTransport>) {
        let stream: Arc<dyn StreamTransport> = stream.clone();
        let session = ChannelSession::new(
            ChannelId::from("general"),
            &SyncConfig::default(),
            UserId::from("me"),
        );
        (session, stream)
    }

    #[tokio::test]
    async fn test_open_load_activate() {
        let recorder = RecordingStream::new(true);
        let (mut session, stream) = new_session(&recorder);
        assert_eq!(session.state(), SessionState::Idle);

        let request = session.open(1, &stream).unwrap();
        assert_eq!(request, PageRequest { skip: 0, limit: 50 });
        assert_eq!(session.state(), SessionState::Loading);
        assert_eq!(recorder.topics(), vec!["join_channel"]);

        assert_eq!(session.finish_initial_load(1, Ok(page("general", 0..3, 3))), Ok(3));
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_events_during_loading_are_replayed() {
        let recorder = RecordingStream::new(true);
        let (mut session, stream) = new_session(&recorder);
        session.open(1, &stream);

        assert_eq!(session.handle_event(live("general", 5)), EventEffect::Buffered);
        assert_eq!(session.handle_event(live("general", 2)), EventEffect::Buffered);
        assert!(session.store().is_empty());

        session.finish_initial_load(1, Ok(page("general", 0..3, 3))).unwrap();
        let ids: Vec<&str> = session.store().messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m000", "m001", "m002", "m005"]);
    }

    #[tokio::test]
    async fn test_presence_and_typing_apply_while_loading() {
        let recorder = RecordingStream::new(true);
        let (mut session, stream) = new_session(&recorder);
        session.open(1, &stream);

        let joined = StreamEvent::UserJoined {
            channel_id: ChannelId::from("general"),
            user_id: UserId::from("u2"),
            username: "bob".into(),
        };
        assert_eq!(session.handle_event(joined.clone()), EventEffect::Presence);
        assert_eq!(session.handle_event(joined), EventEffect::Unchanged);

        let typing = StreamEvent::Typing {
            channel_id: ChannelId::from("general"),
            user_id: UserId::from("u2"),
            username: "bob".into(),
        };
        assert_eq!(session.handle_event(typing), EventEffect::Typing);
        assert_eq!(session.view().typing_users, vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn test_message_events_name_the_message() {
        let recorder = RecordingStream::new(true);
        let (mut session, stream) = new_session(&recorder);
        session.open(1, &stream);
        session.finish_initial_load(1, Ok(page("general", 0..2, 2))).unwrap();

        assert_eq!(
            session.handle_event(live("general", 5)),
            EventEffect::Messages(MessageChange::Added(MessageId::from("m005")))
        );
        let edited = StreamEvent::MessageEdited {
            id: MessageId::from("m000"),
            channel_id: ChannelId::from("general"),
            content: "fixed".into(),
            edited_at: None,
        };
        assert_eq!(
            session.handle_event(edited),
            EventEffect::Messages(MessageChange::Edited(MessageId::from("m000")))
        );
        let deleted = StreamEvent::MessageDeleted {
            id: MessageId::from("m001"),
            channel_id: ChannelId::from("general"),
        };
        assert_eq!(
            session.handle_event(deleted.clone()),
            EventEffect::Messages(MessageChange::Deleted(MessageId::from("m001")))
        );
        assert_eq!(session.handle_event(deleted), EventEffect::Unchanged);
    }

    #[tokio::test]
    async fn test_foreign_channel_events_are_ignored() {
        let recorder = RecordingStream::new(true);
        let (mut session, stream) = new_session(&recorder);
        session.open(1, &stream);
        session.finish_initial_load(1, Ok(page("general", 0..1, 1))).unwrap();

        assert_eq!(session.handle_event(live("random", 9)), EventEffect::Ignored);
        let snapshot = StreamEvent::ChannelOnlineUsers {
            channel_id: ChannelId::from("random"),
            online_users: vec![PresenceUser::new("u3", "carol")],
        };
        assert_eq!(session.handle_event(snapshot), EventEffect::Ignored);
        assert!(session.presence().is_empty());
        assert_eq!(session.store().len(), 1);
    }

    #[tokio::test]
    async fn test_superseded_generation_is_stale() {
        let recorder = RecordingStream::new(true);
        let (mut session, stream) = new_session(&recorder);
        session.open(1, &stream);
        session.open(2, &stream);

        assert_eq!(
            session.finish_initial_load(1, Ok(page("general", 0..3, 3))),
            Err(SyncError::StaleSession)
        );
        assert_eq!(session.state(), SessionState::Loading);
        assert!(session.store().is_empty());
    }

    #[tokio::test]
    async fn test_failed_load_returns_to_idle() {
        let recorder = RecordingStream::new(true);
        let (mut session, stream) = new_session(&recorder);
        session.open(1, &stream);
        session.handle_event(live("general", 1));

        let err = SyncError::HistoryFetchFailed("502".into());
        assert_eq!(session.finish_initial_load(1, Err(err.clone())), Err(err));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.handle_event(live("general", 2)), EventEffect::Ignored);
    }

    #[tokio::test]
    async fn test_close_releases_and_rejects_late_results() {
        let recorder = RecordingStream::new(true);
        let (mut session, stream) = new_session(&recorder);
        session.open(1, &stream);
        session.close();

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(recorder.topics(), vec!["join_channel", "leave_channel"]);
        assert_eq!(
            session.finish_initial_load(1, Ok(page("general", 0..3, 3))),
            Err(SyncError::StaleSession)
        );
        assert!(session.open(2, &stream).is_none());
    }

    #[tokio::test]
    async fn test_older_load_runs_once_per_cursor() {
        let recorder = RecordingStream::new(true);
        let (mut session, stream) = new_session(&recorder);
        session.open(1, &stream);
        let mut first = page("general", 10..20, 30);
        first.has_more = true;
        session.finish_initial_load(1, Ok(first)).unwrap();

        let request = session.begin_older_load().unwrap();
        assert_eq!(request, Some(PageRequest { skip: 10, limit: 50 }));
        assert_eq!(session.begin_older_load(), Ok(None));

        assert_eq!(session.finish_older_load(1, Ok(page("general", 0..10, 30))), Ok(10));
        assert!(!session.older_in_flight());
        assert_eq!(session.begin_older_load(), Ok(None));
    }

    #[tokio::test]
    async fn test_confirmed_mutations_broadcast() {
        let recorder = RecordingStream::new(true);
        let (mut session, stream) = new_session(&recorder);
        session.open(1, &stream);
        session.finish_initial_load(1, Ok(page("general", 0..2, 2))).unwrap();

        session.apply_sent(message("general", 7));
        let mut edited = message("general", 7);
        edited.content = "edited".into();
        session.apply_edited(&edited);
        session.apply_deleted(&MessageId::from("m000"));

        assert_eq!(
            recorder.topics(),
            vec!["join_channel", "send_message", "edit_message", "delete_message"]
        );
        let contents: Vec<&str> =
            session.store().messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["message 1", "edited"]);
    }
}

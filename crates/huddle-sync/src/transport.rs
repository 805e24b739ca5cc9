//! Seams to the outside world: the messaging backend (request/response)
//! and the stream connection (live events).

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use huddle_types::events::{StreamCommand, StreamEvent};
use huddle_types::{ChannelId, Message, MessageId, Page, PageRequest};

use crate::error::Result;

/// Request/response calls against the messaging backend.
pub trait MessagingBackend: Send + Sync + 'static {
    /// `GET /messages/channel/{id}?limit&skip`
    fn fetch_page(
        &self,
        channel_id: &ChannelId,
        request: PageRequest,
    ) -> impl Future<Output = Result<Page>> + Send;

    /// `POST /messages`
    fn create_message(
        &self,
        channel_id: &ChannelId,
        content: &str,
    ) -> impl Future<Output = Result<Message>> + Send;

    /// `PUT /messages/{id}`
    fn update_message(
        &self,
        channel_id: &ChannelId,
        id: &MessageId,
        content: &str,
    ) -> impl Future<Output = Result<Message>> + Send;

    /// `DELETE /messages/{id}`
    fn delete_message(&self, id: &MessageId) -> impl Future<Output = Result<()>> + Send;
}

/// Link state of the stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Closed, or reconnection gave up.
    Disconnected,
}

/// What the stream connection reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Link is up. `resumed` is false only for the first connection.
    Connected { resumed: bool },
    Disconnected,
    ReconnectFailed { attempts: u32 },
    Event(StreamEvent),
}

/// The single process-wide stream connection.
///
/// `emit` never queues: while the link is down it fails with
/// `TransportUnavailable` and the command is dropped.
pub trait StreamTransport: Send + Sync {
    fn emit(&self, command: StreamCommand) -> Result<()>;

    fn state(&self) -> ConnectionState;

    fn close(&self);
}

/// A channel topic subscription on the shared stream.
///
/// Owned by one ChannelSession; releasing it (explicitly or on drop) leaves
/// the topic. It can fan out channel-scoped commands but has no way to
/// close the underlying connection.
pub struct TopicSubscription {
    stream: Arc<dyn StreamTransport>,
    channel_id: ChannelId,
    released: bool,
}

impl TopicSubscription {
    /// Join the channel topic. A failed join is logged; `resubscribe` is
    /// called again once the link comes up.
    pub fn subscribe(stream: Arc<dyn StreamTransport>, channel_id: ChannelId) -> Self {
        let subscription = Self {
            stream,
            channel_id,
            released: false,
        };
        if let Err(e) = subscription.resubscribe() {
            debug!("join_channel {} deferred: {}", subscription.channel_id, e);
        }
        subscription
    }

    pub fn resubscribe(&self) -> Result<()> {
        self.stream.emit(StreamCommand::JoinChannel {
            channel_id: self.channel_id.clone(),
        })
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Fire-and-forget notification to the other subscribers of this topic.
    /// Failure is logged and never affects local state.
    pub fn broadcast(&self, command: StreamCommand) {
        let topic = command.topic();
        if let Err(e) = self.stream.emit(command) {
            warn!("broadcast {} on {} dropped: {}", topic, self.channel_id, e);
        }
    }

    /// Like `broadcast`, but hands the error back to the caller.
    pub fn try_emit(&self, command: StreamCommand) -> Result<()> {
        self.stream.emit(command)
    }

    pub fn release(mut self) {
        self.leave();
    }

    fn leave(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.stream.emit(StreamCommand::LeaveChannel {
            channel_id: self.channel_id.clone(),
        }) {
            debug!("leave_channel {} not sent: {}", self.channel_id, e);
        }
    }
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        self.leave();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;
    use crate::error::SyncError;

    /// In-memory stream that records every emitted command.
    pub struct RecordingStream {
        pub sent: Mutex<Vec<StreamCommand>>,
        pub connected: Mutex<bool>,
    }

    impl RecordingStream {
        pub fn new(connected: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                connected: Mutex::new(connected),
            })
        }

        pub fn topics(&self) -> Vec<&'static str> {
            self.sent.lock().unwrap().iter().map(|c| c.topic()).collect()
        }
    }

    impl StreamTransport for RecordingStream {
        fn emit(&self, command: StreamCommand) -> Result<()> {
            if !*self.connected.lock().unwrap() {
                return Err(SyncError::TransportUnavailable);
            }
            self.sent.lock().unwrap().push(command);
            Ok(())
        }

        fn state(&self) -> ConnectionState {
            if *self.connected.lock().unwrap() {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            }
        }

        fn close(&self) {
            *self.connected.lock().unwrap() = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingStream;
    use super::*;

    #[test]
    fn test_subscription_joins_and_leaves_once() {
        let stream = RecordingStream::new(true);
        let subscription = TopicSubscription::subscribe(stream.clone(), ChannelId::from("c1"));
        assert_eq!(subscription.channel_id().as_str(), "c1");
        subscription.release();
        assert_eq!(stream.topics(), vec!["join_channel", "leave_channel"]);
    }

    #[test]
    fn test_drop_releases_topic() {
        let stream = RecordingStream::new(true);
        {
            let _subscription = TopicSubscription::subscribe(stream.clone(), ChannelId::from("c1"));
        }
        assert_eq!(stream.topics(), vec!["join_channel", "leave_channel"]);
    }

    #[test]
    fn test_broadcast_while_disconnected_is_swallowed() {
        let stream = RecordingStream::new(false);
        let subscription = TopicSubscription::subscribe(stream.clone(), ChannelId::from("c1"));
        subscription.broadcast(StreamCommand::Typing {
            channel_id: ChannelId::from("c1"),
        });
        assert!(stream.topics().is_empty());
        assert_eq!(stream.state(), ConnectionState::Disconnected);
    }
}

//! Huddle realtime synchronization core.
//!
//! Reconciles paginated channel history (request/response) with the live
//! gateway stream (message create/edit/delete, typing, presence):
//! - MessageStore: ordered, id-unique message log with an offset cursor
//! - PresenceTracker / TypingTracker: per-channel membership and composing state
//! - ChannelSession: one channel's lifecycle (Idle -> Loading -> Active -> Closed)
//! - SyncController: the only owner of the backend and the stream connection
//!
//! I/O lives behind the `transport` traits; see `huddle-client` for the
//! reqwest and WebSocket implementations.

pub mod config;
pub mod controller;
pub mod error;
pub mod presence;
pub mod session;
pub mod store;
pub mod transport;
pub mod typing;
pub mod view;

pub use config::{SessionContext, SyncConfig};
pub use controller::{SyncController, SyncUpdate};
pub use error::{Result, SyncError};
pub use presence::PresenceTracker;
pub use session::{ChannelSession, EventEffect, MessageChange, SessionState};
pub use store::{MessageStore, PageCursor};
pub use transport::{
    ConnectionState, MessagingBackend, StreamTransport, TopicSubscription, TransportEvent,
};
pub use typing::{TypingEntry, TypingTracker};
pub use view::ChannelView;

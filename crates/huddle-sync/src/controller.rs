use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use huddle_types::{ChannelId, Message, MessageId, Page, PageRequest};

use crate::config::{SessionContext, SyncConfig};
use crate::error::{Result, SyncError};
use crate::session::{ChannelSession, EventEffect, MessageChange, SessionState};
use crate::transport::{ConnectionState, MessagingBackend, StreamTransport, TransportEvent};
use crate::view::ChannelView;

/// What changed after one step of the controller, for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncUpdate {
    ChannelLoaded { channel_id: ChannelId, count: usize },
    MessagesChanged { channel_id: ChannelId, change: MessageChange },
    OlderMessagesLoaded { channel_id: ChannelId, count: usize },
    PresenceChanged { channel_id: ChannelId },
    TypingChanged { channel_id: ChannelId },
    ConnectionChanged(ConnectionState),
    /// Initial load failed or timed out; the session is Idle until `retry_load`.
    LoadFailed { channel_id: ChannelId, error: SyncError },
    OlderMessagesFailed { channel_id: ChannelId, error: SyncError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Initial,
    Older,
}

/// A history fetch that resolved in its own task, tagged with the
/// generation that issued it.
struct FetchDone {
    channel_id: ChannelId,
    generation: u64,
    kind: FetchKind,
    result: Result<Page>,
}

/// Top-level orchestrator.
///
/// Owns the messaging backend, the single stream connection and the active
/// ChannelSession. All state is mutated from `&mut self`, one event at a
/// time; history fetches run in spawned tasks and report back through an
/// internal channel, where results from superseded generations are dropped.
///
/// Must be used from within a tokio runtime.
pub struct SyncController<B: MessagingBackend> {
    config: SyncConfig,
    context: SessionContext,
    backend: Arc<B>,
    stream: Arc<dyn StreamTransport>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    fetch_tx: mpsc::UnboundedSender<FetchDone>,
    fetch_rx: mpsc::UnboundedReceiver<FetchDone>,
    generation: u64,
    session: Option<ChannelSession>,
    local_typing_until: Option<Instant>,
}

impl<B: MessagingBackend> SyncController<B> {
    pub fn new(
        config: SyncConfig,
        context: SessionContext,
        backend: B,
        stream: Arc<dyn StreamTransport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        Self {
            config,
            context,
            backend: Arc::new(backend),
            stream,
            transport_events,
            fetch_tx,
            fetch_rx,
            generation: 0,
            session: None,
            local_typing_until: None,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.stream.state()
    }

    pub fn session(&self) -> Option<&ChannelSession> {
        self.session.as_ref()
    }

    pub fn active_channel(&self) -> Option<&ChannelId> {
        self.session.as_ref().map(ChannelSession::channel_id)
    }

    pub fn view(&self) -> Option<ChannelView> {
        self.session.as_ref().map(ChannelSession::view)
    }

    /// Close the current session (if any) and open `channel_id`: join its
    /// topic and start the initial history fetch. Selecting the channel that
    /// is already loading or active is a no-op.
    pub fn select_channel(&mut self, channel_id: ChannelId) {
        if let Some(current) = &self.session {
            if current.channel_id() == &channel_id
                && matches!(current.state(), SessionState::Loading | SessionState::Active)
            {
                return;
            }
        }

        self.close_session();

        let generation = self.next_generation();
        let self_id = self.context.user_id.clone();
        let mut session = ChannelSession::new(channel_id, &self.config, self_id);
        info!("selecting channel {}", session.channel_id());
        if let Some(request) = session.open(generation, &self.stream) {
            self.spawn_fetch(session.channel_id().clone(), generation, FetchKind::Initial, request);
        }
        self.session = Some(session);
    }

    /// Re-issue the initial load of an Idle session (after `LoadFailed`).
    pub fn retry_load(&mut self) -> Result<()> {
        match self.session.as_ref().map(ChannelSession::state) {
            Some(SessionState::Idle) => {}
            Some(SessionState::Loading) => return Ok(()),
            _ => return Err(SyncError::NoActiveChannel),
        }
        self.reload_session();
        Ok(())
    }

    /// Fetch the next older page. Returns false when nothing remains or a
    /// fetch is already in flight; the page itself arrives via `next_update`.
    pub fn load_older_messages(&mut self) -> Result<bool> {
        let session = self.session.as_mut().ok_or(SyncError::NoActiveChannel)?;
        let Some(request) = session.begin_older_load()? else {
            return Ok(false);
        };
        let channel_id = session.channel_id().clone();
        let generation = session.generation();
        debug!(
            "loading older messages for {} (skip {}, limit {})",
            channel_id, request.skip, request.limit
        );
        self.spawn_fetch(channel_id, generation, FetchKind::Older, request);
        Ok(true)
    }

    /// Post a message. Local state is updated from the backend's response;
    /// the stream broadcast that follows is best-effort. Mutations give up
    /// after `request_timeout` with `RequestFailed`.
    pub async fn send_message(&mut self, content: &str) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let channel_id = self.active_session()?.channel_id().clone();
        self.stop_local_typing();

        let limit = self.config.request_timeout;
        let message = bounded(limit, self.backend.create_message(&channel_id, content))
            .await
            .inspect_err(|e| warn!("send to {} failed: {}", channel_id, e))?;

        if let Some(session) = self.session_for(&channel_id) {
            session.apply_sent(message.clone());
        }
        Ok(message)
    }

    pub async fn edit_message(&mut self, id: &MessageId, content: &str) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let channel_id = self.active_session()?.channel_id().clone();

        let limit = self.config.request_timeout;
        let message = bounded(limit, self.backend.update_message(&channel_id, id, content))
            .await
            .inspect_err(|e| warn!("edit of {} failed: {}", id, e))?;

        if let Some(session) = self.session_for(&channel_id) {
            session.apply_edited(&message);
        }
        Ok(message)
    }

    pub async fn delete_message(&mut self, id: &MessageId) -> Result<()> {
        let channel_id = self.active_session()?.channel_id().clone();

        let limit = self.config.request_timeout;
        bounded(limit, self.backend.delete_message(id))
            .await
            .inspect_err(|e| warn!("delete of {} failed: {}", id, e))?;

        if let Some(session) = self.session_for(&channel_id) {
            session.apply_deleted(id);
        }
        Ok(())
    }

    /// The local user is composing. Emits `typing` and arms the idle timer
    /// that later emits `stop_typing`.
    pub fn notify_typing(&mut self) -> Result<()> {
        self.active_session()?.emit_typing(true)?;
        self.local_typing_until = Some(Instant::now() + self.config.local_typing_idle);
        Ok(())
    }

    /// Wait for the next inbound event, fetch result or timer, apply it and
    /// report what changed. Steps that change nothing visible are absorbed.
    /// Returns `None` once the stream connection has been torn down.
    pub async fn next_update(&mut self) -> Option<SyncUpdate> {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                Some(done) = self.fetch_rx.recv() => {
                    if let Some(update) = self.on_fetch(done) {
                        return Some(update);
                    }
                }
                event = self.transport_events.recv() => match event {
                    Some(event) => {
                        if let Some(update) = self.on_transport(event) {
                            return Some(update);
                        }
                    }
                    None => {
                        info!("stream connection closed");
                        return None;
                    }
                },
                _ = sleep_until(deadline) => {
                    if let Some(update) = self.on_timer() {
                        return Some(update);
                    }
                }
            }
        }
    }

    /// Close the active session and then the stream connection.
    pub fn shutdown(mut self) {
        self.close_session();
        self.stream.close();
        info!("sync controller shut down");
    }

    fn on_fetch(&mut self, done: FetchDone) -> Option<SyncUpdate> {
        let Some(session) = self.session.as_mut() else {
            debug!("dropping history for {}: no session", done.channel_id);
            return None;
        };
        if session.channel_id() != &done.channel_id {
            debug!(
                "dropping stale history for {} (active {})",
                done.channel_id,
                session.channel_id()
            );
            return None;
        }
        let channel_id = done.channel_id;

        match done.kind {
            FetchKind::Initial => match session.finish_initial_load(done.generation, done.result) {
                Ok(count) => Some(SyncUpdate::ChannelLoaded { channel_id, count }),
                Err(SyncError::StaleSession) => {
                    debug!(
                        "dropping stale initial page for {} (generation {})",
                        channel_id, done.generation
                    );
                    None
                }
                Err(error) => {
                    warn!("initial load of {} failed: {}", channel_id, error);
                    Some(SyncUpdate::LoadFailed { channel_id, error })
                }
            },
            FetchKind::Older => match session.finish_older_load(done.generation, done.result) {
                Ok(count) => Some(SyncUpdate::OlderMessagesLoaded { channel_id, count }),
                Err(SyncError::StaleSession) => {
                    debug!(
                        "dropping stale older page for {} (generation {})",
                        channel_id, done.generation
                    );
                    None
                }
                Err(SyncError::OutOfOrderPage) => {
                    warn!("dropping out-of-order history page for {}", channel_id);
                    None
                }
                Err(error) => {
                    warn!("older history for {} failed: {}", channel_id, error);
                    Some(SyncUpdate::OlderMessagesFailed { channel_id, error })
                }
            },
        }
    }

    fn on_transport(&mut self, event: TransportEvent) -> Option<SyncUpdate> {
        match event {
            TransportEvent::Connected { resumed } => {
                info!("stream connected (resumed: {})", resumed);
                let mut resync = false;
                if let Some(session) = &self.session {
                    if let Err(e) = session.resubscribe() {
                        warn!("re-joining {} failed: {}", session.channel_id(), e);
                    }
                    resync = match session.state() {
                        SessionState::Idle => true,
                        SessionState::Loading | SessionState::Active => resumed,
                        SessionState::Closing | SessionState::Closed => false,
                    };
                }
                // Snapshot wins: anything missed during the outage comes back
                // with a fresh initial page. An Idle session (failed load) gets
                // its first page now instead of waiting for `retry_load`.
                if resync {
                    info!("resyncing after reconnect");
                    self.reload_session();
                }
                Some(SyncUpdate::ConnectionChanged(ConnectionState::Connected))
            }
            TransportEvent::Disconnected => {
                warn!("stream disconnected");
                self.local_typing_until = None;
                Some(SyncUpdate::ConnectionChanged(self.stream.state()))
            }
            TransportEvent::ReconnectFailed { attempts } => {
                warn!("stream reconnect gave up after {} attempts", attempts);
                Some(SyncUpdate::ConnectionChanged(ConnectionState::Disconnected))
            }
            TransportEvent::Event(event) => {
                let session = self.session.as_mut()?;
                let channel_id = session.channel_id().clone();
                match session.handle_event(event) {
                    EventEffect::Messages(change) => {
                        Some(SyncUpdate::MessagesChanged { channel_id, change })
                    }
                    EventEffect::Presence => Some(SyncUpdate::PresenceChanged { channel_id }),
                    EventEffect::Typing => Some(SyncUpdate::TypingChanged { channel_id }),
                    effect => {
                        trace!("event on {} absorbed: {:?}", channel_id, effect);
                        None
                    }
                }
            }
        }
    }

    fn on_timer(&mut self) -> Option<SyncUpdate> {
        if self.local_typing_until.is_some_and(|until| until <= Instant::now()) {
            self.stop_local_typing();
        }
        let session = self.session.as_mut()?;
        session.expire_typing().then(|| SyncUpdate::TypingChanged {
            channel_id: session.channel_id().clone(),
        })
    }

    fn next_deadline(&self) -> Option<Instant> {
        let typing = self.session.as_ref().and_then(ChannelSession::next_deadline);
        match (typing, self.local_typing_until) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Put the current session back into Loading under a new generation.
    fn reload_session(&mut self) {
        let generation = self.next_generation();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(request) = session.open(generation, &self.stream) {
            let channel_id = session.channel_id().clone();
            self.spawn_fetch(channel_id, generation, FetchKind::Initial, request);
        }
    }

    fn close_session(&mut self) {
        self.stop_local_typing();
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }

    /// Emit `stop_typing` if a local typing signal is outstanding.
    fn stop_local_typing(&mut self) {
        if self.local_typing_until.take().is_none() {
            return;
        }
        if let Some(session) = &self.session {
            if let Err(e) = session.emit_typing(false) {
                trace!("stop_typing not sent: {}", e);
            }
        }
    }

    fn active_session(&self) -> Result<&ChannelSession> {
        self.session
            .as_ref()
            .filter(|s| s.state() == SessionState::Active)
            .ok_or(SyncError::NoActiveChannel)
    }

    fn session_for(&mut self, channel_id: &ChannelId) -> Option<&mut ChannelSession> {
        self.session
            .as_mut()
            .filter(|s| s.channel_id() == channel_id && s.state() == SessionState::Active)
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn spawn_fetch(
        &self,
        channel_id: ChannelId,
        generation: u64,
        kind: FetchKind,
        request: PageRequest,
    ) {
        let backend = Arc::clone(&self.backend);
        let tx = self.fetch_tx.clone();
        let limit = match kind {
            FetchKind::Initial => self.config.load_timeout,
            FetchKind::Older => self.config.request_timeout,
        };

        tokio::spawn(async move {
            let fetch = backend.fetch_page(&channel_id, request);
            let result = match tokio::time::timeout(limit, fetch).await {
                Ok(result) => result,
                Err(_) if kind == FetchKind::Initial => Err(SyncError::LoadTimeout(limit)),
                Err(_) => {
                    let detail = format!("timed out after {:?}", limit);
                    Err(SyncError::HistoryFetchFailed(detail))
                }
            };
            // Receiver gone means the controller was dropped.
            let _ = tx.send(FetchDone {
                channel_id,
                generation,
                kind,
                result,
            });
        });
    }
}

/// Await a backend mutation, failing with `RequestFailed` past `limit`.
async fn bounded<T>(limit: Duration, request: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, request).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::RequestFailed(format!("timed out after {:?}", limit))),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

use std::time::Duration;

use huddle_types::UserId;

/// Default history page size, matching the backend's default `limit`.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Bound on the initial Loading state.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_millis(3000);

/// Bound on older-page fetches and send/edit/delete requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote typing indicators expire this long after the last `typing` signal.
pub const DEFAULT_TYPING_TTL: Duration = Duration::from_millis(3000);

/// Timing and paging knobs for the sync core.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub page_limit: usize,
    pub load_timeout: Duration,
    pub request_timeout: Duration,
    pub typing_ttl: Duration,
    /// After this long without local keystrokes a `stop_typing` is emitted.
    pub local_typing_idle: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_limit: DEFAULT_PAGE_LIMIT,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            typing_ttl: DEFAULT_TYPING_TTL,
            local_typing_idle: DEFAULT_TYPING_TTL,
        }
    }
}

impl SyncConfig {
    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit.max(1);
        self
    }
}

/// The authenticated user, passed in explicitly at construction.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_id: UserId,
    pub username: String,
    pub token: String,
}

impl SessionContext {
    pub fn new(
        user_id: impl Into<UserId>,
        username: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            token: token.into(),
        }
    }
}

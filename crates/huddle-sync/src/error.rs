//! Error types for the sync layer

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the sync layer.
///
/// None of these are fatal: after any of them the controller is either
/// Idle or Active for the selected channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The stream is not connected. Nothing is queued; the caller re-issues.
    #[error("stream transport unavailable")]
    TransportUnavailable,

    /// Paginated history fetch failed (network or server error)
    #[error("history fetch failed: {0}")]
    HistoryFetchFailed(String),

    /// A history page was not strictly older than the loaded log
    #[error("history page is not older than the oldest loaded message")]
    OutOfOrderPage,

    /// Result of a superseded channel session
    #[error("result belongs to a superseded channel session")]
    StaleSession,

    /// The initial history load did not resolve in time
    #[error("initial history load timed out after {0:?}")]
    LoadTimeout(Duration),

    /// Send/edit/delete request was rejected or did not reach the backend
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("no active channel")]
    NoActiveChannel,

    #[error("message content is empty")]
    EmptyMessage,
}

impl SyncError {
    /// Whether the caller can retry the operation that produced this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable
                | Self::HistoryFetchFailed(_)
                | Self::LoadTimeout(_)
                | Self::RequestFailed(_)
        )
    }

    /// Internal invariant violations and stale results stay inside the core.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::OutOfOrderPage | Self::StaleSession)
    }
}

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use huddle_types::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEntry {
    pub user_id: UserId,
    pub username: String,
    pub expires_at: Instant,
}

/// Users composing in one channel. Entries expire on their own clock:
/// a client that goes silent disappears after `ttl` with no further events.
#[derive(Debug)]
pub struct TypingTracker {
    self_id: UserId,
    ttl: Duration,
    entries: Vec<TypingEntry>,
}

impl TypingTracker {
    pub fn new(self_id: UserId, ttl: Duration) -> Self {
        Self {
            self_id,
            ttl,
            entries: Vec::new(),
        }
    }

    /// Insert or refresh an entry. The local user's own signals are ignored.
    /// Returns true if the visible set changed.
    pub fn mark_typing(&mut self, user_id: UserId, username: String) -> bool {
        if user_id == self.self_id {
            return false;
        }
        let expires_at = Instant::now() + self.ttl;
        if let Some(entry) = self.entries.iter_mut().find(|e| e.user_id == user_id) {
            entry.expires_at = expires_at;
            entry.username = username;
            return false;
        }
        self.entries.push(TypingEntry {
            user_id,
            username,
            expires_at,
        });
        true
    }

    /// Remove an entry immediately. Returns true if it was present.
    pub fn clear_typing(&mut self, user_id: &UserId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.user_id != user_id);
        self.entries.len() != before
    }

    /// Drop every entry whose deadline has passed. Returns the removed ids.
    pub fn expire(&mut self) -> Vec<UserId> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.entries.retain(|e| {
            if e.expires_at <= now {
                trace!("typing indicator for {} expired", e.user_id);
                expired.push(e.user_id.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    /// Earliest pending expiry; the owner sleeps until then.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.expires_at).min()
    }

    /// Entries still live right now, in the order users started typing.
    pub fn active(&self) -> Vec<&TypingEntry> {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.expires_at > now).collect()
    }

    pub fn is_typing(&self, user_id: &UserId) -> bool {
        self.active().iter().any(|e| &e.user_id == user_id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> TypingTracker {
        TypingTracker::new(UserId::from("me"), Duration::from_millis(3000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_without_further_signals() {
        let mut typing = tracker();
        let bob = UserId::from("u2");
        assert!(typing.mark_typing(bob.clone(), "bob".into()));
        assert!(typing.is_typing(&bob));

        tokio::time::advance(Duration::from_millis(2999)).await;
        assert!(typing.is_typing(&bob));
        assert!(typing.expire().is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!typing.is_typing(&bob));
        assert_eq!(typing.expire(), vec![bob]);
        assert_eq!(typing.next_expiry(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_deadline() {
        let mut typing = tracker();
        let bob = UserId::from("u2");
        typing.mark_typing(bob.clone(), "bob".into());
        tokio::time::advance(Duration::from_millis(2000)).await;
        assert!(!typing.mark_typing(bob.clone(), "bob".into()));

        tokio::time::advance(Duration::from_millis(2000)).await;
        assert!(typing.is_typing(&bob));
        assert!(typing.expire().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_signals_are_excluded() {
        let mut typing = tracker();
        assert!(!typing.mark_typing(UserId::from("me"), "me".into()));
        assert!(typing.active().is_empty());
        assert_eq!(typing.next_expiry(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_clears_immediately() {
        let mut typing = tracker();
        typing.mark_typing(UserId::from("u2"), "bob".into());
        typing.mark_typing(UserId::from("u3"), "carol".into());
        assert!(typing.clear_typing(&UserId::from("u2")));
        assert!(!typing.clear_typing(&UserId::from("u2")));
        let names: Vec<&str> = typing.active().iter().map(|e| e.username.as_str()).collect();
        assert_eq!(names, vec!["carol"]);
    }
}

use huddle_types::{PresenceUser, UserId};

/// Users currently connected to one channel, in arrival order.
///
/// Channel scoping is enforced by the owning session, which drops events
/// whose `channelId` is not its own before they get here.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    users: Vec<PresenceUser>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace membership with a full snapshot. Duplicate ids keep the first entry.
    pub fn set_all(&mut self, users: Vec<PresenceUser>) {
        self.users.clear();
        for user in users {
            if !self.contains(&user.user_id) {
                self.users.push(user);
            }
        }
    }

    /// Returns false if the user was already present.
    pub fn add(&mut self, user: PresenceUser) -> bool {
        if self.contains(&user.user_id) {
            return false;
        }
        self.users.push(user);
        true
    }

    /// Returns false if the user was not present.
    pub fn remove(&mut self, user_id: &UserId) -> bool {
        let before = self.users.len();
        self.users.retain(|u| &u.user_id != user_id);
        self.users.len() != before
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.users.iter().any(|u| &u.user_id == user_id)
    }

    pub fn users(&self) -> &[PresenceUser] {
        &self.users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove_are_idempotent() {
        let mut presence = PresenceTracker::new();
        assert!(presence.add(PresenceUser::new("u1", "alice")));
        assert!(!presence.add(PresenceUser::new("u1", "alice")));
        assert_eq!(presence.len(), 1);

        assert!(presence.remove(&UserId::from("u1")));
        assert!(!presence.remove(&UserId::from("u1")));
        assert!(presence.is_empty());
    }

    #[test]
    fn test_snapshot_replaces_membership() {
        let mut presence = PresenceTracker::new();
        presence.add(PresenceUser::new("u9", "zed"));
        presence.set_all(vec![
            PresenceUser::new("u1", "alice"),
            PresenceUser::new("u2", "bob"),
            PresenceUser::new("u1", "alice"),
        ]);
        assert_eq!(presence.len(), 2);
        assert!(!presence.contains(&UserId::from("u9")));
        assert_eq!(presence.users()[1].username, "bob");
    }
}

//! Ordered, id-unique message log for the active channel.
//!
//! History only ever prepends and live traffic only ever appends, so the
//! log stays sorted oldest -> newest by insertion position without re-sorting.
//! Edits and deletes are positional.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use huddle_types::{Message, MessageId, Page, PageRequest};

use crate::error::{Result, SyncError};

/// Offset pagination state.
///
/// `skip` counts the rows this client holds from the newest end of the
/// server's log: the initial page, every prepended page and every live
/// append, minus deletions. The next older page therefore starts at `skip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub skip: usize,
    pub limit: usize,
    pub total: u64,
    pub has_more: bool,
}

impl PageCursor {
    fn empty(limit: usize) -> Self {
        Self {
            skip: 0,
            limit,
            total: 0,
            has_more: false,
        }
    }
}

pub struct MessageStore {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    cursor: PageCursor,
}

impl MessageStore {
    pub fn new(page_limit: usize) -> Self {
        Self {
            messages: Vec::new(),
            ids: HashSet::new(),
            cursor: PageCursor::empty(page_limit),
        }
    }

    /// Replace the whole log with the newest page.
    pub fn load_initial(&mut self, page: Page) {
        self.messages.clear();
        self.ids.clear();
        self.cursor = PageCursor {
            skip: 0,
            limit: self.cursor.limit,
            total: page.total_count,
            has_more: page.has_more,
        };

        for message in page.messages {
            if self.ids.insert(message.id.clone()) {
                self.messages.push(message);
            } else {
                debug!("duplicate message {} in initial page dropped", message.id);
            }
        }
        self.cursor.skip = self.messages.len();
    }

    /// Insert an older page before the current oldest entry.
    ///
    /// Fails with `OutOfOrderPage`, leaving the store untouched, unless the
    /// page's newest message is strictly older than the current oldest.
    pub fn prepend_page(&mut self, page: Page) -> Result<usize> {
        if let (Some(page_newest), Some(oldest)) = (page.newest(), self.messages.first()) {
            if !page_newest.is_older_than(oldest) {
                return Err(SyncError::OutOfOrderPage);
            }
        }
        if page
            .messages
            .windows(2)
            .any(|pair| !pair[0].is_older_than(&pair[1]))
        {
            return Err(SyncError::OutOfOrderPage);
        }

        let count = page.messages.len();
        for message in &page.messages {
            self.ids.insert(message.id.clone());
        }
        self.messages.splice(0..0, page.messages);

        self.cursor.skip += count;
        self.cursor.total = page.total_count;
        self.cursor.has_more = page.has_more;
        Ok(count)
    }

    /// Append a live message. Returns false if the id is already present.
    pub fn append_live(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            trace!("message {} already in log", message.id);
            return false;
        }
        self.ids.insert(message.id.clone());
        self.messages.push(message);
        self.cursor.skip += 1;
        self.cursor.total += 1;
        true
    }

    /// Update content in place. Absent ids and edits older than the stored
    /// one are ignored (last write wins).
    pub fn apply_edit(
        &mut self,
        id: &MessageId,
        content: &str,
        edited_at: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| &m.id == id) else {
            return false;
        };
        if let (Some(current), Some(incoming)) = (message.edited_at, edited_at) {
            if incoming < current {
                debug!("stale edit for {} ignored", id);
                return false;
            }
        }
        message.content = content.to_string();
        message.edited_at = edited_at.or(message.edited_at).or_else(|| Some(Utc::now()));
        true
    }

    /// Remove an entry. No-op if absent.
    pub fn apply_delete(&mut self, id: &MessageId) -> bool {
        if !self.ids.remove(id) {
            return false;
        }
        self.messages.retain(|m| &m.id != id);
        self.cursor.skip = self.cursor.skip.saturating_sub(1);
        self.cursor.total = self.cursor.total.saturating_sub(1);
        true
    }

    pub fn has_more(&self) -> bool {
        self.cursor.has_more
    }

    /// The `{skip, limit}` for the next older page, if any remains.
    pub fn next_page_request(&self) -> Option<PageRequest> {
        self.cursor.has_more.then_some(PageRequest {
            skip: self.cursor.skip,
            limit: self.cursor.limit,
        })
    }

    pub fn cursor(&self) -> PageCursor {
        self.cursor
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        if !self.ids.contains(id) {
            return None;
        }
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
        self.cursor = PageCursor::empty(self.cursor.limit);
    }
}

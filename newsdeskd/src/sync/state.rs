use newsdesk_core::{Article, Bookmark, LOCAL_ID_PREFIX};
use time::OffsetDateTime;
use uuid::Uuid;

use super::queue::{DeleteTarget, Operation, OperationQueue};

pub fn new_local_id() -> String {
    format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4())
}

/// Builds an unacknowledged bookmark for `article`, stamped now.
pub fn local_bookmark(user_id: &str, article: Article) -> Bookmark {
    Bookmark {
        id: new_local_id(),
        user_id: user_id.to_string(),
        article,
        saved_at: OffsetDateTime::now_utc(),
    }
}

/// Everything the engine holds for the signed-in user.
#[derive(Debug, Clone)]
pub struct SyncState {
    pub user_id: String,
    pub bookmarks: Vec<Bookmark>,
    pub queue: OperationQueue,
    /// Deletes sent directly and not settled yet. Never persisted.
    pub deleting: Vec<DeleteTarget>,
    pub loading: bool,
    pub credential_rejected: bool,
}

impl SyncState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            bookmarks: Vec::new(),
            queue: OperationQueue::default(),
            deleting: Vec::new(),
            loading: false,
            credential_rejected: false,
        }
    }

    /// Replaces the optimistic entry for `record`'s url with the server's copy.
    /// Returns false when the url is no longer in the list.
    pub fn promote(&mut self, record: Bookmark) -> bool {
        match self
            .bookmarks
            .iter_mut()
            .find(|bookmark| bookmark.url() == record.url())
        {
            Some(slot) => {
                if slot.is_local() {
                    *slot = record;
                }
                true
            }
            None => false,
        }
    }

    /// True when a queued or in-flight delete still targets `bookmark`.
    pub fn is_being_deleted(&self, bookmark: &Bookmark) -> bool {
        self.queue.has_pending_delete(bookmark)
            || self.deleting.iter().any(|target| target.matches(bookmark))
    }

    pub fn finish_delete(&mut self, target: &DeleteTarget) {
        if let Some(index) = self.deleting.iter().position(|t| t == target) {
            self.deleting.remove(index);
        }
    }

    /// Drops the optimistic entry for `url` if the server never acknowledged it.
    pub fn roll_back_local(&mut self, url: &str) -> bool {
        let before = self.bookmarks.len();
        self.bookmarks
            .retain(|bookmark| !(bookmark.is_local() && bookmark.url() == url));
        self.bookmarks.len() != before
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            user_id: Some(self.user_id.clone()),
            bookmarks: self.bookmarks.clone(),
            pending: self.queue.to_vec(),
            loading: self.loading,
            credential_rejected: self.credential_rejected,
        }
    }
}

/// Read-only view published to subscribers after every state change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSnapshot {
    pub user_id: Option<String>,
    pub bookmarks: Vec<Bookmark>,
    pub pending: Vec<Operation>,
    pub loading: bool,
    pub credential_rejected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ids_are_unique_and_prefixed() {
        let a = new_local_id();
        let b = new_local_id();
        assert!(a.starts_with(LOCAL_ID_PREFIX));
        assert_ne!(a, b);
    }

    #[test]
    fn promote_swaps_only_local_entries() {
        let mut state = SyncState::new("alice");
        let optimistic = local_bookmark("alice", Article::new("/a"));
        state.bookmarks.push(optimistic.clone());

        let mut record = optimistic.clone();
        record.id = "srv-1".into();
        assert!(state.promote(record.clone()));
        assert_eq!(state.bookmarks, vec![record.clone()]);

        let mut newer = record.clone();
        newer.id = "srv-2".into();
        assert!(state.promote(newer));
        assert_eq!(state.bookmarks[0].id, "srv-1");

        assert!(!state.promote(local_bookmark("alice", Article::new("/gone"))));
    }

    #[test]
    fn in_flight_and_queued_deletes_both_count() {
        let mut state = SyncState::new("alice");
        let mut record = local_bookmark("alice", Article::new("/a"));
        record.id = "srv-1".into();

        assert!(!state.is_being_deleted(&record));
        state.deleting.push(DeleteTarget::Id("srv-1".into()));
        assert!(state.is_being_deleted(&record));

        state.finish_delete(&DeleteTarget::Id("srv-1".into()));
        assert!(!state.is_being_deleted(&record));

        state
            .queue
            .enqueue(Operation::delete(DeleteTarget::Url("/a".into())));
        assert!(state.is_being_deleted(&record));
    }

    #[test]
    fn roll_back_keeps_acknowledged_records() {
        let mut state = SyncState::new("alice");
        let optimistic = local_bookmark("alice", Article::new("/a"));
        let mut acknowledged = local_bookmark("alice", Article::new("/b"));
        acknowledged.id = "srv-2".into();
        state.bookmarks = vec![optimistic, acknowledged.clone()];

        assert!(state.roll_back_local("/a"));
        assert!(!state.roll_back_local("/b"));
        assert_eq!(state.bookmarks, vec![acknowledged]);
    }
}

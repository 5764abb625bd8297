use newsdesk_core::{Article, Bookmark};

use crate::storage::{CacheStore, GUEST_BOOKMARKS_KEY};
use crate::sync::reconcile::{dedup_by_url, find_by_url, position_of};
use crate::sync::state::local_bookmark;

/// Bookmarks for a reader who is not signed in. Lives only in the local cache.
pub struct GuestStore {
    cache: CacheStore,
    bookmarks: Vec<Bookmark>,
}

impl GuestStore {
    pub async fn load(cache: CacheStore) -> Self {
        let mut bookmarks = cache.load_list(GUEST_BOOKMARKS_KEY).await;
        dedup_by_url(&mut bookmarks);
        Self { cache, bookmarks }
    }

    pub fn list(&self) -> &[Bookmark] {
        &self.bookmarks
    }

    pub fn is_saved(&self, url: &str) -> bool {
        find_by_url(&self.bookmarks, url).is_some()
    }

    /// Saves `article`, or returns the bookmark already holding its url.
    pub async fn add(&mut self, article: Article) -> Bookmark {
        if let Some(existing) = find_by_url(&self.bookmarks, &article.url) {
            return existing.clone();
        }
        let bookmark = local_bookmark("", article);
        self.bookmarks.insert(0, bookmark.clone());
        self.persist().await;
        bookmark
    }

    pub async fn remove(&mut self, id_or_url: &str) -> Option<Bookmark> {
        let index = position_of(&self.bookmarks, id_or_url)?;
        let removed = self.bookmarks.remove(index);
        self.persist().await;
        Some(removed)
    }

    pub async fn clear(&mut self) {
        self.bookmarks.clear();
        self.persist().await;
    }

    async fn persist(&self) {
        self.cache
            .store_list(GUEST_BOOKMARKS_KEY, &self.bookmarks)
            .await;
    }
}

mod cache;

pub use cache::{CacheError, CacheStore, GUEST_BOOKMARKS_KEY, bookmarks_key, queue_key};

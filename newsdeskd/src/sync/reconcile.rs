use std::collections::HashSet;

use newsdesk_core::Bookmark;

/// Merges a local and a remote bookmark list into one list keyed by url.
///
/// Remote records win when both sides know a url; local records the remote has
/// never seen are kept. The result is newest-first by `saved_at`, with ties in
/// insertion order (remote entries ahead of local-only ones). Within each input
/// the first record for a url wins.
pub fn reconcile(local: &[Bookmark], remote: &[Bookmark]) -> Vec<Bookmark> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(local.len() + remote.len());
    let mut merged: Vec<Bookmark> = Vec::with_capacity(local.len() + remote.len());

    for bookmark in remote.iter().chain(local) {
        if seen.insert(bookmark.url()) {
            merged.push(bookmark.clone());
        }
    }

    // Stable, so equal timestamps keep insertion order.
    merged.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
    merged
}

/// Drops later duplicates of a url, keeping the first occurrence.
pub fn dedup_by_url(bookmarks: &mut Vec<Bookmark>) {
    let mut seen = HashSet::with_capacity(bookmarks.len());
    bookmarks.retain(|bookmark| seen.insert(bookmark.url().to_string()));
}

pub fn find_by_url<'a>(bookmarks: &'a [Bookmark], url: &str) -> Option<&'a Bookmark> {
    bookmarks.iter().find(|bookmark| bookmark.url() == url)
}

/// Index of the bookmark whose id or url equals `id_or_url`.
pub fn position_of(bookmarks: &[Bookmark], id_or_url: &str) -> Option<usize> {
    bookmarks
        .iter()
        .position(|bookmark| bookmark.matches(id_or_url))
}

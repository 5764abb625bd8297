mod client;
mod model;

pub use client::{ApiError, ApiErrorClass, BookmarkClient};
pub use model::{Article, Bookmark, LOCAL_ID_PREFIX};

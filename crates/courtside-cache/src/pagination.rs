//! Cursor pagination: fetch a page for a view and merge it into the cache.
//!
//! A page is applied in two steps, store first and view second, so a view
//! never references an ID the store does not hold. A failed fetch applies
//! nothing.

use tracing::{debug, warn};

use crate::cache::PostCache;
use crate::views::{ViewKey, ViewPage};
use crate::{CacheError, Page};

/// Result of a page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// A page was fetched and merged.
    Loaded {
        /// IDs newly appended to the view.
        appended: usize,
        /// Whether another page is available.
        has_more: bool,
    },
    /// The view already reported its last page; no request was made.
    Exhausted,
}

impl PostCache {
    /// Fetch the next page of a view and merge it.
    ///
    /// Continues from the view's stored cursor. Once a view has returned
    /// its last page, further calls return [`PageOutcome::Exhausted`]
    /// without a request.
    pub async fn fetch_next(&self, key: &ViewKey) -> Result<PageOutcome, CacheError> {
        if self.views.is_exhausted(key) {
            debug!(view = %key, "view exhausted, skipping fetch");
            return Ok(PageOutcome::Exhausted);
        }

        let cursor = self.views.next_cursor(key);
        let page = self.fetch_page(key, cursor.as_deref()).await.inspect_err(|e| {
            warn!(view = %key, error = %e, "page fetch failed");
        })?;

        let has_more = page.has_more;
        let view_page = ViewPage::from(&page);
        self.store.upsert_many(page.items);
        let appended = self.views.merge_page(key, view_page);

        debug!(view = %key, appended, has_more, "page merged");
        Ok(PageOutcome::Loaded { appended, has_more })
    }

    /// Fetch the first page of a view and replace its contents.
    ///
    /// Posts already in the store are merged, not dropped, so other views
    /// referencing them are unaffected.
    pub async fn refresh(&self, key: &ViewKey) -> Result<PageOutcome, CacheError> {
        let page = self.fetch_page(key, None).await.inspect_err(|e| {
            warn!(view = %key, error = %e, "refresh failed");
        })?;

        let has_more = page.has_more;
        let view_page = ViewPage::from(&page);
        let appended = view_page.ids.len();
        self.store.upsert_many(page.items);
        self.views.replace_page(key, view_page);

        debug!(view = %key, loaded = appended, has_more, "view refreshed");
        Ok(PageOutcome::Loaded { appended, has_more })
    }

    /// Fetch the next page of the global feed.
    pub async fn fetch_feed_page(&self) -> Result<PageOutcome, CacheError> {
        self.fetch_next(&ViewKey::Feed).await
    }

    /// Fetch the next page of a user's posts in one category.
    pub async fn fetch_user_page(
        &self,
        user_id: &str,
        category: &str,
    ) -> Result<PageOutcome, CacheError> {
        self.fetch_next(&ViewKey::user(user_id, category)).await
    }

    /// Fetch the next page of a hashtag's posts in one category.
    pub async fn fetch_hashtag_page(
        &self,
        hashtag: &str,
        category: &str,
    ) -> Result<PageOutcome, CacheError> {
        self.fetch_next(&ViewKey::hashtag(hashtag, category)).await
    }

    /// Pick the adapter for a view kind.
    async fn fetch_page(&self, key: &ViewKey, cursor: Option<&str>) -> Result<Page, CacheError> {
        match key {
            ViewKey::Feed => self.client.fetch_feed(None, cursor).await,
            ViewKey::User { user_id, category } => {
                self.client
                    .fetch_user_posts(user_id, category, None, cursor)
                    .await
            }
            ViewKey::Hashtag { hashtag, category } => {
                self.client
                    .fetch_hashtag_posts(hashtag, category, None, cursor)
                    .await
            }
        }
    }
}

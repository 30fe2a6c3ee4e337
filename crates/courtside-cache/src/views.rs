//! Pagination windows over post IDs.
//!
//! A view holds the ordered IDs it has loaded plus its continuation cursor.
//! Views never hold post data; reads join through [`crate::PostStore`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::Page;

/// Identifies one pagination window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewKey {
    /// The global feed.
    Feed,
    /// One user's posts in one category.
    User { user_id: String, category: String },
    /// Posts carrying a hashtag in one category.
    Hashtag { hashtag: String, category: String },
}

impl ViewKey {
    pub fn user(user_id: impl Into<String>, category: impl Into<String>) -> Self {
        ViewKey::User {
            user_id: user_id.into(),
            category: category.into(),
        }
    }

    pub fn hashtag(hashtag: impl Into<String>, category: impl Into<String>) -> Self {
        ViewKey::Hashtag {
            hashtag: hashtag.into(),
            category: category.into(),
        }
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewKey::Feed => write!(f, "feed"),
            ViewKey::User { user_id, category } => write!(f, "user:{}:{}", user_id, category),
            ViewKey::Hashtag { hashtag, category } => {
                write!(f, "hashtag:{}:{}", hashtag, category)
            }
        }
    }
}

/// A page of IDs to merge into a view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewPage {
    pub ids: Vec<String>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl From<&Page> for ViewPage {
    fn from(page: &Page) -> Self {
        Self {
            ids: page.ids(),
            next_cursor: page.next_cursor.clone(),
            has_more: page.has_more,
        }
    }
}

/// Current state of a view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    /// Loaded IDs in first-seen order.
    pub ids: Vec<String>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    /// Number of pages merged since the view was created or replaced.
    pub pages_loaded: usize,
}

#[derive(Debug, Default)]
struct ViewEntry {
    state: ViewState,
    seen: HashSet<String>,
}

impl ViewEntry {
    /// Append unseen IDs and take the page's cursor. Returns how many IDs
    /// were appended.
    fn merge(&mut self, page: ViewPage) -> usize {
        let before = self.state.ids.len();
        for id in page.ids {
            if self.seen.insert(id.clone()) {
                self.state.ids.push(id);
            }
        }
        self.state.next_cursor = page.next_cursor;
        self.state.has_more = page.has_more;
        self.state.pages_loaded += 1;
        self.state.ids.len() - before
    }
}

/// Index of all views, keyed by [`ViewKey`].
#[derive(Default)]
pub struct ViewIndex {
    views: DashMap<ViewKey, ViewEntry>,
}

impl ViewIndex {
    /// Create a new empty index.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Merge a page into a view, creating the view if needed.
    ///
    /// Only IDs the view has not seen are appended; the cursor and
    /// `has_more` are replaced by the page's. Returns the number of IDs
    /// appended.
    pub fn merge_page(&self, key: &ViewKey, page: ViewPage) -> usize {
        let mut entry = self.views.entry(key.clone()).or_default();
        let appended = entry.merge(page);
        trace!(
            view = %key,
            appended,
            total = entry.state.ids.len(),
            has_more = entry.state.has_more,
            "views: page merged"
        );
        appended
    }

    /// Merge a page into the global feed.
    pub fn set_feed_page(&self, page: ViewPage) -> usize {
        self.merge_page(&ViewKey::Feed, page)
    }

    /// Merge a page into a user view.
    pub fn set_user_page(&self, user_id: &str, category: &str, page: ViewPage) -> usize {
        self.merge_page(&ViewKey::user(user_id, category), page)
    }

    /// Merge a page into a hashtag view.
    pub fn set_hashtag_page(&self, hashtag: &str, category: &str, page: ViewPage) -> usize {
        self.merge_page(&ViewKey::hashtag(hashtag, category), page)
    }

    /// Replace a view's contents with a single page.
    pub fn replace_page(&self, key: &ViewKey, page: ViewPage) {
        let mut entry = ViewEntry::default();
        entry.merge(page);
        trace!(view = %key, total = entry.state.ids.len(), "views: page replaced");
        self.views.insert(key.clone(), entry);
    }

    /// Get a view's current state.
    pub fn view(&self, key: &ViewKey) -> Option<ViewState> {
        self.views.get(key).map(|e| e.state.clone())
    }

    /// Get a view's IDs, or an empty list if it was never loaded.
    pub fn ids(&self, key: &ViewKey) -> Vec<String> {
        self.views
            .get(key)
            .map(|e| e.state.ids.clone())
            .unwrap_or_default()
    }

    /// Whether a view has been loaded and reported no further pages.
    pub fn is_exhausted(&self, key: &ViewKey) -> bool {
        self.views.get(key).is_some_and(|e| !e.state.has_more)
    }

    /// Cursor to continue a view with, if it was loaded.
    pub fn next_cursor(&self, key: &ViewKey) -> Option<String> {
        self.views.get(key).and_then(|e| e.state.next_cursor.clone())
    }

    /// Drop an ID from every view. Returns the number of views touched.
    pub fn remove_id(&self, id: &str) -> usize {
        let mut touched = 0;
        for mut entry in self.views.iter_mut() {
            if entry.seen.remove(id) {
                entry.state.ids.retain(|i| i != id);
                touched += 1;
            }
        }
        touched
    }

    /// Forget one view.
    pub fn reset_view(&self, key: &ViewKey) {
        if self.views.remove(key).is_some() {
            trace!(view = %key, "views: view reset");
        }
    }

    /// Keys of all loaded views.
    pub fn keys(&self) -> Vec<ViewKey> {
        self.views.iter().map(|e| e.key().clone()).collect()
    }

    /// Forget every view (e.g. on logout).
    pub fn clear(&self) {
        self.views.clear();
        trace!("views: cleared");
    }
}

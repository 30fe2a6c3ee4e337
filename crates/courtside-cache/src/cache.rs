//! The post cache: entity store, view index and the client they are fed by.
//!
//! Fetch coordination lives in `pagination.rs` and optimistic mutations in
//! `mutations.rs`; both are `impl PostCache` blocks over the handles here.

use std::sync::Arc;

use tracing::info;

use crate::store::PostStore;
use crate::views::{ViewIndex, ViewKey, ViewState};
use crate::{ApiClient, Post};

/// Normalized post cache shared by every screen.
pub struct PostCache {
    pub(crate) client: Arc<ApiClient>,
    pub(crate) store: Arc<PostStore>,
    pub(crate) views: Arc<ViewIndex>,
}

impl PostCache {
    /// Create an empty cache backed by the given client.
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            client,
            store: PostStore::new(),
            views: ViewIndex::new(),
        }
    }

    /// Get the backend client.
    pub fn client(&self) -> Arc<ApiClient> {
        Arc::clone(&self.client)
    }

    /// Get the entity store.
    pub fn store(&self) -> Arc<PostStore> {
        Arc::clone(&self.store)
    }

    /// Get the view index.
    pub fn views(&self) -> Arc<ViewIndex> {
        Arc::clone(&self.views)
    }

    /// Get a post by ID.
    pub fn post(&self, id: &str) -> Option<Post> {
        self.store.select_by_id(id)
    }

    /// Posts of a view in view order, joined through the store.
    ///
    /// IDs whose post is no longer stored are skipped.
    pub fn posts_for(&self, key: &ViewKey) -> Vec<Post> {
        self.store.select_many(&self.views.ids(key))
    }

    /// State of a view, if it was loaded.
    pub fn view(&self, key: &ViewKey) -> Option<ViewState> {
        self.views.view(key)
    }

    /// Drop every post and view.
    pub fn reset(&self) {
        self.views.clear();
        self.store.clear();
        info!("post cache reset");
    }

    /// Forget the token and reset the cache.
    pub async fn logout(&self) {
        self.client.set_token(None).await;
        self.reset();
    }
}

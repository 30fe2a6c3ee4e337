//! Normalized in-memory table of posts keyed by ID.
//!
//! Every view and every mutation reads and writes posts through this store,
//! so there is exactly one representation of a post per ID. Operations are
//! synchronous and atomic per entry; nothing here performs I/O.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tracing::trace;

use crate::{Post, PostPatch};

/// Broadcast channel capacity for store updates.
const BROADCAST_CHANNEL_CAPACITY: usize = 1024;

/// Update event for store subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreUpdate {
    /// A post was inserted.
    Inserted { id: String },
    /// A post's fields changed.
    Updated { id: String },
    /// A post was removed.
    Removed { id: String },
    /// The whole store was emptied.
    Cleared,
}

/// Normalized post table.
pub struct PostStore {
    posts: DashMap<String, Post>,
    updates_tx: broadcast::Sender<StoreUpdate>,
}

impl PostStore {
    /// Create a new empty store.
    pub fn new() -> Arc<Self> {
        let (updates_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        Arc::new(Self {
            posts: DashMap::new(),
            updates_tx,
        })
    }

    /// Subscribe to store updates.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.updates_tx.subscribe()
    }

    fn broadcast(&self, update: StoreUpdate) {
        if self.updates_tx.send(update).is_err() {
            trace!("no subscribers for store update");
        }
    }

    /// Insert absent posts and merge present fields into existing ones.
    ///
    /// Fields missing from a patch keep their stored value.
    pub fn upsert_many(&self, patches: impl IntoIterator<Item = PostPatch>) {
        for patch in patches {
            self.upsert_one(patch);
        }
    }

    /// Insert or merge a single post.
    pub fn upsert_one(&self, patch: PostPatch) {
        let id = patch.id.clone();
        let update = match self.posts.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get_mut().apply(patch) {
                    Some(StoreUpdate::Updated { id: id.clone() })
                } else {
                    None
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Post::from_patch(patch));
                Some(StoreUpdate::Inserted { id: id.clone() })
            }
        };

        if let Some(update) = update {
            trace!(id = %id, update = ?update, "store: post upserted");
            self.broadcast(update);
        }
    }

    /// Apply a partial patch to an existing post.
    ///
    /// Returns false, and changes nothing, if the post is not stored.
    pub fn update_one(&self, id: &str, mut changes: PostPatch) -> bool {
        changes.id = id.to_string();
        let changed = match self.posts.get_mut(id) {
            Some(mut post) => post.apply(changes),
            None => {
                trace!(id = %id, "store: update of missing post ignored");
                return false;
            }
        };

        if changed {
            trace!(id = %id, "store: post updated");
            self.broadcast(StoreUpdate::Updated { id: id.to_string() });
        }
        true
    }

    /// Insert a full record, replacing any stored one.
    pub fn add_one(&self, post: Post) {
        let id = post.id.clone();
        let previous = self.posts.insert(id.clone(), post);
        let update = if previous.is_some() {
            StoreUpdate::Updated { id: id.clone() }
        } else {
            StoreUpdate::Inserted { id: id.clone() }
        };
        trace!(id = %id, "store: post added");
        self.broadcast(update);
    }

    /// Write a snapshot back verbatim.
    ///
    /// Used by rollback: unlike [`Self::update_one`] this also clears
    /// optional fields the snapshot did not have.
    pub fn restore(&self, snapshot: Post) {
        let id = snapshot.id.clone();
        let differs = self.posts.get(&id).map(|p| *p != snapshot);
        self.posts.insert(id.clone(), snapshot);
        let update = match differs {
            Some(true) => Some(StoreUpdate::Updated { id: id.clone() }),
            Some(false) => None,
            None => Some(StoreUpdate::Inserted { id: id.clone() }),
        };
        if let Some(update) = update {
            trace!(id = %id, "store: post restored");
            self.broadcast(update);
        }
    }

    /// Write a snapshot back only if the post is still stored.
    ///
    /// Like [`Self::restore`] the whole record is replaced, but a post
    /// deleted in the meantime stays deleted. Returns false if it was absent.
    pub fn restore_existing(&self, snapshot: Post) -> bool {
        let id = snapshot.id.clone();
        let changed = match self.posts.get_mut(&id) {
            Some(mut post) => {
                let changed = *post != snapshot;
                *post = snapshot;
                changed
            }
            None => {
                trace!(id = %id, "store: restore of removed post ignored");
                return false;
            }
        };

        if changed {
            trace!(id = %id, "store: post restored");
            self.broadcast(StoreUpdate::Updated { id });
        }
        true
    }

    /// Remove a post, returning the removed record.
    pub fn remove_one(&self, id: &str) -> Option<Post> {
        let removed = self.posts.remove(id).map(|(_, post)| post);
        if removed.is_some() {
            trace!(id = %id, "store: post removed");
            self.broadcast(StoreUpdate::Removed { id: id.to_string() });
        }
        removed
    }

    /// Get a post by ID.
    pub fn select_by_id(&self, id: &str) -> Option<Post> {
        self.posts.get(id).map(|r| r.value().clone())
    }

    /// Whether a post is stored.
    pub fn contains(&self, id: &str) -> bool {
        self.posts.contains_key(id)
    }

    /// All posts, newest first.
    ///
    /// Ties on `createdAt` are broken by ID so the order is deterministic.
    pub fn select_all(&self) -> Vec<Post> {
        let mut posts: Vec<Post> = self.posts.iter().map(|r| r.value().clone()).collect();
        posts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        posts
    }

    /// Get the posts for a list of IDs, in that order, skipping absent ones.
    pub fn select_many<S: AsRef<str>>(&self, ids: &[S]) -> Vec<Post> {
        ids.iter()
            .filter_map(|id| self.select_by_id(id.as_ref()))
            .collect()
    }

    /// Get the number of stored posts.
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    /// Remove every post (e.g. on logout).
    pub fn clear(&self) {
        self.posts.clear();
        self.broadcast(StoreUpdate::Cleared);
        trace!("store: cleared");
    }
}

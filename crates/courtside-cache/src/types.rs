//! Core types for posts, comments and notifications.
//!
//! Backend payloads are partial: the same post arrives with different
//! subsets of fields depending on the endpoint. The wire type for a post is
//! therefore [`PostPatch`] (only `id` is required), and the stored record is
//! [`Post`], built and updated by merging patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Denormalized summary of a post's author (or a notification's sender).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostedBy {
    #[serde(alias = "_id")]
    pub id: String,
    /// Profile type, e.g. "player", "team", "club".
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

/// One option of a poll post with its tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub option: String,
    #[serde(default)]
    pub votes: u64,
}

/// A post as held in the entity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub caption: String,
    pub assets: Vec<String>,
    pub posted_by: PostedBy,
    pub created_at: DateTime<Utc>,
    pub likes_count: u64,
    pub comments_count: u64,
    pub is_liked: bool,
    pub is_following: bool,
    pub is_reported: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_voted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voted_option: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_options: Option<Vec<PollOption>>,
}

impl Post {
    /// Build a record from a patch, defaulting every absent field.
    pub fn from_patch(patch: PostPatch) -> Self {
        Self {
            id: patch.id,
            caption: patch.caption.unwrap_or_default(),
            assets: patch.assets.unwrap_or_default(),
            posted_by: patch.posted_by.unwrap_or_default(),
            created_at: patch.created_at.unwrap_or_default(),
            likes_count: patch.likes_count.unwrap_or(0),
            comments_count: patch.comments_count.unwrap_or(0),
            is_liked: patch.is_liked.unwrap_or(false),
            is_following: patch.is_following.unwrap_or(false),
            is_reported: patch.is_reported.unwrap_or(false),
            is_voted: patch.is_voted,
            voted_option: patch.voted_option,
            poll_options: patch.poll_options,
        }
    }

    /// Merge the fields present in `patch` into this record.
    ///
    /// Returns true if any field changed. The patch's `id` is ignored.
    pub fn apply(&mut self, patch: PostPatch) -> bool {
        fn set<T: PartialEq>(slot: &mut T, value: Option<T>) -> bool {
            match value {
                Some(v) if *slot != v => {
                    *slot = v;
                    true
                }
                _ => false,
            }
        }

        fn set_opt<T: PartialEq>(slot: &mut Option<T>, value: Option<T>) -> bool {
            match value {
                Some(v) if slot.as_ref() != Some(&v) => {
                    *slot = Some(v);
                    true
                }
                _ => false,
            }
        }

        let mut changed = false;
        changed |= set(&mut self.caption, patch.caption);
        changed |= set(&mut self.assets, patch.assets);
        changed |= set(&mut self.posted_by, patch.posted_by);
        changed |= set(&mut self.created_at, patch.created_at);
        changed |= set(&mut self.likes_count, patch.likes_count);
        changed |= set(&mut self.comments_count, patch.comments_count);
        changed |= set(&mut self.is_liked, patch.is_liked);
        changed |= set(&mut self.is_following, patch.is_following);
        changed |= set(&mut self.is_reported, patch.is_reported);
        changed |= set_opt(&mut self.is_voted, patch.is_voted);
        changed |= set_opt(&mut self.voted_option, patch.voted_option);
        changed |= set_opt(&mut self.poll_options, patch.poll_options);
        changed
    }

    /// Whether this post carries a poll.
    pub fn is_poll(&self) -> bool {
        self.poll_options.is_some()
    }
}

/// A partial post, as received from the backend or produced by a mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPatch {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_by: Option<PostedBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_liked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_following: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_reported: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_voted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voted_option: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_options: Option<Vec<PollOption>>,
}

impl PostPatch {
    /// An empty patch for the given post.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

impl From<Post> for PostPatch {
    fn from(post: Post) -> Self {
        Self {
            id: post.id,
            caption: Some(post.caption),
            assets: Some(post.assets),
            posted_by: Some(post.posted_by),
            created_at: Some(post.created_at),
            likes_count: Some(post.likes_count),
            comments_count: Some(post.comments_count),
            is_liked: Some(post.is_liked),
            is_following: Some(post.is_following),
            is_reported: Some(post.is_reported),
            is_voted: post.is_voted,
            voted_option: post.voted_option,
            poll_options: post.poll_options,
        }
    }
}

/// A comment on a post, as returned by the backend after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_comment_id: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commented_by: Option<PostedBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A notification delivered by fetch or by the push transport.
///
/// The backend identifies notifications by `_id` on fetched entries and by
/// `notificationId` on some pushed ones; either may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<PostedBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Remaining payload fields, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Notification {
    fn identity_keys(&self) -> impl Iterator<Item = &str> {
        self.id
            .as_deref()
            .into_iter()
            .chain(self.notification_id.as_deref())
    }

    /// Whether two notifications share an `_id` or `notificationId`.
    ///
    /// Notifications without any identity never match.
    pub fn same_identity(&self, other: &Notification) -> bool {
        self.identity_keys()
            .any(|key| other.identity_keys().any(|k| k == key))
    }
}

/// One page of posts returned by a fetch adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<PostPatch>,
    /// Continuation token; `None` means the view is exhausted.
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl Page {
    /// Build a page, deriving `has_more` from the cursor unless the backend
    /// supplied it.
    ///
    /// A page without a cursor is always the last one: there is nothing to
    /// continue from, even if the backend claims otherwise.
    pub fn new(items: Vec<PostPatch>, next_cursor: Option<String>, has_more: Option<bool>) -> Self {
        let has_more = next_cursor.is_some() && has_more.unwrap_or(true);
        Self {
            items,
            next_cursor,
            has_more,
        }
    }

    /// IDs of the page's items, in order.
    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|p| p.id.clone()).collect()
    }
}

// =============================================================================
// Response envelopes
// =============================================================================

/// `GET /get-feed` response.
#[derive(Debug, Deserialize)]
pub(crate) struct FeedEnvelope {
    pub data: FeedData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeedData {
    #[serde(default)]
    pub posts: Vec<PostPatch>,
    #[serde(default, deserialize_with = "deserialize_cursor")]
    pub last_timestamp: Option<String>,
    #[serde(default)]
    pub has_more: Option<bool>,
}

/// `GET /post/{userId}` and `GET /hashtag/{type}` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListEnvelope<T> {
    pub data: Vec<T>,
    #[serde(default, deserialize_with = "deserialize_cursor")]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_more: Option<bool>,
}

/// Generic `{data: T}` response.
#[derive(Debug, Deserialize)]
pub(crate) struct DataEnvelope<T> {
    pub data: T,
}

/// Error body returned with non-success statuses.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Cursors arrive as strings, numbers (epoch timestamps) or null.
fn deserialize_cursor<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "invalid cursor: {}",
            other
        ))),
    }
}

//! Optimistic mutations on posts.
//!
//! Every mutation follows the same steps:
//!
//! 1. Take one snapshot of the post from the store (missing post: fail with
//!    [`CacheError::NotFound`] before any request or store write).
//! 2. Derive both the optimistic change and the request from that snapshot.
//! 3. Apply the change to the store, then send the request.
//! 4. On failure, write the snapshot back and return the error. A post
//!    deleted while the request was in flight stays deleted.
//!
//! Concurrent mutations on the same post are last-write-wins; a failing
//! mutation restores its own snapshot.

use tracing::{debug, warn};

use crate::cache::PostCache;
use crate::{CacheError, Comment, PollOption, Post, PostPatch};

/// Request chosen by [`PostCache::toggle_like`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeAction {
    Like,
    Unlike,
}

/// Request and optimistic patch for a like toggle, both from one snapshot.
pub fn like_transition(snapshot: &Post) -> (LikeAction, PostPatch) {
    let (action, likes_count) = if snapshot.is_liked {
        (LikeAction::Unlike, snapshot.likes_count.saturating_sub(1))
    } else {
        (LikeAction::Like, snapshot.likes_count + 1)
    };

    let patch = PostPatch {
        is_liked: Some(!snapshot.is_liked),
        likes_count: Some(likes_count),
        ..PostPatch::new(snapshot.id.clone())
    };
    (action, patch)
}

/// Optimistic patch for a poll vote.
pub fn vote_transition(snapshot: &Post, selected_option: &str) -> Result<PostPatch, CacheError> {
    if snapshot.is_voted == Some(true) {
        return Err(CacheError::AlreadyVoted {
            id: snapshot.id.clone(),
        });
    }

    let poll_options = snapshot.poll_options.as_ref().map(|options| {
        options
            .iter()
            .map(|o| PollOption {
                option: o.option.clone(),
                votes: if o.option == selected_option {
                    o.votes + 1
                } else {
                    o.votes
                },
            })
            .collect()
    });

    Ok(PostPatch {
        is_voted: Some(true),
        voted_option: Some(selected_option.to_string()),
        poll_options,
        ..PostPatch::new(snapshot.id.clone())
    })
}

/// Optimistic patch for adding or removing one comment.
fn comment_count_patch(snapshot: &Post, added: bool) -> PostPatch {
    let comments_count = if added {
        snapshot.comments_count + 1
    } else {
        snapshot.comments_count.saturating_sub(1)
    };
    PostPatch {
        comments_count: Some(comments_count),
        ..PostPatch::new(snapshot.id.clone())
    }
}

impl PostCache {
    /// Check preconditions and take the pre-mutation snapshot.
    async fn snapshot(&self, post_id: &str) -> Result<Post, CacheError> {
        self.client.access_token().await?;
        self.store
            .select_by_id(post_id)
            .ok_or_else(|| CacheError::NotFound {
                id: post_id.to_string(),
            })
    }

    /// Keep the optimistic state on success; restore the snapshot on failure.
    ///
    /// A post deleted while the request was in flight is not brought back.
    fn reconcile<T>(
        &self,
        operation: &'static str,
        snapshot: Post,
        result: Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        match result {
            Ok(value) => {
                debug!(operation, id = %snapshot.id, "mutation confirmed");
                Ok(value)
            }
            Err(e) => {
                warn!(operation, id = %snapshot.id, error = %e, "mutation failed, rolling back");
                let id = snapshot.id.clone();
                if !self.store.restore_existing(snapshot) {
                    debug!(operation, id = %id, "post deleted meanwhile, rollback skipped");
                }
                Err(e)
            }
        }
    }

    /// Like or unlike a post, depending on its current state.
    ///
    /// Returns the request that was sent.
    pub async fn toggle_like(&self, post_id: &str) -> Result<LikeAction, CacheError> {
        let snapshot = self.snapshot(post_id).await?;
        let (action, patch) = like_transition(&snapshot);
        self.store.update_one(post_id, patch);

        let result = match action {
            LikeAction::Like => self.client.like_post(post_id).await,
            LikeAction::Unlike => self.client.unlike_post(post_id).await,
        };
        self.reconcile("toggle_like", snapshot, result).map(|()| action)
    }

    /// Delete a post.
    ///
    /// The post disappears from the store immediately; on success its ID is
    /// also dropped from every view, on failure the full record comes back.
    pub async fn delete_post(&self, post_id: &str) -> Result<(), CacheError> {
        let snapshot = self.snapshot(post_id).await?;
        self.store.remove_one(post_id);

        if let Err(e) = self.client.delete_post(post_id).await {
            warn!(id = %post_id, error = %e, "delete failed, restoring post");
            self.store.restore(snapshot);
            return Err(e);
        }

        let views = self.views.remove_id(post_id);
        debug!(id = %post_id, views, "deleted post pruned from views");
        Ok(())
    }

    /// Comment on a post, or reply to a comment with `parent_comment_id`.
    ///
    /// Returns the comment as created by the backend.
    pub async fn post_comment(
        &self,
        post_id: &str,
        parent_comment_id: Option<&str>,
        text: &str,
    ) -> Result<Comment, CacheError> {
        let snapshot = self.snapshot(post_id).await?;
        self.store
            .update_one(post_id, comment_count_patch(&snapshot, true));

        let result = self
            .client
            .create_comment(post_id, parent_comment_id, text)
            .await;
        self.reconcile("post_comment", snapshot, result)
    }

    /// Delete a comment from a post.
    pub async fn delete_comment(&self, post_id: &str, comment_id: &str) -> Result<(), CacheError> {
        let snapshot = self.snapshot(post_id).await?;
        self.store
            .update_one(post_id, comment_count_patch(&snapshot, false));

        let result = self.client.delete_comment(post_id, comment_id).await;
        self.reconcile("delete_comment", snapshot, result)
    }

    /// Vote for an option of a poll post.
    pub async fn vote_in_poll(&self, post_id: &str, selected_option: &str) -> Result<(), CacheError> {
        let snapshot = self.snapshot(post_id).await?;
        let patch = vote_transition(&snapshot, selected_option)?;
        self.store.update_one(post_id, patch);

        let result = self.client.vote(post_id, selected_option).await;
        self.reconcile("vote_in_poll", snapshot, result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::views::{ViewKey, ViewPage};
    use crate::{ApiClient, ClientConfig};

    fn cache_for(server: &MockServer) -> PostCache {
        let client = ApiClient::with_token(ClientConfig::new(server.uri()), "test-token").unwrap();
        PostCache::new(Arc::new(client))
    }

    fn seed(cache: &PostCache, liked: bool, likes: u64) -> Post {
        cache.store.upsert_one(PostPatch {
            caption: Some("final whistle".to_string()),
            assets: Some(vec!["https://cdn.example.com/1.jpg".to_string()]),
            likes_count: Some(likes),
            comments_count: Some(2),
            is_liked: Some(liked),
            ..PostPatch::new("p1")
        });
        cache.store.select_by_id("p1").unwrap()
    }

    fn seed_poll(cache: &PostCache) -> Post {
        cache.store.upsert_one(PostPatch {
            poll_options: Some(vec![
                PollOption { option: "home".into(), votes: 3 },
                PollOption { option: "away".into(), votes: 1 },
            ]),
            ..PostPatch::new("poll")
        });
        cache.store.select_by_id("poll").unwrap()
    }

    async fn mount(server: &MockServer, verb: &str, route: &str, status: u16) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({})))
            .mount(server)
            .await;
    }

    #[test]
    fn test_like_transition_from_unliked() {
        let post = Post::from_patch(PostPatch {
            likes_count: Some(10),
            ..PostPatch::new("p1")
        });
        let (action, patch) = like_transition(&post);
        assert_eq!(action, LikeAction::Like);
        assert_eq!(patch.is_liked, Some(true));
        assert_eq!(patch.likes_count, Some(11));
    }

    #[test]
    fn test_like_transition_never_underflows() {
        let post = Post::from_patch(PostPatch {
            is_liked: Some(true),
            likes_count: Some(0),
            ..PostPatch::new("p1")
        });
        let (action, patch) = like_transition(&post);
        assert_eq!(action, LikeAction::Unlike);
        assert_eq!(patch.likes_count, Some(0));
    }

    #[test]
    fn test_vote_transition_rejects_second_vote() {
        let post = Post::from_patch(PostPatch {
            is_voted: Some(true),
            ..PostPatch::new("p1")
        });
        assert!(matches!(
            vote_transition(&post, "home"),
            Err(CacheError::AlreadyVoted { .. })
        ));
    }

    #[tokio::test]
    async fn test_like_success_persists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/post/like"))
            .and(body_json(serde_json::json!({"targetId": "p1", "targetType": "post"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        seed(&cache, false, 10);

        let action = cache.toggle_like("p1").await.unwrap();

        let post = cache.post("p1").unwrap();
        assert_eq!(action, LikeAction::Like);
        assert!(post.is_liked);
        assert_eq!(post.likes_count, 11);
    }

    #[tokio::test]
    async fn test_like_failure_rolls_back() {
        let server = MockServer::start().await;
        mount(&server, "POST", "/post/like", 500).await;

        let cache = cache_for(&server);
        let before = seed(&cache, false, 10);

        let result = cache.toggle_like("p1").await;

        assert!(matches!(result, Err(CacheError::Api { status: 500, .. })));
        assert_eq!(cache.post("p1").unwrap(), before);
    }

    #[tokio::test]
    async fn test_unlike_sends_delete() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/post/like"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        seed(&cache, true, 4);

        assert_eq!(cache.toggle_like("p1").await.unwrap(), LikeAction::Unlike);
        let post = cache.post("p1").unwrap();
        assert!(!post.is_liked);
        assert_eq!(post.likes_count, 3);
    }

    #[tokio::test]
    async fn test_missing_post_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        let result = cache.toggle_like("ghost").await;

        assert!(matches!(result, Err(CacheError::NotFound { ref id }) if id == "ghost"));
        assert!(cache.store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_optimistic_write() {
        let server = MockServer::start().await;
        let client = ApiClient::new(ClientConfig::new(server.uri())).unwrap();
        let cache = PostCache::new(Arc::new(client));
        let before = seed(&cache, false, 10);

        let result = cache.toggle_like("p1").await;

        assert!(matches!(result, Err(CacheError::Auth(_))));
        assert_eq!(cache.post("p1").unwrap(), before);
    }

    #[tokio::test]
    async fn test_delete_success_prunes_views() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/post"))
            .and(body_json(serde_json::json!({"postId": "p1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        seed(&cache, false, 1);
        cache.views.set_feed_page(ViewPage {
            ids: vec!["p1".into()],
            next_cursor: None,
            has_more: false,
        });

        cache.delete_post("p1").await.unwrap();

        assert!(cache.post("p1").is_none());
        assert!(cache.views.ids(&ViewKey::Feed).is_empty());
    }

    #[tokio::test]
    async fn test_delete_failure_restores_full_record() {
        let server = MockServer::start().await;
        mount(&server, "DELETE", "/post", 403).await;

        let cache = cache_for(&server);
        let before = seed(&cache, true, 8);
        cache.views.set_feed_page(ViewPage {
            ids: vec!["p1".into()],
            next_cursor: None,
            has_more: false,
        });

        let result = cache.delete_post("p1").await;

        assert!(result.is_err());
        assert_eq!(cache.post("p1").unwrap(), before);
        assert_eq!(cache.posts_for(&ViewKey::Feed), vec![before]);
    }

    #[tokio::test]
    async fn test_post_comment_returns_created_comment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/post/comment"))
            .and(body_json(serde_json::json!({
                "postId": "p1",
                "parentCommentId": "c0",
                "text": "what a save"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": {"_id": "c1", "postId": "p1", "parentCommentId": "c0", "text": "what a save"}
            })))
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        seed(&cache, false, 0);

        let comment = cache
            .post_comment("p1", Some("c0"), "what a save")
            .await
            .unwrap();

        assert_eq!(comment.id, "c1");
        assert_eq!(comment.parent_comment_id.as_deref(), Some("c0"));
        assert_eq!(cache.post("p1").unwrap().comments_count, 3);
    }

    #[tokio::test]
    async fn test_post_comment_failure_rolls_back() {
        let server = MockServer::start().await;
        mount(&server, "POST", "/post/comment", 422).await;

        let cache = cache_for(&server);
        let before = seed(&cache, false, 0);

        assert!(cache.post_comment("p1", None, "x").await.is_err());
        assert_eq!(cache.post("p1").unwrap(), before);
    }

    #[tokio::test]
    async fn test_delete_comment() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/post/comment"))
            .and(body_json(serde_json::json!({"postId": "p1", "commentId": "c1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        seed(&cache, false, 0);

        cache.delete_comment("p1", "c1").await.unwrap();
        assert_eq!(cache.post("p1").unwrap().comments_count, 1);
    }

    #[tokio::test]
    async fn test_delete_comment_failure_rolls_back() {
        let server = MockServer::start().await;
        mount(&server, "DELETE", "/post/comment", 500).await;

        let cache = cache_for(&server);
        let before = seed(&cache, false, 0);

        let result = cache.delete_comment("p1", "c1").await;

        assert!(matches!(result, Err(CacheError::Api { status: 500, .. })));
        assert_eq!(cache.post("p1").unwrap(), before);
    }

    #[tokio::test]
    async fn test_failed_like_does_not_revive_deleted_post() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/post/like"))
            .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/post"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({}))
                    .set_delay(Duration::from_millis(50)),
            )
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        seed(&cache, false, 10);
        cache.views.set_feed_page(ViewPage {
            ids: vec!["p1".into()],
            next_cursor: None,
            has_more: false,
        });

        let (liked, deleted) = tokio::join!(cache.toggle_like("p1"), cache.delete_post("p1"));

        assert!(liked.is_err());
        deleted.unwrap();
        assert!(cache.post("p1").is_none());
        assert!(cache.views.ids(&ViewKey::Feed).is_empty());
    }

    #[tokio::test]
    async fn test_vote_success_updates_tally() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/post/vote"))
            .and(body_json(serde_json::json!({
                "targetId": "poll",
                "targetType": "post",
                "selectedOption": "away"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        seed_poll(&cache);

        cache.vote_in_poll("poll", "away").await.unwrap();

        let post = cache.post("poll").unwrap();
        assert_eq!(post.is_voted, Some(true));
        assert_eq!(post.voted_option.as_deref(), Some("away"));
        let tally: Vec<u64> = post
            .poll_options
            .unwrap()
            .into_iter()
            .map(|o| o.votes)
            .collect();
        assert_eq!(tally, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_vote_failure_restores_unvoted_state() {
        let server = MockServer::start().await;
        mount(&server, "POST", "/post/vote", 500).await;

        let cache = cache_for(&server);
        let before = seed_poll(&cache);

        assert!(cache.vote_in_poll("poll", "home").await.is_err());

        let after = cache.post("poll").unwrap();
        assert_eq!(after, before);
        assert!(after.is_voted.is_none());
        assert!(after.voted_option.is_none());
    }

    #[tokio::test]
    async fn test_vote_twice_rejected_locally() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/post/vote"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        seed_poll(&cache);

        cache.vote_in_poll("poll", "home").await.unwrap();
        let second = cache.vote_in_poll("poll", "away").await;

        assert!(matches!(second, Err(CacheError::AlreadyVoted { .. })));
        assert_eq!(cache.post("poll").unwrap().voted_option.as_deref(), Some("home"));
    }
}

//! HTTP client for the Courtside backend.
//!
//! Each fetch method is a page adapter: one authenticated request, envelope
//! parsing, and a normalized [`Page`]. Nothing here retries or touches the
//! cache; coordination lives in [`crate::PostCache`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Url};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{DataEnvelope, ErrorBody, FeedEnvelope, ListEnvelope};
use crate::{CacheError, Comment, Notification, Page, PostPatch};

/// Message carried by [`CacheError::Auth`] when no token is stored.
pub(crate) const NOT_AUTHENTICATED: &str = "not authenticated";

/// Default number of posts per page.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Target type sent with like and vote requests.
const POST_TARGET_TYPE: &str = "post";

/// Connection settings for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API, without trailing slash.
    pub base_url: String,
    /// WebSocket URL of the notification push transport.
    pub socket_url: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Page size used when a fetch does not specify one.
    pub page_size: u32,
}

impl ClientConfig {
    /// Configuration with default timeouts for the given API URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            socket_url: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the notification socket URL.
    pub fn with_socket_url(mut self, url: impl Into<String>) -> Self {
        self.socket_url = Some(url.into());
        self
    }

    /// Set the connect and request timeouts.
    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    /// Set the default page size. Zero falls back to [`DEFAULT_PAGE_SIZE`].
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        self
    }
}

/// Client for the Courtside REST API.
pub struct ApiClient {
    http: Client,
    config: ClientConfig,
    base: Url,
    token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    /// Create a new client without a token.
    pub fn new(config: ClientConfig) -> Result<Self, CacheError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| CacheError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            config,
            base,
            token: Arc::new(RwLock::new(None)),
        })
    }

    /// Create a client that already holds a bearer token.
    pub fn with_token(config: ClientConfig, token: impl Into<String>) -> Result<Self, CacheError> {
        let mut client = Self::new(config)?;
        client.token = Arc::new(RwLock::new(Some(token.into())));
        Ok(client)
    }

    /// Replace the bearer token. `None` logs the client out.
    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    /// Whether a bearer token is available.
    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Get the current bearer token.
    pub(crate) async fn access_token(&self) -> Result<String, CacheError> {
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| CacheError::Auth(NOT_AUTHENTICATED.to_string()))
    }

    /// Build an authenticated request for the endpoint below the base URL.
    ///
    /// Each segment is percent-encoded, so IDs cannot escape their position
    /// in the path.
    async fn request(
        &self,
        method: Method,
        segments: &[&str],
    ) -> Result<RequestBuilder, CacheError> {
        let token = self.access_token().await?;
        let url = self.endpoint(segments)?;
        Ok(self
            .http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token)))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, CacheError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| CacheError::InvalidUrl(self.config.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Fetch a page of the global feed.
    ///
    /// The feed's continuation token is the last post's timestamp.
    pub async fn fetch_feed(
        &self,
        limit: Option<u32>,
        last_timestamp: Option<&str>,
    ) -> Result<Page, CacheError> {
        let limit = limit.unwrap_or(self.config.page_size);
        let mut request = self
            .request(Method::GET, &["get-feed"])
            .await?
            .query(&[("limit", limit.to_string())]);
        if let Some(ts) = last_timestamp {
            request = request.query(&[("lastTimeStamp", ts)]);
        }

        debug!(limit, cursor = ?last_timestamp, "fetching feed page");
        let envelope: FeedEnvelope = self.handle_response(request.send().await?).await?;
        Ok(Page::new(
            envelope.data.posts,
            envelope.data.last_timestamp,
            envelope.data.has_more,
        ))
    }

    /// Fetch a page of a user's posts in one category.
    pub async fn fetch_user_posts(
        &self,
        user_id: &str,
        category: &str,
        limit: Option<u32>,
        cursor: Option<&str>,
    ) -> Result<Page, CacheError> {
        let limit = limit.unwrap_or(self.config.page_size);
        let limit_param = limit.to_string();
        let mut request = self
            .request(Method::GET, &["post", user_id])
            .await?
            .query(&[("type", category), ("limit", limit_param.as_str())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        debug!(user_id, category, limit, cursor = ?cursor, "fetching user page");
        let envelope: ListEnvelope<PostPatch> = self.handle_response(request.send().await?).await?;
        Ok(Page::new(envelope.data, envelope.next_cursor, envelope.has_more))
    }

    /// Fetch a page of posts tagged with a hashtag in one category.
    pub async fn fetch_hashtag_posts(
        &self,
        hashtag: &str,
        category: &str,
        limit: Option<u32>,
        cursor: Option<&str>,
    ) -> Result<Page, CacheError> {
        let limit = limit.unwrap_or(self.config.page_size);
        let limit_param = limit.to_string();
        let mut request = self
            .request(Method::GET, &["hashtag", category])
            .await?
            .query(&[("hashtag", hashtag), ("limit", limit_param.as_str())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        debug!(hashtag, category, limit, cursor = ?cursor, "fetching hashtag page");
        let envelope: ListEnvelope<PostPatch> = self.handle_response(request.send().await?).await?;
        Ok(Page::new(envelope.data, envelope.next_cursor, envelope.has_more))
    }

    /// Like a post.
    pub async fn like_post(&self, post_id: &str) -> Result<(), CacheError> {
        self.send_like(Method::POST, post_id).await
    }

    /// Remove a like from a post.
    pub async fn unlike_post(&self, post_id: &str) -> Result<(), CacheError> {
        self.send_like(Method::DELETE, post_id).await
    }

    async fn send_like(&self, method: Method, post_id: &str) -> Result<(), CacheError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct LikeRequest<'a> {
            target_id: &'a str,
            target_type: &'a str,
        }

        debug!(post_id, method = %method, "sending like");
        let response = self
            .request(method, &["post", "like"])
            .await?
            .json(&LikeRequest {
                target_id: post_id,
                target_type: POST_TARGET_TYPE,
            })
            .send()
            .await?;
        self.handle_empty(response).await
    }

    /// Delete a post.
    pub async fn delete_post(&self, post_id: &str) -> Result<(), CacheError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct DeletePostRequest<'a> {
            post_id: &'a str,
        }

        debug!(post_id, "deleting post");
        let response = self
            .request(Method::DELETE, &["post"])
            .await?
            .json(&DeletePostRequest { post_id })
            .send()
            .await?;
        self.handle_empty(response).await
    }

    /// Create a comment (or a reply, with `parent_comment_id`).
    pub async fn create_comment(
        &self,
        post_id: &str,
        parent_comment_id: Option<&str>,
        text: &str,
    ) -> Result<Comment, CacheError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct CommentRequest<'a> {
            post_id: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            parent_comment_id: Option<&'a str>,
            text: &'a str,
        }

        debug!(post_id, parent = ?parent_comment_id, "creating comment");
        let response = self
            .request(Method::POST, &["post", "comment"])
            .await?
            .json(&CommentRequest {
                post_id,
                parent_comment_id,
                text,
            })
            .send()
            .await?;
        let envelope: DataEnvelope<Comment> = self.handle_response(response).await?;
        Ok(envelope.data)
    }

    /// Delete a comment.
    pub async fn delete_comment(&self, post_id: &str, comment_id: &str) -> Result<(), CacheError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct DeleteCommentRequest<'a> {
            post_id: &'a str,
            comment_id: &'a str,
        }

        debug!(post_id, comment_id, "deleting comment");
        let response = self
            .request(Method::DELETE, &["post", "comment"])
            .await?
            .json(&DeleteCommentRequest {
                post_id,
                comment_id,
            })
            .send()
            .await?;
        self.handle_empty(response).await
    }

    /// Cast a vote on a poll post.
    pub async fn vote(&self, post_id: &str, selected_option: &str) -> Result<(), CacheError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct VoteRequest<'a> {
            target_id: &'a str,
            target_type: &'a str,
            selected_option: &'a str,
        }

        debug!(post_id, selected_option, "casting vote");
        let response = self
            .request(Method::POST, &["post", "vote"])
            .await?
            .json(&VoteRequest {
                target_id: post_id,
                target_type: POST_TARGET_TYPE,
                selected_option,
            })
            .send()
            .await?;
        self.handle_empty(response).await
    }

    /// Fetch the current user's notifications, newest first.
    pub async fn fetch_notifications(&self) -> Result<Vec<Notification>, CacheError> {
        debug!("fetching notifications");
        let response = self.request(Method::GET, &["notification"]).await?.send().await?;
        let envelope: DataEnvelope<Vec<Notification>> = self.handle_response(response).await?;
        Ok(envelope.data)
    }

    /// Map a non-success status to an error, reading the message if any.
    async fn check_status(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, CacheError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.map_err(|e| {
            CacheError::InvalidResponse(format!(
                "request failed ({}): failed to read response: {}",
                status, e
            ))
        })?;

        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.message.or(body.error))
            .unwrap_or(text);

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CacheError::Auth(message));
        }

        Err(CacheError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CacheError> {
        let response = self.check_status(response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            CacheError::InvalidResponse(format!("unexpected response shape: {}", e))
        })
    }

    /// Like [`Self::handle_response`] for endpoints whose body is ignored.
    async fn handle_empty(&self, response: reqwest::Response) -> Result<(), CacheError> {
        self.check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> ApiClient {
        ApiClient::with_token(ClientConfig::new(server.uri()), "test-token").unwrap()
    }

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = ClientConfig::new("https://api.example.com/");
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_config_zero_page_size_falls_back() {
        let config = ClientConfig::new("https://api.example.com").with_page_size(0);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }

    #[tokio::test]
    async fn test_access_token_without_token() {
        let client = ApiClient::new(ClientConfig::new("https://example.com")).unwrap();
        let result = client.access_token().await;

        assert!(matches!(result, Err(CacheError::Auth(_))));
        assert!(result.unwrap_err().is_precondition());
    }

    #[tokio::test]
    async fn test_fetch_feed() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/get-feed"))
            .and(query_param("limit", "10"))
            .and(query_param("lastTimeStamp", "1710237600000"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "posts": [{"_id": "p1", "likesCount": 2}, {"_id": "p2"}],
                    "lastTimestamp": "1710230000000"
                }
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let page = client
            .fetch_feed(None, Some("1710237600000"))
            .await
            .unwrap();

        assert_eq!(page.ids(), vec!["p1", "p2"]);
        assert_eq!(page.next_cursor.as_deref(), Some("1710230000000"));
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn test_fetch_user_posts_last_page() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/post/u1"))
            .and(query_param("type", "highlights"))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"_id": "p9"}],
                "nextCursor": null
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let page = client
            .fetch_user_posts("u1", "highlights", Some(5), None)
            .await
            .unwrap();

        assert_eq!(page.ids(), vec!["p9"]);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_fetch_hashtag_posts() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/hashtag/post"))
            .and(query_param("hashtag", "derby"))
            .and(query_param("cursor", "c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"_id": "p3"}],
                "nextCursor": "c2"
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let page = client
            .fetch_hashtag_posts("derby", "post", None, Some("c1"))
            .await
            .unwrap();

        assert_eq!(page.ids(), vec!["p3"]);
        assert_eq!(page.next_cursor.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn test_error_message_from_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/get-feed"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({"message": "database unavailable"})),
            )
            .mount(&server)
            .await;

        let client = client(&server).await;
        let err = client.fetch_feed(None, None).await.unwrap_err();

        match err {
            CacheError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "database unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_auth() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/notification"))
            .respond_with(ResponseTemplate::new(401).set_body_string("jwt expired"))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let err = client.fetch_notifications().await.unwrap_err();

        assert!(matches!(err, CacheError::Auth(ref m) if m == "jwt expired"));
        assert!(!err.is_precondition());
    }

    #[tokio::test]
    async fn test_malformed_envelope() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/post/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "posts": []
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let err = client
            .fetch_user_posts("u1", "post", None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_unlike_uses_delete() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/post/like"))
            .and(body_json(serde_json::json!({"targetId": "p1", "targetType": "post"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server).await;
        client.unlike_post("p1").await.unwrap();
    }

    #[tokio::test]
    async fn test_create_comment_returns_created() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/post/comment"))
            .and(body_json(serde_json::json!({"postId": "p1", "text": "great goal"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": {"_id": "c1", "postId": "p1", "text": "great goal"}
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let comment = client.create_comment("p1", None, "great goal").await.unwrap();

        assert_eq!(comment.id, "c1");
        assert_eq!(comment.text, "great goal");
    }

    #[test]
    fn test_endpoint_encodes_segments_below_base_path() {
        let client = ApiClient::new(ClientConfig::new("https://api.example.com/api/")).unwrap();

        let url = client.endpoint(&["post", "team/7?x#y"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/api/post/team%2F7%3Fx%23y");

        let root = ApiClient::new(ClientConfig::new("https://api.example.com")).unwrap();
        assert_eq!(
            root.endpoint(&["get-feed"]).unwrap().as_str(),
            "https://api.example.com/get-feed"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = ApiClient::new(ClientConfig::new("not a url"));
        assert!(matches!(result, Err(CacheError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_user_id_stays_in_its_segment() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/post/team%2F7"))
            .and(query_param("type", "post"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"_id": "p1"}],
                "nextCursor": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server).await;
        let page = client
            .fetch_user_posts("team/7", "post", None, None)
            .await
            .unwrap();

        assert_eq!(page.ids(), vec!["p1"]);
    }
}

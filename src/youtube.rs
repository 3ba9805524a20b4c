use async_trait::async_trait;
use log::{debug, info};
use url::{ParseError, Url};

use crate::config::Config;
use crate::error::{ApiError, Error, Result};
use crate::models::{
    ChatPage, InsertMessageRequest, LiveChatId, LiveChatMessageListResponse, PublishedMessage,
    VideoListResponse,
};
use crate::poller::ChatSource;

/// How a request proves who is calling.
///
/// Reads go out with the project's API key and never need user consent;
/// writing into a chat needs an OAuth bearer token.
#[derive(Debug, Clone, Copy)]
pub enum Auth<'a> {
    ApiKey(&'a str),
    Bearer(&'a str),
}

impl Auth<'_> {
    fn apply(self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Auth::ApiKey(key) => request.query(&[("key", key)]),
            Auth::Bearer(token) => request.bearer_auth(token),
        }
    }
}

pub struct YouTubeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl YouTubeClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("could not build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: config.youtube_base_url.trim_end_matches('/').to_string(),
            api_key: config.youtube_api_key.clone(),
        })
    }

    fn read_auth(&self) -> Auth<'_> {
        Auth::ApiKey(&self.api_key)
    }

    /// Maps a watch-page URL to the chat id of its running stream.
    pub async fn resolve(&self, url: &str) -> Result<LiveChatId> {
        let video_id = video_id_from_url(url)?;
        self.live_chat_id(&video_id).await
    }

    pub async fn live_chat_id(&self, video_id: &str) -> Result<LiveChatId> {
        debug!("Looking up live streaming details for video {}", video_id);
        let request = self
            .http
            .get(format!("{}/videos", self.base_url))
            .query(&[("part", "liveStreamingDetails"), ("id", video_id)]);

        let response: VideoListResponse = async {
            let response = ApiError::check(self.read_auth().apply(request).send().await?).await?;
            Ok::<_, ApiError>(response.json().await?)
        }
        .await
        .map_err(Error::Resolve)?;

        let chat_id = response
            .items
            .into_iter()
            .next()
            .and_then(|video| video.live_streaming_details)
            .and_then(|details| details.active_live_chat_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::NotLive(video_id.to_string()))?;

        info!("Video {} has live chat {}", video_id, chat_id);
        Ok(LiveChatId(chat_id))
    }

    pub async fn list_messages(
        &self,
        chat_id: &LiveChatId,
        page_token: Option<&str>,
    ) -> Result<ChatPage> {
        let mut request = self
            .http
            .get(format!("{}/liveChat/messages", self.base_url))
            .query(&[
                ("liveChatId", chat_id.as_str()),
                ("part", "snippet,authorDetails"),
            ]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response: LiveChatMessageListResponse = async {
            let response = ApiError::check(self.read_auth().apply(request).send().await?).await?;
            Ok::<_, ApiError>(response.json().await?)
        }
        .await
        .map_err(Error::Fetch)?;

        let page = ChatPage::from(response);
        debug!(
            "Fetched {} messages (next page token: {:?}, server polling hint: {:?})",
            page.messages.len(),
            page.next_page_token,
            page.polling_interval
        );
        Ok(page)
    }

    /// Inserts `text` into the chat. Only an OAuth bearer token is accepted by the API.
    pub async fn publish(
        &self,
        chat_id: &LiveChatId,
        text: &str,
        auth: Auth<'_>,
    ) -> Result<PublishedMessage> {
        let request = self
            .http
            .post(format!("{}/liveChat/messages", self.base_url))
            .query(&[("part", "snippet")])
            .json(&InsertMessageRequest::text(chat_id.as_str(), text));

        let published: PublishedMessage = async {
            let response = ApiError::check(auth.apply(request).send().await?).await?;
            Ok::<_, ApiError>(response.json().await?)
        }
        .await
        .map_err(Error::Publish)?;

        info!("Published message {} to chat {}", published.id, chat_id);
        Ok(published)
    }
}

#[async_trait]
impl ChatSource for YouTubeClient {
    async fn fetch_page(&self, chat_id: &LiveChatId, cursor: Option<&str>) -> Result<ChatPage> {
        self.list_messages(chat_id, cursor).await
    }
}

/// Pulls the video id out of a watch, short-link or `/live/` URL.
pub fn video_id_from_url(url: &str) -> Result<String> {
    let missing = || Error::MissingVideoId(url.to_string());
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        // `www.youtube.com/watch?v=...` carries no scheme.
        Err(ParseError::RelativeUrlWithoutBase) => {
            Url::parse(&format!("https://{}", url)).map_err(|_| missing())?
        }
        Err(_) => return Err(missing()),
    };

    if let Some((_, id)) = parsed.query_pairs().find(|(key, _)| key == "v") {
        if !id.is_empty() {
            return Ok(id.into_owned());
        }
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    let from_path = match (parsed.host_str(), segments.as_slice()) {
        (Some("youtu.be"), [id, ..]) => Some(*id),
        (_, ["live", id, ..]) | (_, ["shorts", id, ..]) => Some(*id),
        _ => None,
    };
    if let Some(id) = from_path {
        return Ok(id.to_string());
    }

    // Fall back to the last `=`-separated piece of the query.
    parsed
        .query()
        .and_then(|q| q.rsplit('=').next())
        .filter(|id| !id.is_empty() && !id.contains('&'))
        .map(str::to_string)
        .ok_or_else(missing)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hyper::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::stub;

    fn config(base_url: &str) -> Config {
        Config::from_lookup(|key| match key {
            "YOUTUBE_DATA_API_KEY" => Some("read-key".to_string()),
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "YTCHATBOT_HOME" => Some("/tmp/ytchatbot-test".to_string()),
            "YOUTUBE_API_BASE_URL" => Some(base_url.to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn extracts_trailing_video_id() {
        for (url, id) in [
            ("https://www.youtube.com/watch?v=cE4nBa0xjgc", "cE4nBa0xjgc"),
            ("https://www.youtube.com/watch?feature=share&v=wksD4rYTxLg", "wksD4rYTxLg"),
            ("https://www.youtube.com/watch?v=abc123&t=42", "abc123"),
            ("https://youtu.be/abc123", "abc123"),
            ("https://www.youtube.com/live/abc123?si=x", "abc123"),
            ("www.youtube.com/watch?v=cE4nBa0xjgc", "cE4nBa0xjgc"),
            ("youtube.com/watch?v=cE4nBa0xjgc", "cE4nBa0xjgc"),
            ("youtu.be/abc123", "abc123"),
        ] {
            assert_eq!(video_id_from_url(url).unwrap(), id, "{}", url);
        }
    }

    #[test]
    fn rejects_urls_without_video_id() {
        for url in ["https://www.youtube.com/", "not a url", "https://www.youtube.com/watch?v="] {
            assert!(
                matches!(video_id_from_url(url), Err(Error::MissingVideoId(_))),
                "{}",
                url
            );
        }
    }

    #[tokio::test]
    async fn resolves_active_chat_with_api_key() {
        let base = stub::serve(|req| {
            let query = stub::query(&req);
            assert_eq!(req.uri().path(), "/videos");
            assert_eq!(query.get("key").map(String::as_str), Some("read-key"));
            assert_eq!(query.get("id").map(String::as_str), Some("cE4nBa0xjgc"));
            assert!(req.headers().get("authorization").is_none());
            stub::json(
                StatusCode::OK,
                json!({"items": [{"liveStreamingDetails": {"activeLiveChatId": "chat-42"}}]}),
            )
        });
        let client = YouTubeClient::new(&config(&base)).unwrap();
        let chat_id = client
            .resolve("https://www.youtube.com/watch?v=cE4nBa0xjgc")
            .await
            .unwrap();
        assert_eq!(chat_id, LiveChatId("chat-42".into()));
    }

    #[tokio::test]
    async fn video_without_live_chat_is_not_live() {
        let base = stub::serve(|req| {
            let query = stub::query(&req);
            match query.get("id").map(String::as_str) {
                Some("ended") => stub::json(
                    StatusCode::OK,
                    json!({"items": [{"liveStreamingDetails": {"actualEndTime": "2024-01-01T00:00:00Z"}}]}),
                ),
                _ => stub::json(StatusCode::OK, json!({"items": []})),
            }
        });
        let client = YouTubeClient::new(&config(&base)).unwrap();
        assert!(matches!(client.live_chat_id("ended").await, Err(Error::NotLive(id)) if id == "ended"));
        assert!(matches!(client.live_chat_id("gone").await, Err(Error::NotLive(_))));
    }

    #[tokio::test]
    async fn lists_messages_with_page_token() {
        let base = stub::serve(|req| {
            let query = stub::query(&req);
            assert_eq!(req.uri().path(), "/liveChat/messages");
            assert_eq!(query.get("liveChatId").map(String::as_str), Some("chat-42"));
            assert_eq!(query.get("part").map(String::as_str), Some("snippet,authorDetails"));
            let next = match query.get("pageToken").map(String::as_str) {
                None => json!("page-2"),
                Some(_) => json!(null),
            };
            stub::json(
                StatusCode::OK,
                json!({
                    "items": [{"snippet": {"displayMessage": "hi"}, "authorDetails": {"displayName": "Alice"}}],
                    "nextPageToken": next,
                    "pollingIntervalMillis": 2000
                }),
            )
        });
        let client = YouTubeClient::new(&config(&base)).unwrap();
        let chat_id = LiveChatId("chat-42".into());

        let first = client.list_messages(&chat_id, None).await.unwrap();
        assert_eq!(first.next_page_token.as_deref(), Some("page-2"));
        assert_eq!(first.polling_interval, Some(Duration::from_secs(2)));
        assert_eq!(first.messages[0].to_string(), "Alice: hi");

        let second = client.list_messages(&chat_id, Some("page-2")).await.unwrap();
        assert_eq!(second.next_page_token, None);
    }

    #[tokio::test]
    async fn fetch_failure_propagates_status() {
        let base = stub::serve(|_| stub::json(StatusCode::SERVICE_UNAVAILABLE, json!({"error": "busy"})));
        let client = YouTubeClient::new(&config(&base)).unwrap();
        let err = client
            .list_messages(&LiveChatId("chat-42".into()), None)
            .await
            .unwrap_err();
        assert!(matches!(&err, Error::Fetch(ApiError::Status { status, .. }) if *status == StatusCode::SERVICE_UNAVAILABLE));
        assert!(err.is_transient());
    }

    fn insert_stub() -> String {
        stub::serve(|req| {
            assert_eq!(req.method(), hyper::Method::POST);
            match req.headers().get("authorization").and_then(|v| v.to_str().ok()) {
                Some("Bearer oauth-token") => {
                    stub::json(StatusCode::OK, json!({"id": "msg-1", "snippet": {}}))
                }
                _ => stub::json(
                    StatusCode::UNAUTHORIZED,
                    json!({"error": {"code": 401, "message": "Login Required"}}),
                ),
            }
        })
    }

    #[tokio::test]
    async fn publish_with_oauth_token_succeeds() {
        let client = YouTubeClient::new(&config(&insert_stub())).unwrap();
        let published = client
            .publish(&LiveChatId("chat-42".into()), "hello", Auth::Bearer("oauth-token"))
            .await
            .unwrap();
        assert_eq!(published.id, "msg-1");
    }

    #[tokio::test]
    async fn publish_with_api_key_is_rejected() {
        let client = YouTubeClient::new(&config(&insert_stub())).unwrap();
        let err = client
            .publish(&LiveChatId("chat-42".into()), "hello", Auth::ApiKey("read-key"))
            .await
            .unwrap_err();
        match err {
            Error::Publish(api) => assert!(api.is_unauthorized()),
            other => panic!("unexpected error: {}", other),
        }
    }
}

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use oauth2::PkceCodeVerifier;
use serde::{Deserialize, Serialize};

/// Identifier of a stream's active chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveChatId(pub String);

impl LiveChatId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LiveChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub author: String,
    pub text: String,
}

impl ChatMessage {
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
        }
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.author, self.text)
    }
}

/// One page of chat messages as returned by a fetch backend.
#[derive(Debug, Clone, Default)]
pub struct ChatPage {
    pub messages: Vec<ChatMessage>,
    pub next_page_token: Option<String>,
    pub polling_interval: Option<Duration>,
}

/// Google "installed application" client secret file.
#[derive(Deserialize)]
pub struct ClientSecrets {
    pub installed: InstalledSecrets,
}

#[derive(Deserialize)]
pub struct InstalledSecrets {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
}

/// Write credential persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expiry: DateTime<Utc>,
}

impl Credential {
    /// Treats tokens within a minute of expiry as already expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(60) >= self.expiry
    }
}

/// Response of `videos.list?part=liveStreamingDetails`.
#[derive(Deserialize)]
pub struct VideoListResponse {
    #[serde(default)]
    pub items: Vec<Video>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamingDetails {
    pub active_live_chat_id: Option<String>,
}

/// Response of `liveChatMessages.list?part=snippet,authorDetails`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatMessageListResponse {
    #[serde(default)]
    pub items: Vec<LiveChatMessageItem>,
    pub next_page_token: Option<String>,
    pub polling_interval_millis: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatMessageItem {
    pub snippet: Option<LiveChatMessageSnippet>,
    pub author_details: Option<AuthorDetails>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatMessageSnippet {
    pub display_message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorDetails {
    pub display_name: Option<String>,
}

impl LiveChatMessageItem {
    /// Items without an author name (system events) yield nothing.
    pub fn into_message(self) -> Option<ChatMessage> {
        let author = self
            .author_details
            .and_then(|a| a.display_name)
            .filter(|name| !name.is_empty())?;
        let text = self
            .snippet
            .and_then(|s| s.display_message)
            .unwrap_or_default();
        Some(ChatMessage::new(author, text))
    }
}

impl From<LiveChatMessageListResponse> for ChatPage {
    fn from(response: LiveChatMessageListResponse) -> Self {
        ChatPage {
            messages: response
                .items
                .into_iter()
                .filter_map(LiveChatMessageItem::into_message)
                .collect(),
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
            polling_interval: response.polling_interval_millis.map(Duration::from_millis),
        }
    }
}

/// Body of `liveChatMessages.insert?part=snippet`.
#[derive(Serialize)]
pub struct InsertMessageRequest<'a> {
    pub snippet: InsertSnippet<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertSnippet<'a> {
    pub live_chat_id: &'a str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text_message_details: TextMessageDetails<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMessageDetails<'a> {
    pub message_text: &'a str,
}

impl<'a> InsertMessageRequest<'a> {
    pub fn text(live_chat_id: &'a str, message_text: &'a str) -> Self {
        InsertMessageRequest {
            snippet: InsertSnippet {
                live_chat_id,
                kind: "textMessageEvent",
                text_message_details: TextMessageDetails { message_text },
            },
        }
    }
}

/// The inserted chat message as echoed back by the API.
#[derive(Debug, Deserialize)]
pub struct PublishedMessage {
    pub id: String,
}

/// Body of an OpenAI-compatible `/chat/completions` request.
#[derive(Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<CompletionMessage>,
    pub max_tokens: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CompletionMessage {
    pub role: String,
    pub content: String,
}

impl CompletionMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionChoiceMessage,
}

#[derive(Deserialize)]
pub struct CompletionChoiceMessage {
    pub content: Option<String>,
}

/// Shared between the OAuth callback server and the flow waiting on it.
pub struct OAuthState {
    pub auth_code: Option<String>,
    pub csrf_state: String,
    pub pkce_verifier: Option<PkceCodeVerifier>,
}

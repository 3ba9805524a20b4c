use std::collections::VecDeque;

use log::{debug, info};

use crate::config::Config;
use crate::error::{ApiError, Error, Result};
use crate::models::{ChatMessage, CompletionMessage, CompletionRequest, CompletionResponse};

/// YouTube refuses chat messages longer than this many characters.
pub const MAX_CHAT_MESSAGE_CHARS: usize = 200;

/// Renders messages as `author: text` lines.
pub fn format_transcript<'m>(messages: impl IntoIterator<Item = &'m ChatMessage>) -> String {
    messages
        .into_iter()
        .map(ChatMessage::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Chat history kept for the next reply, oldest messages dropped first.
#[derive(Debug)]
pub struct TranscriptBuffer {
    messages: VecDeque<ChatMessage>,
    capacity: usize,
}

impl TranscriptBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn extend(&mut self, page: impl IntoIterator<Item = ChatMessage>) {
        for message in page {
            if self.messages.len() == self.capacity {
                self.messages.pop_front();
            }
            if self.capacity > 0 {
                self.messages.push_back(message);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn render(&self) -> String {
        format_transcript(&self.messages)
    }
}

/// Asks a chat-completion endpoint for a one-line reply to the chat.
pub struct Responder {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    persona: String,
    max_tokens: u32,
}

impl Responder {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("could not build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key: config.openai_api_key.clone(),
            model: config.openai_model.clone(),
            persona: config.persona.clone(),
            max_tokens: config.max_reply_tokens,
        })
    }

    pub async fn respond(&self, history: &str) -> Result<String> {
        let history = if history.trim().is_empty() {
            "(no messages yet)"
        } else {
            history
        };
        let request = CompletionRequest {
            model: &self.model,
            messages: vec![
                CompletionMessage::new("system", self.persona.as_str()),
                CompletionMessage::new("user", format!("Here is all chat history:\n{}", history)),
            ],
            max_tokens: self.max_tokens,
        };

        debug!("Requesting completion from {} (max {} tokens)", self.model, self.max_tokens);
        let response: CompletionResponse = async {
            let response = self
                .http
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await?;
            Ok::<_, ApiError>(ApiError::check(response).await?.json().await?)
        }
        .await
        .map_err(Error::Completion)?;

        let raw = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        let reply = single_line(&raw, MAX_CHAT_MESSAGE_CHARS);
        if reply.is_empty() {
            return Err(Error::EmptyReply);
        }
        info!("Generated reply: {}", reply);
        Ok(reply)
    }
}

/// Collapses all whitespace runs to single spaces and cuts to `max_chars` characters.
pub fn single_line(text: &str, max_chars: usize) -> String {
    let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match joined.char_indices().nth(max_chars) {
        Some((cut, _)) => joined[..cut].trim_end().to_string(),
        None => joined,
    }
}

#[cfg(test)]
mod tests {
    use hyper::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::stub;

    fn config(base_url: &str) -> Config {
        Config::from_lookup(|key| match key {
            "YOUTUBE_DATA_API_KEY" => Some("read-key".to_string()),
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "YTCHATBOT_HOME" => Some("/tmp/ytchatbot-test".to_string()),
            "OPENAI_BASE_URL" => Some(base_url.to_string()),
            _ => None,
        })
        .unwrap()
    }

    fn completion(content: &str) -> String {
        let content = content.to_string();
        stub::serve(move |req| {
            assert_eq!(req.uri().path(), "/chat/completions");
            assert_eq!(
                req.headers().get("authorization").and_then(|v| v.to_str().ok()),
                Some("Bearer sk-test")
            );
            stub::json(
                StatusCode::OK,
                json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]}),
            )
        })
    }

    #[test]
    fn transcript_lists_authors_and_text() {
        let messages = [ChatMessage::new("Alice", "hi"), ChatMessage::new("Bob", "")];
        assert_eq!(format_transcript(&messages), "Alice: hi\nBob: ");
        assert_eq!(format_transcript(&[] as &[ChatMessage]), "");
    }

    #[test]
    fn buffer_drops_oldest() {
        let mut buffer = TranscriptBuffer::new(2);
        buffer.extend(vec![
            ChatMessage::new("a", "1"),
            ChatMessage::new("b", "2"),
            ChatMessage::new("c", "3"),
        ]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.render(), "b: 2\nc: 3");

        let mut empty = TranscriptBuffer::new(0);
        empty.extend(vec![ChatMessage::new("a", "1")]);
        assert!(empty.is_empty());
    }

    #[test]
    fn single_line_collapses_and_truncates() {
        assert_eq!(single_line("  Hello!\n\nSecond   paragraph. ", 200), "Hello! Second paragraph.");
        assert_eq!(single_line("こんにちは世界", 5), "こんにちは");
        assert_eq!(single_line("", 10), "");
    }

    #[tokio::test]
    async fn multi_paragraph_completion_becomes_one_line() {
        let responder = Responder::new(&config(&completion("Welcome, Alice!\n\nGlad you're here."))).unwrap();
        let reply = responder.respond("Alice: hi\nBob: yo").await.unwrap();
        assert_eq!(reply, "Welcome, Alice! Glad you're here.");
        assert!(!reply.contains('\n'));
    }

    #[tokio::test]
    async fn empty_transcript_still_gets_a_reply() {
        let responder = Responder::new(&config(&completion("Hi everyone!"))).unwrap();
        assert_eq!(responder.respond("").await.unwrap(), "Hi everyone!");
    }

    #[tokio::test]
    async fn blank_completion_is_an_error() {
        let responder = Responder::new(&config(&completion("   "))).unwrap();
        assert!(matches!(responder.respond("Alice: hi").await, Err(Error::EmptyReply)));
    }

    #[tokio::test]
    async fn api_failure_is_reported() {
        let base = stub::serve(|_| stub::json(StatusCode::UNAUTHORIZED, json!({"error": "bad key"})));
        let responder = Responder::new(&config(&base)).unwrap();
        let err = responder.respond("Alice: hi").await.unwrap_err();
        assert!(matches!(err, Error::Completion(api) if api.is_unauthorized()));
    }
}

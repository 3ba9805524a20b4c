use std::io::{self, Write};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::error::{Error, Result};
use crate::models::{ChatMessage, ChatPage, LiveChatId};

/// Anything that can hand out pages of a live chat.
#[async_trait]
pub trait ChatSource {
    async fn fetch_page(&self, chat_id: &LiveChatId, cursor: Option<&str>) -> Result<ChatPage>;
}

/// What to do after a page that carries no continuation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorPolicy {
    /// Fetch again without a cursor, starting over at the server's current window.
    #[default]
    Restart,
    /// Treat the missing token as the end of the chat.
    Terminate,
}

/// Walks a live chat page by page, sleeping `interval` between fetches.
pub struct Poller<'a, S: ?Sized> {
    source: &'a S,
    chat_id: LiveChatId,
    interval: Duration,
    policy: CursorPolicy,
    cursor: Option<String>,
    fetched: bool,
    exhausted: bool,
}

impl<'a, S: ChatSource + ?Sized> Poller<'a, S> {
    pub fn new(source: &'a S, chat_id: LiveChatId, interval: Duration, policy: CursorPolicy) -> Self {
        Self {
            source,
            chat_id,
            interval,
            policy,
            cursor: None,
            fetched: false,
            exhausted: false,
        }
    }

    pub fn chat_id(&self) -> &LiveChatId {
        &self.chat_id
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Fetches the next page. `Ok(None)` only happens under [`CursorPolicy::Terminate`].
    ///
    /// Errors are returned as-is; the cursor is left untouched so the caller may call
    /// again to retry the same page.
    pub async fn next_page(&mut self) -> Result<Option<Vec<ChatMessage>>> {
        if self.exhausted {
            return Ok(None);
        }
        if self.fetched {
            tokio::time::sleep(self.interval).await;
        }
        self.fetched = true;

        let page = self
            .source
            .fetch_page(&self.chat_id, self.cursor.as_deref())
            .await?;

        self.cursor = page.next_page_token;
        if self.cursor.is_none() {
            match self.policy {
                CursorPolicy::Restart => debug!("No continuation token, next fetch starts over"),
                CursorPolicy::Terminate => {
                    debug!("No continuation token, stopping");
                    self.exhausted = true;
                }
            }
        }
        Ok(Some(page.messages))
    }
}

/// Counts consecutive transient fetch failures against a fixed allowance.
#[derive(Debug)]
pub struct FailureBudget {
    limit: u32,
    used: u32,
}

impl FailureBudget {
    pub fn new(limit: u32) -> Self {
        Self { limit, used: 0 }
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Call after a successful fetch.
    pub fn reset(&mut self) {
        self.used = 0;
    }

    /// Returns `true` when polling may go on after `err`. Permanent errors never may.
    pub fn absorb(&mut self, err: &Error) -> bool {
        if !err.is_transient() || self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }
}

/// Writes one `author: text` line per message.
pub fn print_messages<W: Write>(out: &mut W, messages: &[ChatMessage]) -> io::Result<()> {
    for message in messages {
        writeln!(out, "{}", message)?;
    }
    out.flush()
}

//! Narrow chat-transport seam.
//!
//! Moderation logic talks to Telegram exclusively through [`ChatTransport`]
//! so the whole pipeline can run against a mock in tests.

use async_trait::async_trait;
use std::collections::HashSet;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId, ParseMode, ThreadId};
use tracing::warn;

/// Handle to one delivered chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    /// Chat the message lives in
    pub chat_id: i64,
    /// Message id within the chat
    pub message_id: i32,
}

/// The few transport operations moderation needs.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Delete a message. Idempotent: failures (already deleted, missing
    /// permission) are logged and reported as `false`, never bubbled up.
    async fn delete_message(&self, message: MessageRef) -> bool;

    /// Send plain text into a chat, optionally into a forum topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    async fn send_to_thread(
        &self,
        chat_id: i64,
        thread_id: Option<i32>,
        text: &str,
    ) -> anyhow::Result<MessageRef>;

    /// Send HTML-formatted text into a chat, optionally into a forum topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    async fn send_html(
        &self,
        chat_id: i64,
        thread_id: Option<i32>,
        text: &str,
    ) -> anyhow::Result<MessageRef>;

    /// Current administrator ids of a chat.
    ///
    /// # Errors
    ///
    /// Returns an error if the roster cannot be fetched.
    async fn administrators(&self, chat_id: i64) -> anyhow::Result<HashSet<i64>>;
}

/// Production transport over a teloxide [`Bot`].
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    /// Wrap a bot handle.
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn delete_message(&self, message: MessageRef) -> bool {
        match self
            .bot
            .delete_message(ChatId(message.chat_id), MessageId(message.message_id))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    chat_id = message.chat_id,
                    message_id = message.message_id,
                    "failed to delete message: {e}"
                );
                false
            }
        }
    }

    async fn send_to_thread(
        &self,
        chat_id: i64,
        thread_id: Option<i32>,
        text: &str,
    ) -> anyhow::Result<MessageRef> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if let Some(thread) = thread_id {
            request = request.message_thread_id(ThreadId(MessageId(thread)));
        }
        let sent = request.await?;
        Ok(MessageRef {
            chat_id,
            message_id: sent.id.0,
        })
    }

    async fn send_html(
        &self,
        chat_id: i64,
        thread_id: Option<i32>,
        text: &str,
    ) -> anyhow::Result<MessageRef> {
        let mut request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html);
        if let Some(thread) = thread_id {
            request = request.message_thread_id(ThreadId(MessageId(thread)));
        }
        let sent = request.await?;
        Ok(MessageRef {
            chat_id,
            message_id: sent.id.0,
        })
    }

    async fn administrators(&self, chat_id: i64) -> anyhow::Result<HashSet<i64>> {
        let members = self.bot.get_chat_administrators(ChatId(chat_id)).await?;
        Ok(members
            .into_iter()
            .map(|member| member.user.id.0.cast_signed())
            .collect())
    }
}

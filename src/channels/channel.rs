//! The seam between chat front-ends and the chat runner.
//!
//! A front-end yields [`IncomingMessage`]s and later receives one
//! [`OutgoingResponse`] per message, plus any [`StatusUpdate`]s sent while
//! the agent works.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use uuid::Uuid;

use crate::error::ChannelError;

/// One line of user input.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: Uuid,
    /// Name of the channel that produced it; replies are routed back here.
    pub channel: String,
    pub user_id: String,
    pub content: String,
    /// Chat within the channel. `None` means the user's only chat.
    pub thread_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn new(
        channel: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            user_id: user_id.into(),
            content: content.into(),
            thread_id: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// A reply addressed to the same chat as this message.
    pub fn reply(&self, content: impl Into<String>) -> OutgoingResponse {
        let response = OutgoingResponse::text(content);
        match self.thread_id {
            Some(ref thread_id) => response.in_thread(thread_id.clone()),
            None => response,
        }
    }
}

/// Stream of incoming messages.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// The agent's final answer to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingResponse {
    pub content: String,
    pub thread_id: Option<String>,
}

impl OutgoingResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            thread_id: None,
        }
    }

    pub fn in_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

/// Progress sent between a message and its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Thinking(String),
    /// A piece of the reply text, in order. The final
    /// [`OutgoingResponse`] still carries the whole reply.
    StreamChunk(String),
    Status(String),
}

/// A chat front-end such as the terminal REPL or the HTTP endpoint.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique name, e.g. "repl". Must match [`IncomingMessage::channel`].
    fn name(&self) -> &str;

    /// Begin accepting input. The stream ends when the user leaves.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Deliver the final reply to `msg`.
    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError>;

    /// Show progress for `msg`. Channels that cannot show progress ignore it.
    async fn send_status(
        &self,
        _msg: &IncomingMessage,
        _status: StatusUpdate,
    ) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError>;

    /// Release listeners and pending requests.
    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_keeps_the_thread() {
        let plain = IncomingMessage::new("repl", "u", "hi");
        assert_eq!(plain.reply("hello"), OutgoingResponse::text("hello"));

        let threaded = IncomingMessage::new("http", "u", "hi").with_thread("t-1");
        let reply = threaded.reply("hello");
        assert_eq!(reply.thread_id.as_deref(), Some("t-1"));
        assert_eq!(reply.content, "hello");
    }
}

//! Chat lifecycle: hooks and the runner that drives them.
//!
//! The runner pulls messages from the channel manager one at a time. A
//! message from a chat it has not seen yet first goes through
//! [`ChatHooks::on_chat_start`]; every message then goes through
//! [`ChatHooks::on_message`], whose streamed chunks are forwarded to the
//! channel as they arrive.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::agent::{SessionKey, UserSession, UserSessionStore};
use crate::channels::{ChannelManager, IncomingMessage, StatusUpdate};
use crate::error::{ChannelError, Error};
use crate::llm::ChunkSink;

/// Chats idle this long are dropped from memory.
const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

const PRUNE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Callbacks invoked by [`ChatRunner`].
#[async_trait]
pub trait ChatHooks: Send + Sync {
    /// Called once when a chat starts.
    async fn on_chat_start(&self, session: &mut UserSession) -> Result<(), Error>;

    /// Called for each message; returns the full reply.
    async fn on_message(
        &self,
        session: &mut UserSession,
        message: &IncomingMessage,
        sink: &ChunkSink,
    ) -> Result<String, Error>;
}

/// Drives chat hooks from the channels' message stream.
pub struct ChatRunner<H> {
    hooks: Arc<H>,
    channels: Arc<ChannelManager>,
    sessions: Arc<UserSessionStore>,
}

impl<H: ChatHooks + 'static> ChatRunner<H> {
    pub fn new(hooks: Arc<H>, channels: Arc<ChannelManager>) -> Self {
        Self {
            hooks,
            channels,
            sessions: Arc::new(UserSessionStore::new()),
        }
    }

    pub fn sessions(&self) -> &Arc<UserSessionStore> {
        &self.sessions
    }

    /// Process messages until every channel closes or Ctrl-C is pressed.
    pub async fn run(&self) -> Result<(), ChannelError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Process messages until every channel closes or `shutdown` resolves.
    ///
    /// A message already being handled is finished before shutting down.
    pub async fn run_until(
        &self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ChannelError> {
        tokio::pin!(shutdown);
        let mut stream = self.channels.start_all().await?;
        for (name, health) in self.channels.health_check_all().await {
            if let Err(e) = health {
                tracing::warn!("Channel {} unhealthy after start: {}", name, e);
            }
        }
        let mut prune = tokio::time::interval(PRUNE_INTERVAL);
        prune.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                next = stream.next() => match next {
                    Some(msg) => {
                        self.handle_message(&msg).await;
                    }
                    None => {
                        tracing::info!("All channels closed");
                        break;
                    }
                },
                _ = prune.tick() => {
                    self.sessions.prune_stale_sessions(SESSION_IDLE_TIMEOUT).await;
                }
            }
        }

        self.channels.shutdown_all().await;
        Ok(())
    }

    /// Handle one message end to end and deliver the reply.
    ///
    /// Returns the reply text that was sent.
    pub async fn handle_message(&self, msg: &IncomingMessage) -> String {
        let content = match self.process(msg).await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(
                    channel = %msg.channel,
                    user_id = %msg.user_id,
                    "Message failed: {}",
                    e
                );
                format!("Error: {e}")
            }
        };

        if let Err(e) = self.channels.respond(msg, msg.reply(content.clone())).await {
            tracing::error!("Failed to deliver reply on {}: {}", msg.channel, e);
        }
        content
    }

    async fn process(&self, msg: &IncomingMessage) -> Result<String, Error> {
        let key = SessionKey::new(&msg.channel, &msg.user_id, msg.thread_id.as_deref());
        let (session, is_new) = self.sessions.get_or_create(key.clone()).await;
        let mut session = session.lock().await;
        session.touch();

        if is_new {
            if let Err(e) = self.hooks.on_chat_start(&mut session).await {
                // Forget the chat so the next message starts it again.
                self.sessions.remove(&key).await;
                return Err(e);
            }
        }

        if let Err(e) = self
            .channels
            .send_status(msg, StatusUpdate::Thinking("Thinking...".to_string()))
            .await
        {
            tracing::debug!("Thinking status not delivered on {}: {}", msg.channel, e);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let forwarder = {
            let channels = Arc::clone(&self.channels);
            let msg = msg.clone();
            tokio::spawn(async move {
                while let Some(chunk) = rx.recv().await {
                    if let Err(e) = channels
                        .send_status(&msg, StatusUpdate::StreamChunk(chunk))
                        .await
                    {
                        tracing::debug!("Dropping stream chunk: {}", e);
                    }
                }
            })
        };

        let result = self.hooks.on_message(&mut session, msg, &tx).await;
        drop(tx);
        let _ = forwarder.await;
        result
    }
}

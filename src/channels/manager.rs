//! Channel manager for coordinating input channels.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream;
use tokio::sync::RwLock;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate};
use crate::error::ChannelError;

/// Holds the running channels and merges their message streams.
#[derive(Default)]
pub struct ChannelManager {
    channels: RwLock<HashMap<String, Arc<dyn Channel>>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel under its name.
    pub async fn add(&self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        tracing::debug!("Added channel: {}", name);
        self.channels.write().await.insert(name, channel);
    }

    /// Start all channels and return a merged stream of messages.
    ///
    /// Channels that fail to start are logged and skipped.
    pub async fn start_all(&self) -> Result<MessageStream, ChannelError> {
        let channels = self.channels.read().await;
        let mut streams = Vec::new();

        for (name, channel) in channels.iter() {
            match channel.start().await {
                Ok(stream) => {
                    tracing::info!("Started channel: {}", name);
                    streams.push(stream);
                }
                Err(e) => tracing::error!("Failed to start channel {}: {}", name, e),
            }
        }

        if streams.is_empty() {
            return Err(ChannelError::StartupFailed {
                name: "all".to_string(),
                reason: "No channels started successfully".to_string(),
            });
        }

        Ok(Box::pin(stream::select_all(streams)))
    }

    /// Deliver a reply through the channel the message came from.
    pub async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let channel = self.get(&msg.channel).await.ok_or_else(|| ChannelError::SendFailed {
            name: msg.channel.clone(),
            reason: "Channel not found".to_string(),
        })?;
        channel.respond(msg, response).await
    }

    /// Send progress for a message. Unknown channels are ignored.
    pub async fn send_status(
        &self,
        msg: &IncomingMessage,
        status: StatusUpdate,
    ) -> Result<(), ChannelError> {
        match self.get(&msg.channel).await {
            Some(channel) => channel.send_status(msg, status).await,
            None => Ok(()),
        }
    }

    /// Check health of all channels.
    pub async fn health_check_all(&self) -> HashMap<String, Result<(), ChannelError>> {
        let channels = self.channels.read().await;
        let mut results = HashMap::new();
        for (name, channel) in channels.iter() {
            results.insert(name.clone(), channel.health_check().await);
        }
        results
    }

    /// Shut down every channel, logging failures.
    pub async fn shutdown_all(&self) {
        let channels = self.channels.read().await;
        for (name, channel) in channels.iter() {
            if let Err(e) = channel.shutdown().await {
                tracing::error!("Error shutting down channel {}: {}", name, e);
            }
        }
    }

    async fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.read().await.get(name).cloned()
    }
}

use crate::error::ApiError;
use crate::history::{ ConversationKey, ConversationStore };
use crate::llm::chat::stream::{ pump, RelayChunk };
use crate::llm::chat::ChatCompletionClient;
use crate::models::chat::ChatMessage;
use log::info;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const RELAY_CHANNEL_CAPACITY: usize = 32;

pub enum RelayReply {
    /// Relayed text, fed by a background task that owns the stream guard.
    Streaming(ReceiverStream<RelayChunk>),
    /// Cancelled before the upstream answered.
    Stopped,
}

/// Forwards conversations to the upstream chat API and streams the replies
/// back, keeping per-conversation state in the injected store.
pub struct ChatRelay {
    client: ChatCompletionClient,
    store: Arc<ConversationStore>,
    cancel_superseded: bool,
}

impl ChatRelay {
    pub fn new(
        client: ChatCompletionClient,
        store: Arc<ConversationStore>,
        cancel_superseded: bool
    ) -> Self {
        Self { client, store, cancel_superseded }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub async fn submit(
        &self,
        key: ConversationKey,
        message: ChatMessage
    ) -> Result<RelayReply, ApiError> {
        let url = self.client.endpoint()?;

        let history = self.store.append_message(&key, message);
        let guard = self.store.begin_stream(&key, history.clone(), self.cancel_superseded);
        let token = guard.token().clone();
        info!("Relaying {} ({} message(s)) to {}", key, history.len(), url);

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("Reply for {} stopped before the upstream answered", key);
                return Ok(RelayReply::Stopped);
            }
            response = self.client.open_stream(url, &history) => response?,
        };

        let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
        tokio::spawn(pump(response.bytes_stream(), guard, tx));
        Ok(RelayReply::Streaming(ReceiverStream::new(rx)))
    }

    /// Aborts the reply streaming for `key`, if any.
    pub fn cancel(&self, key: &ConversationKey) -> bool {
        let cancelled = self.store.cancel(key);
        if cancelled {
            info!("Cancelled reply for {}", key);
        }
        cancelled
    }
}

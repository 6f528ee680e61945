mod memory;

pub use memory::{ ConversationKey, ConversationStore, StreamGuard };

use log::{ debug, info };
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_CHAT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Runs `sweep` on a fixed interval for as long as the returned task lives.
pub fn spawn_sweeper(store: Arc<ConversationStore>, every: Duration) -> JoinHandle<()> {
    info!(
        "Conversation sweeper running every {:?} (idle TTL {:?})",
        every,
        store.ttl()
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = store.sweep();
            if removed > 0 {
                debug!("Sweeper dropped {} idle conversation(s)", removed);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::ChatMessage;

    #[tokio::test(start_paused = true)]
    async fn sweeper_drops_idle_conversations_in_the_background() {
        let store = Arc::new(ConversationStore::new(Duration::from_millis(30)));
        let key = ConversationKey::new("c1", None);
        store.append_message(&key, ChatMessage::user("hi"));

        let handle = spawn_sweeper(store.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        assert!(store.history(&key).is_none());
        assert_eq!(store.conversation_count(), 0);
    }
}

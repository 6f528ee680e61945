use crate::models::chat::ChatMessage;
use log::warn;
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::{ Arc, Mutex, MutexGuard };
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const ANONYMOUS_USER: &str = "anon";

/// Namespaces all per-conversation state: a client conversation id scoped by
/// the client's user id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    user_id: String,
    id: String,
}

impl ConversationKey {
    pub fn new(id: impl Into<String>, user_id: Option<&str>) -> Self {
        Self {
            user_id: user_id.unwrap_or(ANONYMOUS_USER).to_string(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.id)
    }
}

struct ActiveStream {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct StoreState {
    histories: HashMap<ConversationKey, Vec<ChatMessage>>,
    last_active: HashMap<ConversationKey, Instant>,
    streams: HashMap<ConversationKey, ActiveStream>,
    next_generation: u64,
}

/// Process-lifetime conversation state for the assistant relay.
///
/// Every operation takes the single state lock for a short, synchronous
/// critical section, so "append and snapshot" style sequences are atomic even
/// on the multi-threaded runtime.
pub struct ConversationStore {
    state: Mutex<StoreState>,
    ttl: Duration,
}

impl ConversationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends `message` to the conversation (creating it if new), refreshes
    /// its last-active time and returns the full history after the append.
    pub fn append_message(&self, key: &ConversationKey, message: ChatMessage) -> Vec<ChatMessage> {
        let mut state = self.lock();
        state.last_active.insert(key.clone(), Instant::now());
        let history = state.histories.entry(key.clone()).or_default();
        history.push(message);
        history.clone()
    }

    pub fn history(&self, key: &ConversationKey) -> Option<Vec<ChatMessage>> {
        self.lock().histories.get(key).cloned()
    }

    pub fn is_streaming(&self, key: &ConversationKey) -> bool {
        self.lock().streams.contains_key(key)
    }

    pub fn conversation_count(&self) -> usize {
        self.lock().histories.len()
    }

    /// Registers a fresh cancellation handle for `key` and returns the guard
    /// that owns it for the lifetime of one relayed reply.
    ///
    /// A handle already registered under the same key is replaced. It keeps
    /// running unless `cancel_previous` is set.
    pub fn begin_stream(
        self: &Arc<Self>,
        key: &ConversationKey,
        history: Vec<ChatMessage>,
        cancel_previous: bool
    ) -> StreamGuard {
        let token = CancellationToken::new();
        let generation = {
            let mut state = self.lock();
            state.next_generation += 1;
            let generation = state.next_generation;
            let previous = state.streams.insert(key.clone(), ActiveStream {
                generation,
                token: token.clone(),
            });
            if let Some(previous) = previous {
                if cancel_previous {
                    previous.token.cancel();
                } else {
                    warn!("Conversation {} already has a reply streaming; both will run", key);
                }
            }
            generation
        };

        StreamGuard {
            store: Arc::clone(self),
            key: key.clone(),
            generation,
            token,
            history,
            reply: String::new(),
        }
    }

    /// Aborts the reply currently streaming for `key`. Returns false when
    /// nothing was streaming.
    pub fn cancel(&self, key: &ConversationKey) -> bool {
        let removed = {
            let mut state = self.lock();
            if let Some(last) = state.last_active.get_mut(key) {
                *last = Instant::now();
            }
            state.streams.remove(key)
        };
        match removed {
            Some(stream) => {
                stream.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Drops every conversation idle for at least the TTL that has no live
    /// stream. Returns how many conversations were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut guard = self.lock();
        let state = &mut *guard;

        state.streams.retain(|_, stream| !stream.token.is_cancelled());

        let expired: Vec<ConversationKey> = state.last_active
            .iter()
            .filter(|(key, last)| {
                now.saturating_duration_since(**last) >= self.ttl &&
                    !state.streams.contains_key(*key)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.last_active.remove(key);
            state.histories.remove(key);
        }
        expired.len()
    }

    fn finish_stream(
        &self,
        key: &ConversationKey,
        generation: u64,
        fallback: Vec<ChatMessage>,
        reply: String
    ) {
        let mut state = self.lock();
        if !reply.is_empty() {
            state.histories
                .entry(key.clone())
                .or_insert(fallback)
                .push(ChatMessage::assistant(reply));
        }
        state.last_active.insert(key.clone(), Instant::now());
        let owns_entry = state.streams
            .get(key)
            .map(|stream| stream.generation == generation)
            .unwrap_or(false);
        if owns_entry {
            state.streams.remove(key);
        }
    }
}

/// Owns one in-flight reply. Dropping it records the accumulated assistant
/// reply, refreshes the conversation and unregisters the cancellation handle,
/// however the stream ended.
pub struct StreamGuard {
    store: Arc<ConversationStore>,
    key: ConversationKey,
    generation: u64,
    token: CancellationToken,
    history: Vec<ChatMessage>,
    reply: String,
}

impl StreamGuard {
    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn push_reply(&mut self, text: &str) {
        self.reply.push_str(text);
    }

    pub fn reply(&self) -> &str {
        &self.reply
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let reply = mem::take(&mut self.reply);
        let history = mem::take(&mut self.history);
        self.store.finish_stream(&self.key, self.generation, history, reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<ConversationStore> {
        Arc::new(ConversationStore::new(Duration::from_secs(300)))
    }

    #[test]
    fn key_defaults_to_anonymous_user() {
        assert_eq!(ConversationKey::new("c1", None).to_string(), "anon:c1");
        assert_eq!(ConversationKey::new("c1", Some("u1")).to_string(), "u1:c1");
        assert_ne!(ConversationKey::new("c1", None), ConversationKey::new("c1", Some("u1")));
    }

    #[test]
    fn finished_stream_appends_reply_and_unregisters() {
        let store = store();
        let key = ConversationKey::new("c1", None);
        let history = store.append_message(&key, ChatMessage::user("hi"));

        let mut guard = store.begin_stream(&key, history, false);
        assert!(store.is_streaming(&key));
        guard.push_reply("hel");
        guard.push_reply("lo");
        drop(guard);

        assert!(!store.is_streaming(&key));
        assert_eq!(
            store.history(&key).unwrap(),
            vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")]
        );
    }

    #[test]
    fn empty_reply_adds_nothing() {
        let store = store();
        let key = ConversationKey::new("c1", None);
        let history = store.append_message(&key, ChatMessage::user("hi"));
        drop(store.begin_stream(&key, history, false));
        assert_eq!(store.history(&key).unwrap().len(), 1);
    }

    #[test]
    fn history_length_counts_users_plus_non_empty_replies() {
        let store = store();
        let key = ConversationKey::new("c1", Some("u"));
        let replies = ["a", "", "b"];
        for reply in replies {
            let history = store.append_message(&key, ChatMessage::user("q"));
            let mut guard = store.begin_stream(&key, history, false);
            guard.push_reply(reply);
        }
        assert_eq!(store.history(&key).unwrap().len(), 3 + 2);
    }

    #[test]
    fn cancel_reports_whether_a_stream_was_live() {
        let store = store();
        let key = ConversationKey::new("c1", None);
        assert!(!store.cancel(&key));

        let history = store.append_message(&key, ChatMessage::user("hi"));
        let guard = store.begin_stream(&key, history, false);
        assert!(store.cancel(&key));
        assert!(guard.is_cancelled());
        assert!(!store.is_streaming(&key));
        assert!(!store.cancel(&key));
    }

    #[test]
    fn cancel_without_stream_leaves_history_alone() {
        let store = store();
        let key = ConversationKey::new("c1", None);
        store.append_message(&key, ChatMessage::user("hi"));
        assert!(!store.cancel(&key));
        assert_eq!(store.history(&key).unwrap(), vec![ChatMessage::user("hi")]);
    }

    #[test]
    fn older_stream_finishing_keeps_newer_handle() {
        let store = store();
        let key = ConversationKey::new("c1", None);
        let history = store.append_message(&key, ChatMessage::user("one"));
        let first = store.begin_stream(&key, history, false);
        let history = store.append_message(&key, ChatMessage::user("two"));
        let second = store.begin_stream(&key, history, false);

        assert!(!first.is_cancelled());
        drop(first);
        assert!(store.is_streaming(&key));

        assert!(store.cancel(&key));
        assert!(second.is_cancelled());
    }

    #[test]
    fn superseded_stream_is_cancelled_when_asked() {
        let store = store();
        let key = ConversationKey::new("c1", None);
        let history = store.append_message(&key, ChatMessage::user("one"));
        let first = store.begin_stream(&key, history.clone(), true);
        let _second = store.begin_stream(&key, history, true);
        assert!(first.is_cancelled());
    }

    #[test]
    fn sweep_evicts_only_idle_conversations_without_streams() {
        let store = store();
        let idle = ConversationKey::new("idle", None);
        let busy = ConversationKey::new("busy", None);
        store.append_message(&idle, ChatMessage::user("hi"));
        let history = store.append_message(&busy, ChatMessage::user("hi"));
        let _guard = store.begin_stream(&busy, history, false);

        assert_eq!(store.sweep(), 0);

        let later = Instant::now() + Duration::from_secs(301);
        assert_eq!(store.sweep_at(later), 1);
        assert!(store.history(&idle).is_none());
        assert!(store.history(&busy).is_some());
    }

    #[test]
    fn swept_conversation_starts_fresh() {
        let store = store();
        let key = ConversationKey::new("c1", None);
        store.append_message(&key, ChatMessage::user("old"));
        store.sweep_at(Instant::now() + Duration::from_secs(600));

        let history = store.append_message(&key, ChatMessage::user("new"));
        assert_eq!(history, vec![ChatMessage::user("new")]);
    }

    #[test]
    fn reply_lands_on_latest_history() {
        let store = store();
        let key = ConversationKey::new("c1", None);
        let history = store.append_message(&key, ChatMessage::user("one"));
        let mut guard = store.begin_stream(&key, history, false);
        store.append_message(&key, ChatMessage::user("two"));
        guard.push_reply("answer");
        drop(guard);

        assert_eq!(
            store.history(&key).unwrap(),
            vec![
                ChatMessage::user("one"),
                ChatMessage::user("two"),
                ChatMessage::assistant("answer")
            ]
        );
    }
}

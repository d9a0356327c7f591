//! Bounded per-conversation context
//!
//! Conversation state is threaded explicitly through the pipeline and held
//! in a bounded-lifetime store keyed by conversation id. Turns beyond the
//! per-conversation cap and conversations idle past the age bound are
//! evicted.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

/// One conversation turn
#[derive(Debug, Clone)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

struct Conversation {
    turns: VecDeque<Turn>,
    last_active: DateTime<Utc>,
}

/// Store configuration
#[derive(Debug, Clone)]
pub struct ConversationStoreConfig {
    /// Turns kept per conversation
    pub max_turns: usize,

    /// Conversations kept before the oldest is evicted
    pub max_conversations: usize,

    /// Idle lifetime before a conversation is dropped
    pub max_idle: Duration,
}

impl Default for ConversationStoreConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_conversations: 500,
            max_idle: Duration::minutes(60),
        }
    }
}

/// Bounded conversation store
pub struct ConversationStore {
    config: ConversationStoreConfig,
    inner: Mutex<HashMap<Uuid, Conversation>>,
}

impl ConversationStore {
    pub fn new(config: ConversationStoreConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Append a turn, evicting stale state as needed
    pub async fn record(&self, conversation_id: Uuid, speaker: Speaker, text: impl Into<String>) {
        let mut map = self.inner.lock().await;
        let now = Utc::now();

        // Age-based eviction first
        let max_idle = self.config.max_idle;
        map.retain(|_, conv| now - conv.last_active < max_idle);

        // Capacity eviction: drop the least recently active conversation
        if !map.contains_key(&conversation_id) && map.len() >= self.config.max_conversations {
            if let Some(oldest) = map
                .iter()
                .min_by_key(|(_, conv)| conv.last_active)
                .map(|(id, _)| *id)
            {
                map.remove(&oldest);
            }
        }

        let conv = map.entry(conversation_id).or_insert_with(|| Conversation {
            turns: VecDeque::new(),
            last_active: now,
        });
        conv.turns.push_back(Turn {
            speaker,
            text: text.into(),
            at: now,
        });
        while conv.turns.len() > self.config.max_turns {
            conv.turns.pop_front();
        }
        conv.last_active = now;

        rinkside_common::metrics::record_active_conversations(map.len());
    }

    /// The last `n` turns of a conversation, oldest first
    pub async fn window(&self, conversation_id: Uuid, n: usize) -> Vec<Turn> {
        let map = self.inner.lock().await;
        match map.get(&conversation_id) {
            Some(conv) => {
                let skip = conv.turns.len().saturating_sub(n);
                conv.turns.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_turns_are_bounded() {
        let store = ConversationStore::new(ConversationStoreConfig {
            max_turns: 3,
            ..Default::default()
        });
        let id = Uuid::new_v4();

        for i in 0..10 {
            store.record(id, Speaker::User, format!("turn {}", i)).await;
        }

        let window = store.window(id, 10).await;
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].text, "turn 7");
        assert_eq!(window[2].text, "turn 9");
    }

    #[tokio::test]
    async fn test_window_is_newest_suffix() {
        let store = ConversationStore::new(ConversationStoreConfig::default());
        let id = Uuid::new_v4();

        for i in 0..6 {
            store.record(id, Speaker::User, format!("turn {}", i)).await;
        }

        let window = store.window(id, 2).await;
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].text, "turn 4");
        assert_eq!(window[1].text, "turn 5");
    }

    #[tokio::test]
    async fn test_conversation_capacity_eviction() {
        let store = ConversationStore::new(ConversationStoreConfig {
            max_conversations: 2,
            ..Default::default()
        });

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        store.record(a, Speaker::User, "first").await;
        store.record(b, Speaker::User, "second").await;
        store.record(c, Speaker::User, "third").await;

        assert_eq!(store.len().await, 2);
        assert!(store.window(a, 5).await.is_empty());
        assert_eq!(store.window(c, 5).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_empty() {
        let store = ConversationStore::new(ConversationStoreConfig::default());
        assert!(store.window(Uuid::new_v4(), 5).await.is_empty());
    }
}

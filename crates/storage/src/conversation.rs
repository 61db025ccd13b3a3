use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;
use tidechat_protocol::{ChatAnswer, RequestMessage, TopicId};
use tokio::sync::Mutex;

use super::error::{DecodeHistorySnafu, EncodeHistorySnafu, StorageResult};
use super::kv::KeyValueStore;

pub const CONVERSATION_KEY_PREFIX: &str = "conversation:";

/// One completed turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub question: String,
    pub answer: ChatAnswer,
}

impl ConversationEntry {
    pub fn new(question: impl Into<String>, answer: ChatAnswer) -> Self {
        Self {
            question: question.into(),
            answer,
        }
    }
}

/// Ordered turns of one topic, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory(Vec<ConversationEntry>);

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationEntry> {
        self.0.last()
    }

    /// Flattens the history into alternating user and assistant messages.
    pub fn to_request_messages(&self) -> Vec<RequestMessage> {
        self.0
            .iter()
            .flat_map(|entry| {
                [
                    RequestMessage::user(entry.question.clone()),
                    RequestMessage::assistant(entry.answer.content()),
                ]
            })
            .collect()
    }

    /// Session token to echo on the next turn.
    pub fn last_session_state(&self) -> Option<Value> {
        self.0
            .last()
            .and_then(|entry| entry.answer.session_state.clone())
    }

    fn push(&mut self, entry: ConversationEntry) {
        self.0.push(entry);
    }
}

impl FromIterator<ConversationEntry> for ConversationHistory {
    fn from_iter<T: IntoIterator<Item = ConversationEntry>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Append-only history per topic, persisted whole under `conversation:<topic>`.
///
/// Writers for one topic are serialized so two appends can never lose each
/// other's entry. Different topics never share a key or a lock.
pub struct ConversationStore {
    backend: Arc<dyn KeyValueStore>,
    topic_locks: Mutex<HashMap<TopicId, Arc<Mutex<()>>>>,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            topic_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn key_for(topic: &TopicId) -> String {
        format!("{CONVERSATION_KEY_PREFIX}{topic}")
    }

    pub async fn load(&self, topic: &TopicId) -> StorageResult<ConversationHistory> {
        let key = Self::key_for(topic);
        self.read(&key).await
    }

    /// Appends one entry and re-persists the full history. Returns the history
    /// as written.
    pub async fn append(
        &self,
        topic: &TopicId,
        entry: ConversationEntry,
    ) -> StorageResult<ConversationHistory> {
        let lock = self.topic_lock(topic).await;
        let _guard = lock.lock().await;

        let key = Self::key_for(topic);
        let mut history = self.read(&key).await?;
        history.push(entry);

        let encoded = serde_json::to_string(&history).context(EncodeHistorySnafu {
            stage: "conversation-append-encode",
            key: key.clone(),
        })?;
        self.backend.put(&key, encoded).await?;

        tracing::debug!(topic = %topic, turns = history.len(), "appended conversation turn");
        Ok(history)
    }

    pub async fn reset(&self, topic: &TopicId) -> StorageResult<()> {
        let lock = self.topic_lock(topic).await;
        let _guard = lock.lock().await;

        self.backend.delete(&Self::key_for(topic)).await?;
        tracing::info!(topic = %topic, "cleared conversation history");
        Ok(())
    }

    async fn read(&self, key: &str) -> StorageResult<ConversationHistory> {
        let Some(raw) = self.backend.get(key).await? else {
            return Ok(ConversationHistory::new());
        };

        serde_json::from_str(&raw).context(DecodeHistorySnafu {
            stage: "conversation-load-decode",
            key: key.to_string(),
        })
    }

    async fn topic_lock(&self, topic: &TopicId) -> Arc<Mutex<()>> {
        let mut locks = self.topic_locks.lock().await;
        locks
            .entry(topic.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

pub mod conversation;
pub mod error;
pub mod kv;
pub mod sqlite;

pub use conversation::{
    CONVERSATION_KEY_PREFIX, ConversationEntry, ConversationHistory, ConversationStore,
};
pub use error::{StorageError, StorageResult};
pub use kv::{BoxFuture, KeyValueStore, MemoryKeyValueStore};
pub use sqlite::SqliteKeyValueStore;

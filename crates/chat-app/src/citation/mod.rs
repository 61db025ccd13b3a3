use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use snafu::{ResultExt, Snafu};
use tidechat_backend::{BackendError, ContentSource};
use tidechat_protocol::CitationKey;
use tokio::sync::{Mutex, OnceCell};
use uuid::Uuid;

pub const CITATION_URI_SCHEME: &str = "citation";

/// Locally held citation artifact, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationHandle {
    id: Uuid,
    key: CitationKey,
    content_type: Option<String>,
    bytes: Bytes,
}

impl CitationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &CitationKey {
        &self.key
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Local URI with the citation's fragment re-attached, e.g.
    /// `citation:0190…#page=4`.
    pub fn uri(&self) -> String {
        match self.key.fragment() {
            Some(fragment) => format!("{CITATION_URI_SCHEME}:{}#{fragment}", self.id),
            None => format!("{CITATION_URI_SCHEME}:{}", self.id),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CitationError {
    #[snafu(display("failed to fetch citation '{citation}' on `{stage}`: {source}"))]
    Fetch {
        stage: &'static str,
        citation: String,
        source: BackendError,
    },
}

pub type CitationResult<T> = Result<T, CitationError>;

type CitationSlot = Arc<OnceCell<Arc<CitationHandle>>>;

/// Resolves citations to local handles, fetching each key at most once.
///
/// Keys are the full citation text, fragment included. A key is marked
/// fetched only after a successful fetch; concurrent resolves of one key wait
/// on the same in-flight fetch. A failed fetch leaves the key unfetched and
/// touches nothing else.
pub struct CitationCache {
    source: Arc<dyn ContentSource>,
    slots: Mutex<HashMap<String, CitationSlot>>,
}

impl CitationCache {
    pub fn new(source: Arc<dyn ContentSource>) -> Self {
        Self {
            source,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, key: &CitationKey) -> CitationResult<Arc<CitationHandle>> {
        let slot = self.slot(key.as_str()).await;
        let handle = slot
            .get_or_try_init(|| self.fetch(key))
            .await?;
        Ok(handle.clone())
    }

    pub async fn is_fetched(&self, key: &CitationKey) -> bool {
        self.slots
            .lock()
            .await
            .get(key.as_str())
            .is_some_and(|slot| slot.initialized())
    }

    pub async fn invalidate(&self, key: &CitationKey) {
        self.slots.lock().await.remove(key.as_str());
    }

    pub async fn clear(&self) {
        let mut slots = self.slots.lock().await;
        let dropped = slots.len();
        slots.clear();
        tracing::debug!(dropped, "cleared citation cache");
    }

    async fn slot(&self, key: &str) -> CitationSlot {
        let mut slots = self.slots.lock().await;
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    async fn fetch(&self, key: &CitationKey) -> CitationResult<Arc<CitationHandle>> {
        tracing::debug!(citation = %key, path = key.path(), "fetching citation content");
        let artifact = self
            .source
            .fetch_content(key.path())
            .await
            .inspect_err(|error| {
                tracing::warn!(citation = %key, error = %error, "citation fetch failed");
            })
            .context(FetchSnafu {
                stage: "citation-fetch-content",
                citation: key.as_str(),
            })?;

        Ok(Arc::new(CitationHandle {
            id: Uuid::now_v7(),
            key: key.clone(),
            content_type: artifact.content_type,
            bytes: artifact.bytes,
        }))
    }
}

use std::sync::Arc;

use snafu::{ResultExt, Snafu};
use tidechat_backend::{Anonymous, BackendError, CredentialProvider, HttpBackend, StaticToken};
use tidechat_protocol::TopicId;
use tidechat_storage::{ConversationStore, KeyValueStore, StorageError};

use crate::chat::{ChatController, TurnError, TurnSession};
use crate::citation::CitationCache;
use crate::settings::AppSettings;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AppError {
    #[snafu(display("failed to build backend client on `{stage}`: {source}"))]
    Backend {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("failed to open conversation storage on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("{source}"))]
    Turn {
        stage: &'static str,
        source: TurnError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;

/// Wires settings, storage and the HTTP backend into a controller opened on
/// `topic`, or the configured default topic.
///
/// Feature discovery is best effort: when `/config` is unreachable the turn
/// settings are used as configured.
pub async fn build_controller(
    settings: &AppSettings,
    kv: Arc<dyn KeyValueStore>,
    topic: Option<&TopicId>,
) -> AppResult<ChatController> {
    let credentials: Arc<dyn CredentialProvider> = match settings.bearer_token() {
        Some(token) => Arc::new(StaticToken::new(token)),
        None => Arc::new(Anonymous),
    };
    let backend = Arc::new(
        HttpBackend::with_connect_timeout(
            settings.base_url.as_str(),
            credentials,
            settings.connect_timeout(),
        )
        .context(BackendSnafu {
            stage: "app-build-http-backend",
        })?,
    );

    let mut turn_settings = settings.turn.clone();
    match backend.fetch_features().await {
        Ok(features) => {
            tracing::debug!(?features, "applying backend features");
            turn_settings.apply_features(&features);
        }
        Err(error) => {
            tracing::warn!(
                error = %error,
                "backend features unavailable, keeping configured settings"
            );
        }
    }

    let topic = topic.unwrap_or(&settings.default_topic);
    ChatController::open(
        settings.topics.clone(),
        turn_settings,
        TurnSession::new(backend.clone()),
        Arc::new(ConversationStore::new(kv)),
        CitationCache::new(backend),
        topic,
    )
    .await
    .context(TurnSnafu {
        stage: "app-open-controller",
    })
}

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use snafu::{OptionExt, ResultExt};
use tidechat_backend::{ByteStream, ChatBackend};
use tidechat_protocol::{ChatAnswer, ChatAppResponse, ChatTurnRequest, TopicRoute, TurnSettings};
use tidechat_storage::ConversationHistory;
use tidechat_stream::{PartialAnswer, ReconcileUpdate, reconcile_body};

use super::error::{
    BackendSnafu, EmptyBodySnafu, HttpStatusSnafu, IncompleteResponseSnafu, ResponseBodySnafu,
    StreamSnafu, TurnResult,
};

/// Live progress of a streamed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnUpdate {
    /// The opening record arrived; the loading indicator can go.
    ContextReady,
    /// First text snapshot; sent once, right before its `Partial`.
    ContentStarted,
    Partial(PartialAnswer),
}

/// Runs one request/response turn against a backend route.
///
/// Persists nothing: the caller decides whether the returned answer is still
/// wanted and commits it.
#[derive(Clone)]
pub struct TurnSession {
    backend: Arc<dyn ChatBackend>,
}

impl TurnSession {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    pub async fn submit<F>(
        &self,
        route: &TopicRoute,
        question: &str,
        history: &ConversationHistory,
        settings: &TurnSettings,
        mut observer: F,
    ) -> TurnResult<ChatAnswer>
    where
        F: FnMut(TurnUpdate),
    {
        let request = ChatTurnRequest::new(
            history.to_request_messages(),
            question,
            settings,
            history.last_session_state(),
        );
        tracing::debug!(
            topic = %route.topic,
            stream = request.is_streaming(),
            prior_turns = history.len(),
            "submitting turn"
        );

        let response = self
            .backend
            .send_turn(route, &request)
            .await
            .context(BackendSnafu {
                stage: "turn-send-request",
            })?;
        let status = response.status;
        if !response.is_success() {
            let message = match response.body {
                Some(body) => error_message(&read_body(body).await?),
                None => String::new(),
            };
            return HttpStatusSnafu {
                stage: "turn-response-status",
                status,
                message,
            }
            .fail();
        }

        let body = response.body.context(EmptyBodySnafu {
            stage: "turn-response-body",
        })?;

        if request.is_streaming() {
            stream_answer(body, &mut observer).await
        } else {
            let payload = read_body(body).await?;
            parse_answer_body(status, &payload)
        }
    }
}

async fn stream_answer<F>(body: ByteStream, observer: &mut F) -> TurnResult<ChatAnswer>
where
    F: FnMut(TurnUpdate),
{
    let mut updates = Box::pin(reconcile_body(body));
    let mut content_started = false;

    while let Some(update) = updates.next().await {
        match update.context(StreamSnafu {
            stage: "turn-reconcile-stream",
        })? {
            ReconcileUpdate::Loaded => observer(TurnUpdate::ContextReady),
            ReconcileUpdate::Partial(partial) => {
                if !content_started {
                    content_started = true;
                    observer(TurnUpdate::ContentStarted);
                }
                observer(TurnUpdate::Partial(partial));
            }
            ReconcileUpdate::Complete(answer) => {
                tracing::debug!(chars = answer.content().len(), "turn stream complete");
                return Ok(answer);
            }
        }
    }

    EmptyBodySnafu {
        stage: "turn-stream-ended-early",
    }
    .fail()
}

fn parse_answer_body(status: u16, payload: &[u8]) -> TurnResult<ChatAnswer> {
    let response: ChatAppResponse = serde_json::from_slice(payload).context(ResponseBodySnafu {
        stage: "turn-parse-json-body",
    })?;
    if let Some(message) = response.error.as_deref()
        && !message.trim().is_empty()
    {
        return HttpStatusSnafu {
            stage: "turn-response-error-field",
            status,
            message,
        }
        .fail();
    }

    ChatAnswer::from_response(response).context(IncompleteResponseSnafu {
        stage: "turn-response-answer",
    })
}

async fn read_body(body: ByteStream) -> TurnResult<Vec<u8>> {
    body.try_fold(Vec::new(), |mut payload, chunk| async move {
        payload.extend_from_slice(&chunk);
        Ok(payload)
    })
    .await
    .context(BackendSnafu {
        stage: "turn-read-body",
    })
}

/// Prefers the backend's `error` field; falls back to the raw text.
fn error_message(payload: &[u8]) -> String {
    serde_json::from_slice::<ChatAppResponse>(payload)
        .ok()
        .and_then(|response| response.error)
        .unwrap_or_else(|| String::from_utf8_lossy(payload).trim().to_string())
}

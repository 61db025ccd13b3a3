use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use serde_json::Value;
use snafu::ResultExt;
use tidechat_protocol::{AnswerContext, ChatAnswer, ParsedAnswer, Role, parse_answer};

use super::decoder::decode_records;
use super::error::{DecodeSnafu, ReconcileResult, StreamErrorEventSnafu};
use super::event::{StreamEvent, stream_events};

/// Snapshot of an in-progress answer, emitted once per text delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialAnswer {
    pub role: Role,
    pub content: String,
    pub context: AnswerContext,
    pub session_state: Option<Value>,
}

impl PartialAnswer {
    /// Citations and follow-ups as they can be shown mid-stream.
    pub fn parsed(&self) -> ParsedAnswer {
        parse_answer(&self.content, true)
    }
}

#[derive(Debug, Default)]
struct AnswerAccumulator {
    role: Option<Role>,
    content: String,
    context: AnswerContext,
    session_state: Option<Value>,
}

impl AnswerAccumulator {
    fn capture(&mut self, role: Option<Role>, session_state: Option<Value>) {
        if let Some(role) = role {
            self.role = Some(role);
        }
        if session_state.is_some() {
            self.session_state = session_state;
        }
    }

    fn role(&self) -> Role {
        self.role.unwrap_or_default()
    }
}

/// What applying one event did to the accumulated answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileStep {
    /// The opening record arrived; first visible content is ready.
    Seeded,
    Partial(PartialAnswer),
    ContextMerged,
}

/// Folds the events of exactly one turn into a single answer.
///
/// Text deltas are appended strictly in arrival order. Context fragments are
/// merged by shallow key overwrite whenever they arrive, so a later fragment
/// replaces an earlier value for the same key, nested objects included.
#[derive(Debug, Default)]
pub struct ResponseReconciler {
    accumulator: AnswerAccumulator,
    seeded: bool,
    events_applied: usize,
}

impl ResponseReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: StreamEvent) -> ReconcileResult<ReconcileStep> {
        self.events_applied += 1;
        match event {
            StreamEvent::ContextAndDelta {
                role,
                context,
                session_state,
            } => {
                self.accumulator.capture(role, session_state);
                self.accumulator.context.merge(context);
                if self.seeded {
                    return Ok(ReconcileStep::ContextMerged);
                }
                self.seeded = true;
                Ok(ReconcileStep::Seeded)
            }
            StreamEvent::Delta {
                role,
                content,
                context,
                session_state,
            } => {
                self.accumulator.capture(role, session_state);
                if let Some(context) = context {
                    self.accumulator.context.merge(context);
                }
                self.accumulator.content.push_str(&content);
                Ok(ReconcileStep::Partial(self.snapshot()))
            }
            StreamEvent::Context {
                context,
                session_state,
            } => {
                self.accumulator.capture(None, session_state);
                self.accumulator.context.merge(context);
                Ok(ReconcileStep::ContextMerged)
            }
            StreamEvent::Error { message } => StreamErrorEventSnafu {
                stage: "reconcile-error-event",
                message,
            }
            .fail(),
        }
    }

    pub fn snapshot(&self) -> PartialAnswer {
        PartialAnswer {
            role: self.accumulator.role(),
            content: self.accumulator.content.clone(),
            context: self.accumulator.context.clone(),
            session_state: self.accumulator.session_state.clone(),
        }
    }

    pub fn finish(self) -> ChatAnswer {
        if self.events_applied == 0 {
            tracing::warn!("turn stream ended without any events");
        }

        let AnswerAccumulator {
            role,
            content,
            context,
            session_state,
        } = self.accumulator;
        ChatAnswer::new(role.unwrap_or_default(), content, context).with_session_state(session_state)
    }
}

/// Progress of a streamed turn as seen by an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileUpdate {
    Loaded,
    Partial(PartialAnswer),
    Complete(ChatAnswer),
}

struct ReconcileState<S> {
    events: Pin<Box<S>>,
    reconciler: Option<ResponseReconciler>,
}

/// Drives a fresh [`ResponseReconciler`] over `events`.
///
/// The stream ends with exactly one `Complete` item on success. Any decode
/// failure or backend error event yields a single error item instead, after
/// which nothing more is produced.
pub fn reconcile<S>(events: S) -> impl Stream<Item = ReconcileResult<ReconcileUpdate>>
where
    S: Stream<Item = super::error::DecodeResult<StreamEvent>>,
{
    let state = ReconcileState {
        events: Box::pin(events),
        reconciler: Some(ResponseReconciler::new()),
    };

    stream::unfold(state, |mut state| async move {
        let mut reconciler = state.reconciler.take()?;
        loop {
            let Some(event) = state.events.next().await else {
                return Some((Ok(ReconcileUpdate::Complete(reconciler.finish())), state));
            };

            let step = event
                .context(DecodeSnafu {
                    stage: "reconcile-decode-event",
                })
                .and_then(|event| reconciler.apply(event));
            let update = match step {
                Ok(ReconcileStep::Seeded) => ReconcileUpdate::Loaded,
                Ok(ReconcileStep::Partial(partial)) => ReconcileUpdate::Partial(partial),
                Ok(ReconcileStep::ContextMerged) => continue,
                Err(error) => {
                    tracing::warn!(error = %error, "aborting turn reconciliation");
                    return Some((Err(error), state));
                }
            };

            state.reconciler = Some(reconciler);
            return Some((Ok(update), state));
        }
    })
}

/// Decodes, classifies and reconciles a raw JSON-lines response body.
pub fn reconcile_body<S, E>(body: S) -> impl Stream<Item = ReconcileResult<ReconcileUpdate>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    reconcile(stream_events(decode_records(body)))
}

#[cfg(test)]
mod tests {
    use std::io;

    use pretty_assertions::assert_eq;
    use serde_json::{Map, json};

    use super::*;
    use crate::error::{DecodeError, ReconcileError};

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(fields) => fields,
            other => panic!("expected object, got {other}"),
        }
    }

    fn seed(data_points: Value) -> StreamEvent {
        StreamEvent::ContextAndDelta {
            role: Some(Role::Assistant),
            context: object(json!({ "data_points": data_points })),
            session_state: None,
        }
    }

    fn delta(content: &str) -> StreamEvent {
        StreamEvent::Delta {
            role: None,
            content: content.to_string(),
            context: None,
            session_state: None,
        }
    }

    fn context(value: Value) -> StreamEvent {
        StreamEvent::Context {
            context: object(value),
            session_state: None,
        }
    }

    async fn run(events: Vec<StreamEvent>) -> Vec<ReconcileResult<ReconcileUpdate>> {
        reconcile(stream::iter(events.into_iter().map(Ok)))
            .collect()
            .await
    }

    #[tokio::test]
    async fn snapshots_are_successive_prefixes() {
        let updates = run(vec![
            seed(json!(["d1"])),
            delta("Hel"),
            delta("lo, "),
            delta("world"),
        ])
        .await;

        let mut snapshots = Vec::new();
        let mut complete = None;
        for update in updates {
            match update.unwrap() {
                ReconcileUpdate::Loaded => assert!(snapshots.is_empty()),
                ReconcileUpdate::Partial(partial) => snapshots.push(partial.content),
                ReconcileUpdate::Complete(answer) => complete = Some(answer),
            }
        }

        assert_eq!(snapshots, vec!["Hel", "Hello, ", "Hello, world"]);
        let answer = complete.unwrap();
        assert_eq!(answer.content(), "Hello, world");
        assert_eq!(answer.message.role, Role::Assistant);
        assert_eq!(answer.context.data_points(), Some(&json!(["d1"])));
    }

    #[tokio::test]
    async fn context_merge_is_last_write_wins() {
        let updates = run(vec![context(json!({ "a": 1 })), context(json!({ "a": 2, "b": 3 }))]).await;

        assert_eq!(updates.len(), 1);
        let Ok(ReconcileUpdate::Complete(answer)) = &updates[0] else {
            panic!("expected completion, got {:?}", updates[0]);
        };
        assert_eq!(
            serde_json::to_value(&answer.context).unwrap(),
            json!({ "a": 2, "b": 3 })
        );
    }

    #[tokio::test]
    async fn interleaved_context_is_visible_in_later_snapshots() {
        let updates = run(vec![
            seed(json!(["d1"])),
            delta("A"),
            context(json!({ "thoughts": "ranked" })),
            delta("B"),
        ])
        .await;

        let Ok(ReconcileUpdate::Partial(last)) = &updates[2] else {
            panic!("expected partial, got {:?}", updates[2]);
        };
        assert_eq!(last.content, "AB");
        assert_eq!(last.context.thoughts(), Some(&json!("ranked")));
    }

    #[tokio::test]
    async fn error_event_aborts_without_final_answer() {
        let updates = run(vec![
            seed(json!(["d1"])),
            delta("partial"),
            StreamEvent::Error {
                message: "boom".to_string(),
            },
            delta("ignored"),
        ])
        .await;

        assert_eq!(updates.len(), 3);
        match &updates[2] {
            Err(ReconcileError::StreamErrorEvent { message, .. }) => assert_eq!(message, "boom"),
            other => panic!("expected stream error, got {other:?}"),
        }
        assert!(
            !updates
                .iter()
                .any(|update| matches!(update, Ok(ReconcileUpdate::Complete(_))))
        );
    }

    #[tokio::test]
    async fn malformed_line_aborts_the_turn() {
        let body = stream::iter(vec![
            Ok::<_, io::Error>(Bytes::from_static(
                b"{\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
            )),
            Ok(Bytes::from_static(b"{oops\n")),
            Ok(Bytes::from_static(
                b"{\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
            )),
        ]);

        let updates = reconcile_body(body).collect::<Vec<_>>().await;

        assert_eq!(updates.len(), 2);
        assert!(matches!(
            updates[1],
            Err(ReconcileError::Decode {
                source: DecodeError::MalformedEvent { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn empty_stream_completes_with_empty_answer() {
        let updates = run(Vec::new()).await;

        let Ok(ReconcileUpdate::Complete(answer)) = &updates[0] else {
            panic!("expected completion, got {:?}", updates[0]);
        };
        assert_eq!(answer.content(), "");
        assert_eq!(answer.message.role, Role::Assistant);
        assert!(answer.context.is_empty());
    }

    #[test]
    fn session_state_keeps_latest_value() {
        let mut reconciler = ResponseReconciler::new();
        reconciler
            .apply(StreamEvent::ContextAndDelta {
                role: Some(Role::Assistant),
                context: object(json!({ "data_points": ["d1"] })),
                session_state: Some(json!("first")),
            })
            .unwrap();
        reconciler
            .apply(StreamEvent::Context {
                context: object(json!({ "followup_questions": ["Next?"] })),
                session_state: Some(json!("second")),
            })
            .unwrap();

        let answer = reconciler.finish();
        assert_eq!(answer.session_state, Some(json!("second")));
        assert_eq!(answer.context.followup_questions(), vec!["Next?".to_string()]);
    }

    #[test]
    fn delta_context_is_merged_not_dropped() {
        let mut reconciler = ResponseReconciler::new();
        let step = reconciler
            .apply(StreamEvent::Delta {
                role: Some(Role::Assistant),
                content: "Hi".to_string(),
                context: Some(object(json!({ "thoughts": "t" }))),
                session_state: None,
            })
            .unwrap();

        let ReconcileStep::Partial(partial) = step else {
            panic!("expected partial snapshot");
        };
        assert_eq!(partial.context.thoughts(), Some(&json!("t")));
    }
}

use futures::{Stream, StreamExt, future};
use serde_json::{Map, Value};
use tidechat_protocol::Role;
use tidechat_protocol::answer::CONTEXT_DATA_POINTS;

use super::error::DecodeResult;

/// One record of the turn stream, classified by payload shape.
///
/// The backend sends no explicit type tag. Records are told apart by which
/// fields are present under `choices[0]`, checked in this order:
///
/// 1. `context.data_points` is truthy: [`StreamEvent::ContextAndDelta`], the
///    record that opens a turn and carries the role in `delta`.
/// 2. `delta.content` is a non-empty string: [`StreamEvent::Delta`].
/// 3. `context` is an object: [`StreamEvent::Context`].
/// 4. A truthy top-level `error`: [`StreamEvent::Error`].
///
/// Anything else is not an event and is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    ContextAndDelta {
        role: Option<Role>,
        context: Map<String, Value>,
        session_state: Option<Value>,
    },
    Delta {
        role: Option<Role>,
        content: String,
        // Context that rode along with a text delta; merged, never dropped.
        context: Option<Map<String, Value>>,
        session_state: Option<Value>,
    },
    Context {
        context: Map<String, Value>,
        session_state: Option<Value>,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    pub fn classify(mut record: Value) -> Option<Self> {
        let error = record
            .get("error")
            .filter(|value| is_truthy(value))
            .map(error_message);
        let choice = record
            .get_mut("choices")
            .and_then(Value::as_array_mut)
            .and_then(|choices| choices.first_mut())
            .map(Value::take);

        if let Some(choice) = choice
            && let Some(event) = classify_choice(choice)
        {
            return Some(event);
        }

        error.map(|message| Self::Error { message })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContextAndDelta { .. } => "context-and-delta",
            Self::Delta { .. } => "delta",
            Self::Context { .. } => "context",
            Self::Error { .. } => "error",
        }
    }
}

fn classify_choice(mut choice: Value) -> Option<StreamEvent> {
    let session_state = choice
        .get_mut("session_state")
        .map(Value::take)
        .filter(|value| !value.is_null());
    let delta = choice.get("delta");
    let role = delta
        .and_then(|delta| delta.get("role"))
        .and_then(Value::as_str)
        .and_then(Role::parse);
    let content = delta
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
        .map(str::to_string);
    let context = match choice.get_mut("context").map(Value::take) {
        Some(Value::Object(fields)) => Some(fields),
        _ => None,
    };
    let opens_turn = context
        .as_ref()
        .and_then(|fields| fields.get(CONTEXT_DATA_POINTS))
        .is_some_and(is_truthy);

    match (context, content) {
        (Some(context), _) if opens_turn => Some(StreamEvent::ContextAndDelta {
            role,
            context,
            session_state,
        }),
        (context, Some(content)) => Some(StreamEvent::Delta {
            role,
            content,
            context,
            session_state,
        }),
        (Some(context), None) => Some(StreamEvent::Context {
            context,
            session_state,
        }),
        (None, None) => None,
    }
}

/// Classifies decoded records, dropping records with no recognizable shape.
pub fn stream_events<S>(records: S) -> impl Stream<Item = DecodeResult<StreamEvent>>
where
    S: Stream<Item = DecodeResult<Value>>,
{
    records.filter_map(|record| {
        let event = match record {
            Ok(value) => match StreamEvent::classify(value) {
                Some(event) => Some(Ok(event)),
                None => {
                    tracing::debug!("skipping stream record with no recognizable shape");
                    None
                }
            },
            Err(error) => Some(Err(error)),
        };
        future::ready(event)
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|raw| raw != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn error_message(value: &Value) -> String {
    match value {
        Value::String(message) => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(fields) => fields,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn data_points_mark_the_opening_record() {
        let event = StreamEvent::classify(json!({
            "choices": [{
                "delta": { "role": "assistant" },
                "context": { "data_points": ["d1"], "thoughts": "searched" },
                "session_state": "s-1"
            }]
        }));

        assert_eq!(
            event,
            Some(StreamEvent::ContextAndDelta {
                role: Some(Role::Assistant),
                context: object(json!({ "data_points": ["d1"], "thoughts": "searched" })),
                session_state: Some(json!("s-1")),
            })
        );
    }

    #[test]
    fn empty_data_points_array_still_opens_turn() {
        let event = StreamEvent::classify(json!({
            "choices": [{ "delta": { "role": "assistant" }, "context": { "data_points": [] } }]
        }));

        assert_eq!(event.map(|event| event.kind()), Some("context-and-delta"));
    }

    #[test]
    fn text_delta_is_classified() {
        let event = StreamEvent::classify(json!({
            "choices": [{ "delta": { "content": "Hel", "role": "assistant" } }]
        }));

        assert_eq!(
            event,
            Some(StreamEvent::Delta {
                role: Some(Role::Assistant),
                content: "Hel".to_string(),
                context: None,
                session_state: None,
            })
        );
    }

    #[test]
    fn context_without_data_points_is_a_context_event() {
        let event = StreamEvent::classify(json!({
            "choices": [{ "delta": {}, "context": { "followup_questions": ["Next?"] } }]
        }));

        assert_eq!(
            event,
            Some(StreamEvent::Context {
                context: object(json!({ "followup_questions": ["Next?"] })),
                session_state: None,
            })
        );
    }

    #[test]
    fn top_level_error_is_classified() {
        let event = StreamEvent::classify(json!({ "error": "The app encountered an error" }));

        assert_eq!(
            event,
            Some(StreamEvent::Error {
                message: "The app encountered an error".to_string()
            })
        );
    }

    #[test]
    fn empty_content_and_role_only_records_are_skipped() {
        assert_eq!(
            StreamEvent::classify(json!({ "choices": [{ "delta": { "content": "" } }] })),
            None
        );
        assert_eq!(
            StreamEvent::classify(json!({ "choices": [{ "delta": { "role": "assistant" } }] })),
            None
        );
        assert_eq!(StreamEvent::classify(json!({ "error": null })), None);
    }
}

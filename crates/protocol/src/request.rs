use serde::Serialize;
use serde_json::Value;

use super::message::RequestMessage;
use super::settings::{Overrides, TurnSettings};

/// Request-scoped context wrapper expected by the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestContext {
    pub overrides: Overrides,
}

/// Body of one turn request.
///
/// Built once per turn and never mutated afterwards, so fields are only
/// readable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurnRequest {
    messages: Vec<RequestMessage>,
    stream: bool,
    context: RequestContext,
    // Serialized as an explicit null on the first turn of a conversation.
    session_state: Option<Value>,
}

impl ChatTurnRequest {
    /// Appends `question` as the final user message after the replayed history.
    pub fn new(
        history: Vec<RequestMessage>,
        question: impl Into<String>,
        settings: &TurnSettings,
        session_state: Option<Value>,
    ) -> Self {
        let mut messages = history;
        messages.push(RequestMessage::user(question));

        Self {
            messages,
            stream: settings.stream,
            context: RequestContext {
                overrides: settings.overrides.clone().normalized(),
            },
            session_state,
        }
    }

    pub fn messages(&self) -> &[RequestMessage] {
        &self.messages
    }

    pub fn question(&self) -> &str {
        self.messages
            .last()
            .map(|message| message.content.as_str())
            .unwrap_or_default()
    }

    pub fn is_streaming(&self) -> bool {
        self.stream
    }

    pub fn overrides(&self) -> &Overrides {
        &self.context.overrides
    }

    pub fn session_state(&self) -> Option<&Value> {
        self.session_state.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::message::Role;

    #[test]
    fn question_is_appended_after_history() {
        let history = vec![
            RequestMessage::user("first?"),
            RequestMessage::assistant("first answer"),
        ];

        let request = ChatTurnRequest::new(history, "second?", &TurnSettings::default(), None);

        let roles = request
            .messages()
            .iter()
            .map(|message| message.role)
            .collect::<Vec<_>>();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(request.question(), "second?");
        assert!(request.is_streaming());
    }

    #[test]
    fn first_turn_sends_null_session_state() {
        let settings = TurnSettings {
            stream: false,
            ..TurnSettings::default()
        };
        let request = ChatTurnRequest::new(Vec::new(), "hi", &settings, None);

        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["session_state"], Value::Null);
        assert_eq!(value["stream"], json!(false));
        assert_eq!(
            value["messages"],
            json!([{ "content": "hi", "role": "user" }])
        );
        assert_eq!(value["context"]["overrides"]["top"], json!(3));
    }

    #[test]
    fn session_state_is_echoed() {
        let request = ChatTurnRequest::new(
            Vec::new(),
            "hi",
            &TurnSettings::default(),
            Some(json!({ "thread": "abc" })),
        );

        assert_eq!(request.session_state(), Some(&json!({ "thread": "abc" })));
    }
}

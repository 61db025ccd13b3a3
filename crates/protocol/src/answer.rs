use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::OptionExt;

use super::error::{MissingChoiceSnafu, MissingMessageSnafu, ProtocolResult};
use super::message::Role;

pub const CONTEXT_DATA_POINTS: &str = "data_points";
pub const CONTEXT_THOUGHTS: &str = "thoughts";
pub const CONTEXT_FOLLOWUP_QUESTIONS: &str = "followup_questions";

/// Final assistant message of one turn.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnswerMessage {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

/// Out-of-band metadata delivered with an answer.
///
/// Keys are open-ended; the well-known ones have typed accessors. Merging is a
/// shallow overwrite: a later fragment replaces whole values, nested objects
/// included.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerContext(Map<String, Value>);

impl AnswerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn merge(&mut self, fragment: Map<String, Value>) {
        for (key, value) in fragment {
            self.0.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn data_points(&self) -> Option<&Value> {
        self.present(CONTEXT_DATA_POINTS)
    }

    pub fn thoughts(&self) -> Option<&Value> {
        self.present(CONTEXT_THOUGHTS)
    }

    pub fn followup_questions(&self) -> Vec<String> {
        self.0
            .get(CONTEXT_FOLLOWUP_QUESTIONS)
            .and_then(Value::as_array)
            .map(|questions| {
                questions
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    // `null` counts as absent, matching how the panels decide what to show.
    fn present(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|value| !value.is_null())
    }
}

/// One fully reconciled answer. Stored as-is in conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub message: AnswerMessage,
    #[serde(default)]
    pub context: AnswerContext,
    #[serde(default)]
    pub session_state: Option<Value>,
}

impl ChatAnswer {
    pub fn new(role: Role, content: impl Into<String>, context: AnswerContext) -> Self {
        Self {
            message: AnswerMessage {
                role,
                content: content.into(),
            },
            context,
            session_state: None,
        }
    }

    pub fn with_session_state(mut self, session_state: Option<Value>) -> Self {
        self.session_state = session_state;
        self
    }

    pub fn content(&self) -> &str {
        &self.message.content
    }

    /// Converts a non-streaming backend body into an answer.
    pub fn from_response(response: ChatAppResponse) -> ProtocolResult<Self> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .context(MissingChoiceSnafu {
                stage: "answer-from-response-choice",
            })?;
        let message = choice.message.context(MissingMessageSnafu {
            stage: "answer-from-response-message",
        })?;

        Ok(Self {
            message,
            context: AnswerContext::from_map(choice.context.unwrap_or_default()),
            session_state: choice.session_state,
        })
    }
}

/// Non-streaming response body: `{ choices: [...], error? }`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ChatAppResponse {
    #[serde(default)]
    pub choices: Vec<ResponseChoice>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ResponseChoice {
    #[serde(default)]
    pub message: Option<AnswerMessage>,
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
    #[serde(default)]
    pub session_state: Option<Value>,
}

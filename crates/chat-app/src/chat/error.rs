use snafu::Snafu;
use tidechat_backend::BackendError;
use tidechat_protocol::ProtocolError;
use tidechat_storage::StorageError;
use tidechat_stream::ReconcileError;

use super::state::TurnTransitionRejection;

pub const GENERIC_TURN_FAILURE: &str = "An error happened while answering. Please try again.";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TurnError {
    #[snafu(display("topic '{topic}' has no configured route"))]
    UnknownTopic { stage: &'static str, topic: String },
    #[snafu(display("question is empty"))]
    EmptyQuestion { stage: &'static str },
    #[snafu(display("backend call failed on `{stage}`: {source}"))]
    Backend {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("backend answered with status {status}: {message}"))]
    HttpStatus {
        stage: &'static str,
        status: u16,
        message: String,
    },
    #[snafu(display("backend response had no body"))]
    EmptyBody { stage: &'static str },
    #[snafu(display("turn stream aborted on `{stage}`: {source}"))]
    Stream {
        stage: &'static str,
        source: ReconcileError,
    },
    #[snafu(display("backend response is not valid JSON: {source}"))]
    ResponseBody {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("backend response has no answer: {source}"))]
    IncompleteResponse {
        stage: &'static str,
        source: ProtocolError,
    },
    #[snafu(display("turn rejected: {rejection}"))]
    Rejected {
        stage: &'static str,
        rejection: TurnTransitionRejection,
    },
    #[snafu(display("there is no failed question to retry"))]
    NothingToRetry { stage: &'static str },
    #[snafu(display("conversation storage failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
}

impl TurnError {
    /// Text shown next to the failed question.
    ///
    /// Status failures carry the backend's own message when it sent one;
    /// everything else collapses to one generic failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::HttpStatus { message, .. } if !message.trim().is_empty() => message.clone(),
            Self::Rejected { rejection, .. } => rejection.to_string(),
            Self::UnknownTopic { .. } | Self::NothingToRetry { .. } | Self::EmptyQuestion { .. } => {
                self.to_string()
            }
            _ => GENERIC_TURN_FAILURE.to_string(),
        }
    }
}

pub type TurnResult<T> = Result<T, TurnError>;

#![deny(unsafe_code)]

//! Wire and domain types shared by every tidechat crate.
//!
//! Field names follow the backend's JSON contract, so these types serialize
//! straight onto the turn endpoint and into persisted conversation history.

pub mod answer;
pub mod citation;
pub mod error;
pub mod message;
pub mod request;
pub mod settings;
pub mod topic;

pub use answer::{AnswerContext, AnswerMessage, ChatAnswer, ChatAppResponse, ResponseChoice};
pub use citation::{AnswerFragment, CitationKey, ParsedAnswer, parse_answer};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{RequestMessage, Role};
pub use request::{ChatTurnRequest, RequestContext};
pub use settings::{
    BackendFeatures, MultimodalInput, Overrides, RetrievalMode, TurnSettings, VectorField,
};
pub use topic::{TopicId, TopicRoute, default_topic_routes};

#![deny(unsafe_code)]

//! Turn orchestration for the tidechat client: one submitted question becomes
//! one streamed, reconciled and persisted answer per topic.

/// Controller wiring shared by the binary and integration tests.
pub mod app;
/// Turn session, lifecycle state and the controller that drives them.
pub mod chat;
pub mod citation;
/// Layered settings persistence.
pub mod settings;

pub use app::{AppError, AppResult, build_controller};
pub use chat::{ChatController, TurnError, TurnOutcome, TurnSession, TurnUpdate};
pub use citation::{CitationCache, CitationError, CitationHandle};
pub use settings::{AppSettings, SettingsStore};

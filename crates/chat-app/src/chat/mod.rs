pub mod controller;
pub mod error;
pub mod selection;
pub mod state;
pub mod turn;

pub use controller::{ChatController, TurnOutcome};
pub use error::{GENERIC_TURN_FAILURE, TurnError, TurnResult};
pub use selection::{AnalysisTab, SelectionState};
pub use state::{
    TurnGeneration, TurnState, TurnTarget, TurnTransition, TurnTransitionRejection,
    TurnTransitionResult,
};
pub use turn::{TurnSession, TurnUpdate};

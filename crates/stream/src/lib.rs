#![deny(unsafe_code)]

//! Turns a JSON-lines turn response into incremental and final answers.

pub mod decoder;
pub mod error;
pub mod event;
pub mod reconciler;

pub use decoder::{LineDecoder, decode_records};
pub use error::{DecodeError, DecodeResult, ReconcileError, ReconcileResult};
pub use event::{StreamEvent, stream_events};
pub use reconciler::{
    PartialAnswer, ReconcileStep, ReconcileUpdate, ResponseReconciler, reconcile, reconcile_body,
};

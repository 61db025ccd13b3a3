#![deny(unsafe_code)]

//! Network collaborators of a chat turn: the per-topic turn endpoint, the
//! content endpoint behind citations, and the bearer credential for both.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tidechat_protocol::{ChatTurnRequest, TopicRoute};

pub mod credential;
pub mod error;
pub mod http;

pub use credential::{Anonymous, CredentialProvider, StaticToken};
pub use error::{BackendError, BackendResult};
pub use http::HttpBackend;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ByteStream = Pin<Box<dyn Stream<Item = BackendResult<Bytes>> + Send>>;

/// Raw outcome of a turn request. Status is reported, not judged; the caller
/// decides what a non-2xx response means.
pub struct TurnResponse {
    pub status: u16,
    /// `None` when the backend sent no body at all.
    pub body: Option<ByteStream>,
}

impl TurnResponse {
    pub fn new(status: u16, body: Option<ByteStream>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for TurnResponse {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TurnResponse")
            .field("status", &self.status)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Citation artifact as served by the content endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentArtifact {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

pub trait ChatBackend: Send + Sync {
    fn send_turn<'a>(
        &'a self,
        route: &'a TopicRoute,
        request: &'a ChatTurnRequest,
    ) -> BoxFuture<'a, BackendResult<TurnResponse>>;
}

pub trait ContentSource: Send + Sync {
    /// `path` is the citation with any `#fragment` already removed.
    fn fetch_content<'a>(&'a self, path: &'a str) -> BoxFuture<'a, BackendResult<ContentArtifact>>;
}

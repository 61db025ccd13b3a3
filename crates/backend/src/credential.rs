use super::BoxFuture;
use super::error::BackendResult;

/// Supplies the optional bearer token attached to each backend call.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token<'a>(&'a self) -> BoxFuture<'a, BackendResult<Option<String>>>;
}

/// No credential; requests go out unauthenticated.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl CredentialProvider for Anonymous {
    fn bearer_token<'a>(&'a self) -> BoxFuture<'a, BackendResult<Option<String>>> {
        Box::pin(async { Ok(None) })
    }
}

#[derive(Debug, Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into().trim().to_string(),
        }
    }
}

impl CredentialProvider for StaticToken {
    fn bearer_token<'a>(&'a self) -> BoxFuture<'a, BackendResult<Option<String>>> {
        let token = (!self.token.is_empty()).then(|| self.token.clone());
        Box::pin(async move { Ok(token) })
    }
}
